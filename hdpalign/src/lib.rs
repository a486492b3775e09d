//! A hierarchical Dirichlet process Gibbs sampler that groups LC-MS peaks from many runs
//! into metabolites, retention time clusters and mass clusters.
pub mod peaks;
pub mod params;
pub mod probability;
pub mod mass_cluster;
pub mod metabolite;
pub mod rt_state;
pub mod top_level;
pub mod sampler;
pub mod sample;
pub mod results;

pub use peaks::{assign_sequence_ids, FileId, InputFile, Peak, PeakId};
pub use params::{HdpParams, HdpSettings, ParameterError};
pub use sampler::{HdpMassRtSampler, InvariantViolation, SamplerState, SweepReport};
pub use sample::{HdpAllSamples, HdpSample, SampledMassCluster, SampledMetabolite};
pub use results::{AlignedPeakSet, AlignmentResults, SampleCollector, SampleHandler};
