mod config;
mod driver;
mod input;
mod logging;
mod persist;
mod progress;

pub use config::{AlignerConfig, CONFIG_FILE, ENV_PREFIX};
pub use driver::{HdpAligner, HdpAlignerError};
pub use input::{load_input, PeakListDocument, PeakListRecord, PeakRecord};
pub use logging::configure_log;
pub use persist::{
    load_samples, persist_samples, read_json, write_json, AlignedPeakRecord, AlignedSetRecord,
    AlignmentReport,
};
pub use progress::SweepProgress;
