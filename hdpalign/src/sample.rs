//! Snapshots of the sampler's hierarchy, one per sweep.
use crate::mass_cluster::MassClusterId;
use crate::metabolite::MetaboliteId;
use crate::peaks::PeakId;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SampledMassCluster {
    pub id: MassClusterId,
    pub theta: f64,
    /// Member peaks in ascending order
    pub peaks: Vec<PeakId>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SampledMetabolite {
    pub id: MetaboliteId,
    pub rt: f64,
    pub mass_clusters: Vec<SampledMassCluster>,
}

/// The full metabolite / mass cluster / peak membership hierarchy after one sweep
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HdpSample {
    /// The zero-based sweep this snapshot was taken after
    pub index: usize,
    pub metabolites: Vec<SampledMetabolite>,
    /// Peaks permanently removed from the model by the speed-up heuristic
    pub excluded: Vec<PeakId>,
}

impl HdpSample {
    pub fn metabolite_count(&self) -> usize {
        self.metabolites.len()
    }

    pub fn mass_cluster_count(&self) -> usize {
        self.metabolites.iter().map(|m| m.mass_clusters.len()).sum()
    }

    /// The number of mass clusters in each metabolite
    pub fn mass_cluster_counts(&self) -> Vec<usize> {
        self.metabolites.iter().map(|m| m.mass_clusters.len()).collect()
    }

    /// The number of peaks held by mass clusters, not counting excluded peaks
    pub fn clustered_peak_count(&self) -> usize {
        self.iter_mass_clusters().map(|c| c.peaks.len()).sum()
    }

    pub fn iter_mass_clusters(&self) -> impl Iterator<Item = &SampledMassCluster> {
        self.metabolites.iter().flat_map(|m| m.mass_clusters.iter())
    }

    /// Every group of peaks that share a leaf in this sample. Excluded peaks are
    /// singleton groups.
    pub fn peak_sets(&self) -> impl Iterator<Item = Vec<PeakId>> + '_ {
        self.iter_mass_clusters()
            .map(|c| c.peaks.clone())
            .chain(self.excluded.iter().map(|p| vec![*p]))
    }

    /// Whether `a` and `b` share a mass cluster in this sample
    pub fn co_clustered(&self, a: PeakId, b: PeakId) -> bool {
        self.iter_mass_clusters()
            .any(|c| c.peaks.contains(&a) && c.peaks.contains(&b))
    }
}

/// The samples kept after burn-in. This is the unit that gets persisted.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HdpAllSamples {
    pub samples: Vec<HdpSample>,
}

impl HdpAllSamples {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: HdpSample) {
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, HdpSample> {
        self.samples.iter()
    }
}

impl FromIterator<HdpSample> for HdpAllSamples {
    fn from_iter<T: IntoIterator<Item = HdpSample>>(iter: T) -> Self {
        Self {
            samples: iter.into_iter().collect(),
        }
    }
}
