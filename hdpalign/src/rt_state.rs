//! Per-file retention time cluster bookkeeping.
//!
//! RT clusters live in a slot arena. A deleted cluster's slot goes on a free-list and is
//! reused by the next new cluster, so no deletion ever moves another cluster.
use std::fmt::Display;

use crate::metabolite::MetaboliteId;
use crate::peaks::{FileId, InputFile, Peak, PeakId};
use crate::sampler::InvariantViolation;

/// The slot an RT cluster occupies in its file's arena
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RtClusterId(pub usize);

impl Display for RtClusterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RtCluster {
    pub count: usize,
    pub rt_sum: f64,
    /// The sampled RT value, `tjk`
    pub rt: f64,
    /// The metabolite this cluster belongs to
    pub metabolite: MetaboliteId,
}

impl RtCluster {
    pub fn new(rt: f64, metabolite: MetaboliteId) -> Self {
        Self {
            count: 0,
            rt_sum: 0.0,
            rt,
            metabolite,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[derive(Debug, Clone)]
pub struct FileRtState {
    pub file: FileId,
    /// The sequence id of each of this file's peaks, by position in the file
    peaks: Vec<PeakId>,
    assignments: Vec<Option<RtClusterId>>,
    clusters: Vec<Option<RtCluster>>,
    free_slots: Vec<usize>,
}

impl FileRtState {
    pub fn new(file: &InputFile) -> Self {
        Self {
            file: file.id,
            peaks: file.iter().map(|p| p.id).collect(),
            assignments: vec![None; file.len()],
            clusters: Vec::new(),
            free_slots: Vec::new(),
        }
    }

    /// Create a new empty cluster with value `rt` belonging to `metabolite`
    pub fn add_cluster(&mut self, rt: f64, metabolite: MetaboliteId) -> RtClusterId {
        let cluster = RtCluster::new(rt, metabolite);
        let id = match self.free_slots.pop() {
            Some(slot) => {
                self.clusters[slot] = Some(cluster);
                RtClusterId(slot)
            }
            None => {
                self.clusters.push(Some(cluster));
                RtClusterId(self.clusters.len() - 1)
            }
        };
        tracing::trace!(
            "Created RT cluster {id} in file {} under metabolite {metabolite}",
            self.file
        );
        id
    }

    /// Remove the cluster at `id`, which must be empty, and return it
    pub fn remove_cluster(&mut self, id: RtClusterId) -> RtCluster {
        let cluster = self
            .clusters
            .get_mut(id.0)
            .and_then(|c| c.take())
            .unwrap_or_else(|| panic!("RT cluster {id} does not exist in file {}", self.file));
        assert!(
            cluster.is_empty(),
            "Removed RT cluster {id} from file {} while it held {} peaks",
            self.file,
            cluster.count
        );
        self.free_slots.push(id.0);
        cluster
    }

    /// Add `peak` to the cluster at `id`
    pub fn add_peak(&mut self, peak: &Peak, id: RtClusterId) {
        let slot = &mut self.assignments[peak.index];
        if let Some(prev) = slot {
            panic!("Peak {} is already in RT cluster {prev}", peak.id);
        }
        *slot = Some(id);
        let file = self.file;
        let cluster = self.cluster_mut(id).unwrap_or_else(|| {
            panic!("RT cluster {id} does not exist in file {file}")
        });
        cluster.count += 1;
        cluster.rt_sum += peak.rt;
    }

    /// Remove `peak` from its current cluster, returning that cluster's id.
    ///
    /// The vacated cluster is left in place even if it is now empty.
    pub fn remove_peak(&mut self, peak: &Peak) -> RtClusterId {
        let id = self.assignments[peak.index]
            .take()
            .unwrap_or_else(|| panic!("Peak {} is not in any RT cluster", peak.id));
        let file = self.file;
        let cluster = self.cluster_mut(id).unwrap_or_else(|| {
            panic!("RT cluster {id} does not exist in file {file}")
        });
        cluster.count -= 1;
        cluster.rt_sum -= peak.rt;
        if cluster.count == 0 {
            cluster.rt_sum = 0.0;
        }
        id
    }

    pub fn cluster(&self, id: RtClusterId) -> Option<&RtCluster> {
        self.clusters.get(id.0).and_then(|c| c.as_ref())
    }

    pub fn cluster_mut(&mut self, id: RtClusterId) -> Option<&mut RtCluster> {
        self.clusters.get_mut(id.0).and_then(|c| c.as_mut())
    }

    /// The cluster the peak at `index` within this file belongs to
    pub fn assignment(&self, index: usize) -> Option<RtClusterId> {
        self.assignments.get(index).copied().flatten()
    }

    pub fn metabolite_of(&self, id: RtClusterId) -> Option<MetaboliteId> {
        self.cluster(id).map(|c| c.metabolite)
    }

    pub fn set_metabolite(&mut self, id: RtClusterId, metabolite: MetaboliteId) {
        if let Some(c) = self.cluster_mut(id) {
            c.metabolite = metabolite;
        }
    }

    /// Iterate over live clusters in slot order
    pub fn iter(&self) -> impl Iterator<Item = (RtClusterId, &RtCluster)> {
        self.clusters
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|c| (RtClusterId(i), c)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (RtClusterId, &mut RtCluster)> {
        self.clusters
            .iter_mut()
            .enumerate()
            .filter_map(|(i, c)| c.as_mut().map(|c| (RtClusterId(i), c)))
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len() - self.free_slots.len()
    }

    pub fn peaks(&self) -> &[PeakId] {
        &self.peaks
    }

    /// Verify every cluster's count and RT sum against the peaks currently assigned to it
    pub fn check_invariants(&self, peaks: &[Peak]) -> Result<(), InvariantViolation> {
        let mut counts = vec![0usize; self.clusters.len()];
        let mut sums = vec![0.0f64; self.clusters.len()];
        for (index, assigned) in self.assignments.iter().enumerate() {
            if let Some(id) = assigned {
                if self.cluster(*id).is_none() {
                    return Err(InvariantViolation::DanglingRtCluster(self.file, *id));
                }
                counts[id.0] += 1;
                sums[id.0] += peaks[self.peaks[index].0].rt;
            }
        }
        for (id, cluster) in self.iter() {
            if cluster.is_empty() {
                return Err(InvariantViolation::EmptyRtCluster(self.file, id));
            }
            if cluster.count != counts[id.0] {
                return Err(InvariantViolation::RtClusterCountMismatch {
                    file: self.file,
                    cluster: id,
                    stored: cluster.count,
                    actual: counts[id.0],
                });
            }
            let tolerance = 1e-9 * sums[id.0].abs().max(1.0);
            if (cluster.rt_sum - sums[id.0]).abs() > tolerance {
                return Err(InvariantViolation::RtSumDrift {
                    file: self.file,
                    cluster: id,
                    stored: cluster.rt_sum,
                    expected: sums[id.0],
                });
            }
        }
        Ok(())
    }
}
