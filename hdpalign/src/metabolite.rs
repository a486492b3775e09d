use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;

use identity_hash::{BuildIdentityHasher, IdentityHashable};

use crate::mass_cluster::{MassCluster, MassClusterId};
use crate::peaks::{Peak, PeakId};
use crate::probability::MassClusterStats;
use crate::sampler::InvariantViolation;

/// A metabolite's stable identity. Ids are handed out in increasing order and never reused
/// within a sampler run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetaboliteId(pub usize);

impl Hash for MetaboliteId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_usize(self.0);
    }
}

impl IdentityHashable for MetaboliteId {}

impl Display for MetaboliteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The top-level grouping of peaks, owning an ordered collection of mass clusters
/// and routing each of its peaks to one of them.
#[derive(Debug)]
pub struct Metabolite {
    pub id: MetaboliteId,
    mass_clusters: Vec<MassCluster>,
    next_mass_cluster_id: usize,
    assignment: HashMap<PeakId, MassClusterId, BuildIdentityHasher<PeakId>>,
    peaks: Vec<PeakId>,
}

impl Metabolite {
    pub fn new(id: MetaboliteId) -> Self {
        Self {
            id,
            mass_clusters: Vec::new(),
            next_mass_cluster_id: 0,
            assignment: HashMap::default(),
            peaks: Vec::new(),
        }
    }

    /// Create and append a new empty mass cluster with mean `theta`, returning its position
    pub fn add_mass_cluster(&mut self, theta: f64) -> usize {
        let id = MassClusterId(self.next_mass_cluster_id);
        self.next_mass_cluster_id += 1;
        self.mass_clusters.push(MassCluster::new(id, theta));
        tracing::trace!("Created mass cluster {id} in metabolite {}", self.id);
        self.mass_clusters.len() - 1
    }

    /// Remove the mass cluster with `id`, which must be empty
    pub fn remove_mass_cluster(&mut self, id: MassClusterId) {
        let pos = self
            .position_of(id)
            .unwrap_or_else(|| panic!("Mass cluster {id} not found in metabolite {}", self.id));
        let cluster = self.mass_clusters.remove(pos);
        assert!(
            cluster.is_empty(),
            "Removed mass cluster {id} from metabolite {} while it still held {} peaks",
            self.id,
            cluster.len()
        );
    }

    /// Add `peak` to the mass cluster at `position`
    pub fn add_peak(&mut self, peak: &Peak, position: usize) {
        let cluster = &mut self.mass_clusters[position];
        cluster.add_peak(peak);
        if let Some(prev) = self.assignment.insert(peak.id, cluster.id) {
            panic!(
                "Peak {} was already assigned to mass cluster {prev} of metabolite {}",
                peak.id, self.id
            );
        }
        self.peaks.push(peak.id);
    }

    /// Remove `peak` from this metabolite, returning the id of the mass cluster it vacated.
    ///
    /// The vacated cluster is left in place even if it is now empty.
    pub fn remove_peak(&mut self, peak: &Peak) -> MassClusterId {
        let id = self.assignment.remove(&peak.id).unwrap_or_else(|| {
            panic!("Peak {} is not assigned in metabolite {}", peak.id, self.id)
        });
        let pos = self
            .position_of(id)
            .unwrap_or_else(|| panic!("Mass cluster {id} not found in metabolite {}", self.id));
        self.mass_clusters[pos].remove_peak(peak);
        match self.peaks.iter().position(|p| *p == peak.id) {
            Some(i) => {
                self.peaks.remove(i);
            }
            None => panic!("Peak {} missing from metabolite {} peak list", peak.id, self.id),
        }
        id
    }

    /// For each mass cluster, whether `peek` may join it, plus a trailing always-true slot for
    /// a new cluster. A cluster already holding a peak from the same file is ineligible.
    pub fn mass_cluster_indicator(&self, peek: &Peak) -> Vec<bool> {
        self.mass_clusters
            .iter()
            .map(|c| !c.contains_file(peek.file))
            .chain(std::iter::once(true))
            .collect()
    }

    pub fn mass_cluster_stats(&self) -> Vec<MassClusterStats> {
        self.mass_clusters.iter().map(|c| c.stats()).collect()
    }

    pub fn position_of(&self, id: MassClusterId) -> Option<usize> {
        self.mass_clusters.iter().position(|c| c.id == id)
    }

    pub fn mass_cluster(&self, id: MassClusterId) -> Option<&MassCluster> {
        self.position_of(id).map(|i| &self.mass_clusters[i])
    }

    pub fn mass_cluster_of(&self, peak: PeakId) -> Option<MassClusterId> {
        self.assignment.get(&peak).copied()
    }

    pub fn mass_clusters(&self) -> &[MassCluster] {
        &self.mass_clusters
    }

    pub fn peaks(&self) -> &[PeakId] {
        &self.peaks
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn update_thetas(&mut self, peaks: &[Peak]) {
        for cluster in self.mass_clusters.iter_mut() {
            cluster.update_theta(peaks);
        }
    }

    /// Verify the mass cluster counts, the peak routing table and the peak list agree, and
    /// that every mass cluster's log-mass sum matches its members
    pub fn check_invariants(&self, peaks: &[Peak]) -> Result<(), InvariantViolation> {
        let cluster_total: usize = self.mass_clusters.iter().map(|c| c.len()).sum();
        if cluster_total != self.assignment.len() || cluster_total != self.peaks.len() {
            return Err(InvariantViolation::MetaboliteSizeMismatch {
                metabolite: self.id,
                mass_cluster_total: cluster_total,
                assignments: self.assignment.len(),
                peaks: self.peaks.len(),
            });
        }
        for cluster in self.mass_clusters.iter() {
            if cluster.is_empty() {
                return Err(InvariantViolation::EmptyMassCluster(self.id, cluster.id));
            }
            let expected = cluster.recompute_log_mass_sum(peaks);
            let tolerance = 1e-9 * expected.abs().max(1.0);
            if (expected - cluster.log_mass_sum()).abs() > tolerance {
                return Err(InvariantViolation::LogMassSumDrift {
                    metabolite: self.id,
                    mass_cluster: cluster.id,
                    stored: cluster.log_mass_sum(),
                    expected,
                });
            }
            for p in cluster.members() {
                if self.assignment.get(p) != Some(&cluster.id) {
                    return Err(InvariantViolation::MisroutedPeak(*p, self.id));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::peaks::{assign_sequence_ids, FileId, InputFile};

    fn peaks() -> Vec<Peak> {
        let mut files = vec![
            InputFile::new(
                FileId(0),
                vec![Peak::new(100.0, 10.0, 1.0), Peak::new(150.0, 12.0, 1.0)],
            ),
            InputFile::new(FileId(1), vec![Peak::new(100.0, 10.5, 1.0)]),
        ];
        assign_sequence_ids(&mut files);
        files.into_iter().flat_map(|f| f.peaks).collect()
    }

    #[test]
    fn test_add_remove_routing() {
        let peaks = peaks();
        let mut met = Metabolite::new(MetaboliteId(0));
        let a = met.add_mass_cluster(peaks[0].mass_log);
        let b = met.add_mass_cluster(peaks[1].mass_log);
        met.add_peak(&peaks[0], a);
        met.add_peak(&peaks[2], a);
        met.add_peak(&peaks[1], b);
        assert_eq!(met.len(), 3);
        met.check_invariants(&peaks).unwrap();

        let vacated = met.remove_peak(&peaks[1]);
        assert_eq!(vacated, MassClusterId(1));
        assert!(met.mass_cluster(vacated).unwrap().is_empty());
        met.remove_mass_cluster(vacated);
        assert_eq!(met.mass_clusters().len(), 1);
        met.check_invariants(&peaks).unwrap();

        // ids are not reused after removal
        let c = met.add_mass_cluster(0.0);
        assert_eq!(met.mass_clusters()[c].id, MassClusterId(2));
    }

    #[test]
    fn test_indicator() {
        let peaks = peaks();
        let mut met = Metabolite::new(MetaboliteId(0));
        let a = met.add_mass_cluster(peaks[0].mass_log);
        met.add_peak(&peaks[0], a);
        let b = met.add_mass_cluster(peaks[2].mass_log);
        met.add_peak(&peaks[2], b);

        // peak 1 shares a file with peak 0
        assert_eq!(met.mass_cluster_indicator(&peaks[1]), vec![false, true, true]);
        let empty = Metabolite::new(MetaboliteId(1));
        assert_eq!(empty.mass_cluster_indicator(&peaks[1]), vec![true]);
    }

    #[test]
    fn test_invariant_detects_empty() {
        let peaks = peaks();
        let mut met = Metabolite::new(MetaboliteId(3));
        let a = met.add_mass_cluster(0.0);
        met.add_peak(&peaks[0], a);
        met.remove_peak(&peaks[0]);
        assert_eq!(
            met.check_invariants(&peaks),
            Err(InvariantViolation::EmptyMassCluster(MetaboliteId(3), MassClusterId(0)))
        );
    }

    #[test]
    #[should_panic]
    fn test_remove_nonempty_cluster() {
        let peaks = peaks();
        let mut met = Metabolite::new(MetaboliteId(0));
        let a = met.add_mass_cluster(0.0);
        met.add_peak(&peaks[0], a);
        met.remove_mass_cluster(MassClusterId(0));
    }
}
