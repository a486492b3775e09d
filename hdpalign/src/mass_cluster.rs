use std::collections::{BTreeSet, HashMap};
use std::fmt::Display;
use std::hash::Hash;

use identity_hash::{BuildIdentityHasher, IdentityHashable};

use crate::peaks::{FileId, Peak, PeakId};
use crate::probability::MassClusterStats;

/// A mass cluster's identity within its owning metabolite. Never reused by that metabolite.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MassClusterId(pub usize);

impl Hash for MassClusterId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_usize(self.0);
    }
}

impl IdentityHashable for MassClusterId {}

impl Display for MassClusterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A leaf-level grouping of peaks sharing a single mass within a metabolite.
#[derive(Debug)]
pub struct MassCluster {
    pub id: MassClusterId,
    /// The sampled mean log-mass
    pub theta: f64,
    count: usize,
    log_mass_sum: f64,
    members: BTreeSet<PeakId>,
    /// How many members came from each input file, for the same-origin veto
    origins: HashMap<FileId, usize, BuildIdentityHasher<FileId>>,
}

impl MassCluster {
    pub fn new(id: MassClusterId, theta: f64) -> Self {
        Self {
            id,
            theta,
            count: 0,
            log_mass_sum: 0.0,
            members: BTreeSet::new(),
            origins: HashMap::default(),
        }
    }

    pub fn add_peak(&mut self, peak: &Peak) {
        if !self.members.insert(peak.id) {
            panic!("Peak {} is already a member of mass cluster {}", peak.id, self.id);
        }
        self.count += 1;
        self.log_mass_sum += peak.mass_log;
        *self.origins.entry(peak.file).or_default() += 1;
    }

    pub fn remove_peak(&mut self, peak: &Peak) {
        if !self.members.remove(&peak.id) {
            panic!("Peak {} is not a member of mass cluster {}", peak.id, self.id);
        }
        self.count -= 1;
        self.log_mass_sum -= peak.mass_log;
        match self.origins.get_mut(&peak.file) {
            Some(n) if *n > 1 => *n -= 1,
            Some(_) => {
                self.origins.remove(&peak.file);
            }
            None => panic!(
                "Mass cluster {} has no members from file {}",
                self.id, peak.file
            ),
        }
        if self.count == 0 {
            self.log_mass_sum = 0.0;
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn log_mass_sum(&self) -> f64 {
        self.log_mass_sum
    }

    pub fn members(&self) -> &BTreeSet<PeakId> {
        &self.members
    }

    /// Whether any member peak originated in `file`
    pub fn contains_file(&self, file: FileId) -> bool {
        self.origins.contains_key(&file)
    }

    pub fn stats(&self) -> MassClusterStats {
        MassClusterStats::new(self.count, self.log_mass_sum)
    }

    /// The sum of the member log-masses recomputed from `peaks`
    pub fn recompute_log_mass_sum(&self, peaks: &[Peak]) -> f64 {
        self.members.iter().map(|p| peaks[p.0].mass_log).sum()
    }

    /// Set `theta` to the log of the mean member mass, recomputed from `peaks`.
    ///
    /// Uses the raw member masses, not the running log-mass sum.
    pub fn update_theta(&mut self, peaks: &[Peak]) {
        if self.members.is_empty() {
            return;
        }
        let total: f64 = self.members.iter().map(|p| peaks[p.0].mass).sum();
        self.theta = (total / self.members.len() as f64).ln();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::peaks::{assign_sequence_ids, InputFile};

    fn peaks() -> Vec<Peak> {
        let mut files = vec![
            InputFile::new(FileId(0), vec![Peak::new(100.0, 10.0, 1.0)]),
            InputFile::new(
                FileId(1),
                vec![Peak::new(300.0, 10.0, 1.0), Peak::new(500.0, 10.0, 1.0)],
            ),
        ];
        assign_sequence_ids(&mut files);
        files.into_iter().flat_map(|f| f.peaks).collect()
    }

    #[test]
    fn test_add_remove() {
        let peaks = peaks();
        let mut cluster = MassCluster::new(MassClusterId(0), peaks[0].mass_log);
        cluster.add_peak(&peaks[0]);
        cluster.add_peak(&peaks[1]);
        assert_eq!(cluster.len(), 2);
        assert!(cluster.contains_file(FileId(0)));
        assert!(cluster.contains_file(FileId(1)));
        let expected = peaks[0].mass_log + peaks[1].mass_log;
        assert!((cluster.log_mass_sum() - expected).abs() < 1e-12);

        cluster.remove_peak(&peaks[0]);
        assert!(!cluster.contains_file(FileId(0)));
        assert!((cluster.log_mass_sum() - cluster.recompute_log_mass_sum(&peaks)).abs() < 1e-12);
        cluster.remove_peak(&peaks[1]);
        assert!(cluster.is_empty());
        assert_eq!(cluster.log_mass_sum(), 0.0);
    }

    #[test]
    fn test_theta_from_mean_mass() {
        let peaks = peaks();
        let mut cluster = MassCluster::new(MassClusterId(0), 0.0);
        cluster.add_peak(&peaks[0]);
        cluster.add_peak(&peaks[1]);
        cluster.update_theta(&peaks);
        assert!((cluster.theta - 200.0f64.ln()).abs() < 1e-12);
    }

    #[test]
    #[should_panic]
    fn test_double_remove() {
        let peaks = peaks();
        let mut cluster = MassCluster::new(MassClusterId(0), 0.0);
        cluster.add_peak(&peaks[2]);
        cluster.remove_peak(&peaks[2]);
        cluster.remove_peak(&peaks[2]);
    }
}
