use std::ops::{Add, AddAssign};

use hdpalign::SweepReport;

/// Running totals over the sweeps of a sampler run
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct SweepProgress {
    pub sweeps: usize,
    pub burn_in_sweeps: usize,
    pub peaks_processed: usize,
    pub elapsed_secs: f64,
    pub metabolites: usize,
    pub mass_clusters: usize,
    /// The largest excluded peak count seen
    pub excluded: usize,
}

impl SweepProgress {
    pub fn mean_metabolites(&self) -> f64 {
        if self.sweeps == 0 {
            0.0
        } else {
            self.metabolites as f64 / self.sweeps as f64
        }
    }

    pub fn mean_mass_clusters(&self) -> f64 {
        if self.sweeps == 0 {
            0.0
        } else {
            self.mass_clusters as f64 / self.sweeps as f64
        }
    }
}

impl From<&SweepReport> for SweepProgress {
    fn from(report: &SweepReport) -> Self {
        Self {
            sweeps: 1,
            burn_in_sweeps: report.is_burn_in as usize,
            peaks_processed: report.peaks_processed,
            elapsed_secs: report.elapsed_secs,
            metabolites: report.metabolites,
            mass_clusters: report.mass_clusters,
            excluded: report.excluded,
        }
    }
}

impl Add for SweepProgress {
    type Output = SweepProgress;

    fn add(self, rhs: Self) -> Self::Output {
        let mut dup = self;
        dup += rhs;
        dup
    }
}

impl AddAssign for SweepProgress {
    fn add_assign(&mut self, rhs: Self) {
        self.sweeps += rhs.sweeps;
        self.burn_in_sweeps += rhs.burn_in_sweeps;
        self.peaks_processed += rhs.peaks_processed;
        self.elapsed_secs += rhs.elapsed_secs;
        self.metabolites += rhs.metabolites;
        self.mass_clusters += rhs.mass_clusters;
        self.excluded = self.excluded.max(rhs.excluded);
    }
}

impl AddAssign<&SweepReport> for SweepProgress {
    fn add_assign(&mut self, rhs: &SweepReport) {
        *self += SweepProgress::from(rhs);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_accumulate() {
        let mut progress = SweepProgress::default();
        progress += &SweepReport {
            index: 0,
            is_burn_in: true,
            peaks_processed: 10,
            total_peaks: 10,
            elapsed_secs: 0.5,
            metabolites: 4,
            mass_clusters: 6,
            excluded: 0,
        };
        let second = SweepProgress::from(&SweepReport {
            index: 1,
            is_burn_in: false,
            peaks_processed: 8,
            total_peaks: 10,
            elapsed_secs: 0.25,
            metabolites: 2,
            mass_clusters: 4,
            excluded: 2,
        });
        let total = progress + second;
        assert_eq!(total.sweeps, 2);
        assert_eq!(total.burn_in_sweeps, 1);
        assert_eq!(total.peaks_processed, 18);
        assert_eq!(total.excluded, 2);
        assert!((total.mean_metabolites() - 3.0).abs() < 1e-12);
        assert!((total.mean_mass_clusters() - 5.0).abs() < 1e-12);
    }
}
