//! The collapsed Gibbs sampler over metabolites, per-file RT clusters and mass clusters.
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use identity_hash::BuildIdentityHasher;
use itertools::Itertools;
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tracing::{debug, info};

use crate::mass_cluster::MassClusterId;
use crate::metabolite::MetaboliteId;
use crate::params::{HdpParams, HdpSettings, ParameterError};
use crate::peaks::{assign_sequence_ids, FileId, InputFile, Peak, PeakId};
use crate::probability::{
    log_normal_density, log_sum_exp, mass_dp_log_posterior, new_rt_cluster_log_posterior,
    normal_posterior, rt_cluster_log_posterior, sample_log_categorical, sample_normal,
    MetaboliteSnapshot,
};
use crate::results::SampleCollector;
use crate::rt_state::{FileRtState, RtClusterId};
use crate::sample::{HdpSample, SampledMassCluster, SampledMetabolite};
use crate::top_level::TopLevelState;

/// A structural inconsistency in the sampler's hierarchy. These are defects, never
/// recoverable conditions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvariantViolation {
    #[error("Metabolite {metabolite} has {mass_cluster_total} peaks in mass clusters, {assignments} routed peaks and {peaks} listed peaks")]
    MetaboliteSizeMismatch {
        metabolite: MetaboliteId,
        mass_cluster_total: usize,
        assignments: usize,
        peaks: usize,
    },
    #[error("Metabolite {0} holds an empty mass cluster {1}")]
    EmptyMassCluster(MetaboliteId, MassClusterId),
    #[error("Mass cluster {mass_cluster} of metabolite {metabolite} stores a log-mass sum of {stored} but its members sum to {expected}")]
    LogMassSumDrift {
        metabolite: MetaboliteId,
        mass_cluster: MassClusterId,
        stored: f64,
        expected: f64,
    },
    #[error("Peak {0} is not routed to the mass cluster holding it in metabolite {1}")]
    MisroutedPeak(PeakId, MetaboliteId),
    #[error("A peak in file {0} points to missing RT cluster {1}")]
    DanglingRtCluster(FileId, RtClusterId),
    #[error("File {0} holds an empty RT cluster {1}")]
    EmptyRtCluster(FileId, RtClusterId),
    #[error("RT cluster {cluster} of file {file} counts {stored} peaks but {actual} are assigned to it")]
    RtClusterCountMismatch {
        file: FileId,
        cluster: RtClusterId,
        stored: usize,
        actual: usize,
    },
    #[error("RT cluster {cluster} of file {file} stores an RT sum of {stored} but its members sum to {expected}")]
    RtSumDrift {
        file: FileId,
        cluster: RtClusterId,
        stored: f64,
        expected: f64,
    },
    #[error("RT cluster {1} of file {0} points to missing metabolite {2}")]
    UnknownMetabolite(FileId, RtClusterId, MetaboliteId),
    #[error("Metabolite {0} has no peaks")]
    EmptyMetabolite(MetaboliteId),
    #[error("Metabolite {metabolite} records {stored} RT clusters but {actual} point to it")]
    RtClusterTally {
        metabolite: MetaboliteId,
        stored: usize,
        actual: usize,
    },
    #[error("Metabolite {metabolite} records an RT cluster sum of {stored} but its clusters sum to {expected}")]
    RtClusterSumDrift {
        metabolite: MetaboliteId,
        stored: f64,
        expected: f64,
    },
    #[error("Peak {0} is not held by the metabolite {1} its RT cluster points to")]
    PeakOutsideMetabolite(PeakId, MetaboliteId),
    #[error("Excluded peak {0} is still assigned in the model")]
    ExcludedPeakAssigned(PeakId),
    #[error("Peak {0} has no RT cluster")]
    UnassignedPeak(PeakId),
    #[error("The model holds {actual} peaks and excludes {excluded}, but there are {expected} input peaks")]
    PeakCountMismatch {
        expected: usize,
        actual: usize,
        excluded: usize,
    },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    #[default]
    Uninitialized,
    /// A single metabolite, one RT cluster per file and one mass cluster hold every peak
    Initialized,
    SweepInProgress,
    ParametersUpdated,
    /// All configured sweeps have been drawn
    Done,
}

/// A summary of one completed sweep
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct SweepReport {
    /// The zero-based sweep index
    pub index: usize,
    pub is_burn_in: bool,
    /// The number of peaks removed and reassigned (or newly excluded) during the sweep
    pub peaks_processed: usize,
    pub total_peaks: usize,
    pub elapsed_secs: f64,
    pub metabolites: usize,
    pub mass_clusters: usize,
    pub excluded: usize,
}

/// What [`HdpMassRtSampler`] deleted while taking a peak out of the model
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RemovalOutcome {
    pub mass_cluster_removed: bool,
    pub rt_cluster_removed: bool,
    pub metabolite_removed: bool,
}

/// The HDP mass/RT alignment sampler.
///
/// The sampler owns the whole hierarchy and mutates it strictly sequentially, one peak at a
/// time. Each peak is taken out of the model, its conditional posterior is computed from the
/// remaining sufficient statistics, and it is put back under the sampled assignment before the
/// next peak is visited.
#[derive(Debug)]
pub struct HdpMassRtSampler {
    params: HdpParams,
    /// Every input peak, indexed by [`PeakId`]
    peaks: Vec<Peak>,
    files: Vec<FileRtState>,
    top: TopLevelState,
    rng: StdRng,
    singleton_streak: HashMap<PeakId, usize, BuildIdentityHasher<PeakId>>,
    excluded: BTreeSet<PeakId>,
    state: SamplerState,
    sweeps_done: usize,
}

impl HdpMassRtSampler {
    /// Create a sampler over `files`. Sequence ids are (re)assigned to every peak.
    pub fn new(mut files: Vec<InputFile>, params: HdpParams) -> Self {
        assign_sequence_ids(&mut files);
        let peaks: Vec<Peak> = files.iter().flat_map(|f| f.peaks.iter().copied()).collect();
        let states = files.iter().map(FileRtState::new).collect();
        let rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            params,
            peaks,
            files: states,
            top: TopLevelState::new(),
            rng,
            singleton_streak: HashMap::default(),
            excluded: BTreeSet::new(),
            state: SamplerState::Uninitialized,
            sweeps_done: 0,
        }
    }

    /// Derive the hyperparameters for `files` from `settings` and create a sampler
    pub fn from_settings(
        files: Vec<InputFile>,
        settings: &HdpSettings,
    ) -> Result<Self, ParameterError> {
        let params = HdpParams::from_settings(&files, settings)?;
        Ok(Self::new(files, params))
    }

    pub fn params(&self) -> &HdpParams {
        &self.params
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    pub fn peaks(&self) -> &[Peak] {
        &self.peaks
    }

    pub fn top_level(&self) -> &TopLevelState {
        &self.top
    }

    pub fn file_states(&self) -> &[FileRtState] {
        &self.files
    }

    pub fn excluded(&self) -> &BTreeSet<PeakId> {
        &self.excluded
    }

    pub fn sweeps_done(&self) -> usize {
        self.sweeps_done
    }

    /// The metabolite `peak` currently belongs to, if it is in the model
    pub fn metabolite_of(&self, peak: PeakId) -> Option<MetaboliteId> {
        let p = self.peaks.get(peak.0)?;
        let state = self.files.iter().find(|f| f.file == p.file)?;
        state
            .assignment(p.index)
            .and_then(|id| state.metabolite_of(id))
    }

    /// Put every peak into one metabolite with one RT cluster per file and one mass cluster
    pub fn initialize(&mut self) {
        if self.state != SamplerState::Uninitialized {
            return;
        }
        let params = self.params;
        let ti = sample_normal(&mut self.rng, params.mu_0, params.sigma_0_prec);
        let metabolite_id = self.top.create_metabolite(ti);
        let mass_position = match self.top.metabolite_mut(metabolite_id) {
            Some(m) => m.add_mass_cluster(params.psi_0),
            None => unreachable!("Metabolite {metabolite_id} was just created"),
        };

        for state in self.files.iter_mut() {
            if state.peaks().is_empty() {
                continue;
            }
            let tjk = if params.is_reference_file(state.file) {
                ti
            } else {
                sample_normal(&mut self.rng, ti, params.delta_prec)
            };
            let rt_id = state.add_cluster(tjk, metabolite_id);
            self.top.attach_rt_cluster(metabolite_id, tjk);
            for pid in state.peaks().to_vec() {
                let peak = &self.peaks[pid.0];
                state.add_peak(peak, rt_id);
                if let Some(m) = self.top.metabolite_mut(metabolite_id) {
                    m.add_peak(peak, mass_position);
                }
            }
        }
        debug!(
            "Initialized {} peaks over {} files with mu_0={:0.3} psi_0={:0.5}",
            self.peaks.len(),
            self.files.len(),
            params.mu_0,
            params.psi_0
        );
        self.state = SamplerState::Initialized;
    }

    /// Run one full sweep followed by the parameter update.
    ///
    /// Returns `None` once all configured sweeps have been drawn.
    #[tracing::instrument(skip_all, level = "trace")]
    pub fn step(&mut self) -> Option<SweepReport> {
        match self.state {
            SamplerState::Done => return None,
            SamplerState::Uninitialized => self.initialize(),
            _ => {}
        }
        let start = Instant::now();
        self.state = SamplerState::SweepInProgress;

        let mut processed = 0;
        for slot in 0..self.files.len() {
            for pid in self.files[slot].peaks().to_vec() {
                if self.excluded.contains(&pid) {
                    continue;
                }
                processed += 1;
                self.update_peak(slot, pid);
            }
        }

        self.update_parameters();
        self.state = SamplerState::ParametersUpdated;

        if let Err(e) = self.check_invariants() {
            panic!("Invariant violated after sweep {}: {e}", self.sweeps_done);
        }

        let index = self.sweeps_done;
        self.sweeps_done += 1;
        if self.sweeps_done >= self.params.n_samples {
            self.state = SamplerState::Done;
        }

        let report = SweepReport {
            index,
            is_burn_in: index < self.params.burn_in,
            peaks_processed: processed,
            total_peaks: self.peaks.len(),
            elapsed_secs: start.elapsed().as_secs_f64(),
            metabolites: self.top.len(),
            mass_clusters: self
                .top
                .iter()
                .map(|(_, e)| e.metabolite.mass_clusters().len())
                .sum(),
            excluded: self.excluded.len(),
        };
        debug!(
            "Sample {}{} {:0.3}s peaks={}/{} I={} all_A=[{}]",
            report.index,
            if report.is_burn_in { " (burn-in)" } else { "" },
            report.elapsed_secs,
            report.peaks_processed,
            report.total_peaks,
            report.metabolites,
            self.top
                .iter()
                .map(|(_, e)| e.metabolite.mass_clusters().len())
                .join(", ")
        );
        Some(report)
    }

    /// Draw every configured sweep, handing each snapshot to `collector`
    pub fn run<C: SampleCollector + ?Sized>(&mut self, collector: &mut C) -> Vec<SweepReport> {
        let start = Instant::now();
        self.initialize();
        let mut reports = Vec::with_capacity(self.params.n_samples);
        while let Some(report) = self.step() {
            collector.collect(&report, self.snapshot());
            reports.push(report);
        }
        info!(
            "Drew {} samples over {} peaks in {:0.3?}, {} peaks excluded",
            reports.len(),
            self.peaks.len(),
            start.elapsed(),
            self.excluded.len()
        );
        reports
    }

    fn update_peak(&mut self, slot: usize, pid: PeakId) {
        let peak = self.peaks[pid.0];
        let singleton = self.is_mass_singleton(slot, &peak);
        self.remove_peak_from_model(slot, &peak);
        if self.params.speed_up && self.track_singleton_streak(pid, singleton) {
            debug!(
                "Excluding peak {pid} after {} sweeps alone in its mass cluster",
                self.singleton_streak.get(&pid).copied().unwrap_or_default()
            );
            self.excluded.insert(pid);
            return;
        }
        self.reassign_peak(slot, &peak);
    }

    fn is_mass_singleton(&self, slot: usize, peak: &Peak) -> bool {
        let state = &self.files[slot];
        state
            .assignment(peak.index)
            .and_then(|id| state.metabolite_of(id))
            .and_then(|m| self.top.metabolite(m))
            .and_then(|m| {
                m.mass_cluster_of(peak.id)
                    .and_then(|c| m.mass_cluster(c))
                    .map(|c| c.len() == 1)
            })
            .unwrap_or(false)
    }

    /// Update the peak's singleton streak, returning whether it has run long enough to exclude it
    fn track_singleton_streak(&mut self, pid: PeakId, singleton: bool) -> bool {
        let streak = self.singleton_streak.entry(pid).or_default();
        if singleton {
            *streak += 1;
        } else {
            *streak = 0;
        }
        *streak > self.params.speed_up_num_sample
    }

    /// Take `peak` out of every sufficient statistic, deleting whatever becomes empty
    fn remove_peak_from_model(&mut self, slot: usize, peak: &Peak) -> RemovalOutcome {
        let mut outcome = RemovalOutcome::default();
        let state = &mut self.files[slot];
        let rt_id = state.remove_peak(peak);
        let metabolite_id = state
            .metabolite_of(rt_id)
            .unwrap_or_else(|| panic!("RT cluster {rt_id} of file {} vanished", state.file));

        let metabolite = self
            .top
            .metabolite_mut(metabolite_id)
            .unwrap_or_else(|| panic!("Metabolite {metabolite_id} does not exist"));
        let mass_id = metabolite.remove_peak(peak);
        if metabolite
            .mass_cluster(mass_id)
            .is_some_and(|c| c.is_empty())
        {
            metabolite.remove_mass_cluster(mass_id);
            outcome.mass_cluster_removed = true;
        }

        if state.cluster(rt_id).is_some_and(|c| c.is_empty()) {
            let cluster = state.remove_cluster(rt_id);
            outcome.rt_cluster_removed = true;
            if self.top.detach_rt_cluster(metabolite_id, cluster.rt) == 0 {
                let removed = self.top.remove_metabolite(metabolite_id);
                assert!(
                    removed.is_empty(),
                    "Removed metabolite {metabolite_id} still held {} peaks",
                    removed.len()
                );
                outcome.metabolite_removed = true;
            }
        }
        outcome
    }

    /// Sample a new RT cluster and mass cluster for `peak`, which must be out of the model
    fn reassign_peak(&mut self, slot: usize, peak: &Peak) {
        let params = self.params;
        let x = peak.mass_log;
        let rt = peak.rt;

        let mut metabolite_ids = Vec::with_capacity(self.top.len());
        let mut snapshots = Vec::with_capacity(self.top.len());
        let mut metabolite_index: HashMap<MetaboliteId, usize, BuildIdentityHasher<MetaboliteId>> =
            HashMap::default();
        for (id, entry) in self.top.iter() {
            let m = &entry.metabolite;
            let post = mass_dp_log_posterior(
                x,
                &m.mass_cluster_stats(),
                &m.mass_cluster_indicator(peak),
                &params,
            );
            metabolite_index.insert(*id, snapshots.len());
            metabolite_ids.push(*id);
            snapshots.push(MetaboliteSnapshot {
                rt_cluster_count: entry.stats.rt_cluster_count,
                rt: entry.stats.rt,
                mass_log_likelihood: log_sum_exp(&post),
            });
        }

        let state = &self.files[slot];
        let mut rt_ids = Vec::with_capacity(state.cluster_count());
        let mut existing = Vec::with_capacity(state.cluster_count());
        for (id, cluster) in state.iter() {
            let i = *metabolite_index.get(&cluster.metabolite).unwrap_or_else(|| {
                panic!(
                    "RT cluster {id} of file {} points to missing metabolite {}",
                    state.file, cluster.metabolite
                )
            });
            let ll = log_normal_density(rt, cluster.rt, params.gamma_prec)
                + snapshots[i].mass_log_likelihood;
            rt_ids.push(id);
            existing.push((cluster.count, ll));
        }

        let new_terms = new_rt_cluster_log_posterior(rt, x, &snapshots, &params);
        let post = rt_cluster_log_posterior(&existing, log_sum_exp(&new_terms), params.alpha_rt);
        let choice = sample_log_categorical(&mut self.rng, &post);

        let (rt_id, metabolite_id) = if choice < rt_ids.len() {
            let rt_id = rt_ids[choice];
            let metabolite_id = self.files[slot]
                .metabolite_of(rt_id)
                .unwrap_or_else(|| panic!("RT cluster {rt_id} vanished"));
            (rt_id, metabolite_id)
        } else {
            self.create_rt_cluster(slot, peak, &new_terms, &metabolite_ids)
        };

        let metabolite = self
            .top
            .metabolite_mut(metabolite_id)
            .unwrap_or_else(|| panic!("Metabolite {metabolite_id} does not exist"));
        let post = mass_dp_log_posterior(
            x,
            &metabolite.mass_cluster_stats(),
            &metabolite.mass_cluster_indicator(peak),
            &params,
        );
        let k = sample_log_categorical(&mut self.rng, &post);
        let position = if k < metabolite.mass_clusters().len() {
            k
        } else {
            metabolite.add_mass_cluster(x)
        };

        metabolite.add_peak(peak, position);
        self.files[slot].add_peak(peak, rt_id);
    }

    /// Create a new RT cluster in the file at `slot` for `peak`, choosing its metabolite from
    /// `new_terms`, whose final entry stands for a brand new metabolite
    fn create_rt_cluster(
        &mut self,
        slot: usize,
        peak: &Peak,
        new_terms: &[f64],
        metabolite_ids: &[MetaboliteId],
    ) -> (RtClusterId, MetaboliteId) {
        let params = self.params;
        let k = sample_log_categorical(&mut self.rng, new_terms);
        let metabolite_id = if k < metabolite_ids.len() {
            metabolite_ids[k]
        } else {
            let local = 1.0 / (1.0 / params.gamma_prec + 1.0 / params.delta_prec);
            let prec = local + params.sigma_0_prec;
            let mean = (local * peak.rt + params.sigma_0_prec * params.mu_0) / prec;
            let ti = sample_normal(&mut self.rng, mean, prec);
            self.top.create_metabolite(ti)
        };

        let ti = match self.top.stats(metabolite_id) {
            Some(stats) => stats.rt,
            None => panic!("Metabolite {metabolite_id} does not exist"),
        };
        let state = &mut self.files[slot];
        let tjk = if params.is_reference_file(state.file) {
            ti
        } else {
            let prec = params.gamma_prec + params.delta_prec;
            let mean = (params.gamma_prec * peak.rt + params.delta_prec * ti) / prec;
            sample_normal(&mut self.rng, mean, prec)
        };
        let rt_id = state.add_cluster(tjk, metabolite_id);
        self.top.attach_rt_cluster(metabolite_id, tjk);
        (rt_id, metabolite_id)
    }

    /// Resample every RT cluster value, every metabolite RT mean and every mass cluster mean
    #[tracing::instrument(skip_all, level = "trace")]
    fn update_parameters(&mut self) {
        let params = self.params;
        let mut shifts: Vec<(MetaboliteId, f64)> = Vec::new();
        for state in self.files.iter_mut() {
            let is_reference = params.is_reference_file(state.file);
            for (_, cluster) in state.iter_mut() {
                let ti = match self.top.stats(cluster.metabolite) {
                    Some(stats) => stats.rt,
                    None => panic!("Metabolite {} does not exist", cluster.metabolite),
                };
                let tjk = if is_reference {
                    ti
                } else {
                    let (mean, prec) = normal_posterior(
                        ti,
                        params.delta_prec,
                        cluster.rt_sum,
                        cluster.count,
                        params.gamma_prec,
                    );
                    sample_normal(&mut self.rng, mean, prec)
                };
                shifts.push((cluster.metabolite, tjk - cluster.rt));
                cluster.rt = tjk;
            }
        }
        for (id, delta) in shifts.drain(..) {
            self.top.shift_rt_cluster_sum(id, delta);
        }

        for (_, entry) in self.top.iter_mut() {
            let (mean, prec) = normal_posterior(
                params.mu_0,
                params.sigma_0_prec,
                entry.stats.rt_cluster_sum,
                entry.stats.rt_cluster_count,
                params.delta_prec,
            );
            entry.stats.rt = sample_normal(&mut self.rng, mean, prec);
            entry.metabolite.update_thetas(&self.peaks);
        }

        // Keep the reference file pinned to the freshly drawn metabolite means
        if let Some(reference) = params.reference_file {
            for state in self.files.iter_mut().filter(|s| s.file == reference) {
                for (_, cluster) in state.iter_mut() {
                    if let Some(stats) = self.top.stats(cluster.metabolite) {
                        shifts.push((cluster.metabolite, stats.rt - cluster.rt));
                        cluster.rt = stats.rt;
                    }
                }
            }
            for (id, delta) in shifts.drain(..) {
                self.top.shift_rt_cluster_sum(id, delta);
            }
        }
    }

    /// Capture the current metabolite / mass cluster hierarchy
    pub fn snapshot(&self) -> HdpSample {
        let metabolites = self
            .top
            .iter()
            .map(|(id, entry)| SampledMetabolite {
                id: *id,
                rt: entry.stats.rt,
                mass_clusters: entry
                    .metabolite
                    .mass_clusters()
                    .iter()
                    .map(|c| SampledMassCluster {
                        id: c.id,
                        theta: c.theta,
                        peaks: c.members().iter().copied().collect(),
                    })
                    .collect(),
            })
            .collect();
        HdpSample {
            index: self.sweeps_done.saturating_sub(1),
            metabolites,
            excluded: self.excluded.iter().copied().collect(),
        }
    }

    /// Verify the whole hierarchy is consistent
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let mut tallies: HashMap<MetaboliteId, (usize, f64), BuildIdentityHasher<MetaboliteId>> =
            HashMap::default();
        for state in self.files.iter() {
            state.check_invariants(&self.peaks)?;
            for (id, cluster) in state.iter() {
                if !self.top.contains(cluster.metabolite) {
                    return Err(InvariantViolation::UnknownMetabolite(
                        state.file,
                        id,
                        cluster.metabolite,
                    ));
                }
                let tally = tallies.entry(cluster.metabolite).or_default();
                tally.0 += 1;
                tally.1 += cluster.rt;
            }
        }

        for (id, entry) in self.top.iter() {
            if entry.metabolite.is_empty() {
                return Err(InvariantViolation::EmptyMetabolite(*id));
            }
            let (count, sum) = tallies.get(id).copied().unwrap_or_default();
            if count != entry.stats.rt_cluster_count {
                return Err(InvariantViolation::RtClusterTally {
                    metabolite: *id,
                    stored: entry.stats.rt_cluster_count,
                    actual: count,
                });
            }
            let tolerance = 1e-6 * sum.abs().max(1.0);
            if (sum - entry.stats.rt_cluster_sum).abs() > tolerance {
                return Err(InvariantViolation::RtClusterSumDrift {
                    metabolite: *id,
                    stored: entry.stats.rt_cluster_sum,
                    expected: sum,
                });
            }
            entry.metabolite.check_invariants(&self.peaks)?;
        }

        for state in self.files.iter() {
            for pid in state.peaks() {
                let peak = &self.peaks[pid.0];
                let assigned = state.assignment(peak.index);
                if self.excluded.contains(pid) {
                    if assigned.is_some() {
                        return Err(InvariantViolation::ExcludedPeakAssigned(*pid));
                    }
                    continue;
                }
                let Some(rt_id) = assigned else {
                    return Err(InvariantViolation::UnassignedPeak(*pid));
                };
                let metabolite_id = match state.metabolite_of(rt_id) {
                    Some(m) => m,
                    None => return Err(InvariantViolation::DanglingRtCluster(state.file, rt_id)),
                };
                let held = self
                    .top
                    .metabolite(metabolite_id)
                    .is_some_and(|m| m.mass_cluster_of(*pid).is_some());
                if !held {
                    return Err(InvariantViolation::PeakOutsideMetabolite(*pid, metabolite_id));
                }
            }
        }

        let actual = self.top.total_peaks();
        if actual + self.excluded.len() != self.peaks.len() {
            return Err(InvariantViolation::PeakCountMismatch {
                expected: self.peaks.len(),
                actual,
                excluded: self.excluded.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn two_file_sampler(seed: u64) -> HdpMassRtSampler {
        let files = vec![
            InputFile::new(FileId(0), vec![Peak::new(300.0, 100.0, 1e4)]),
            InputFile::new(FileId(1), vec![Peak::new(300.0, 100.0, 1e4)]),
        ];
        let settings = HdpSettings::default().with_samples(10, 2).with_seed(seed);
        HdpMassRtSampler::from_settings(files, &settings).unwrap()
    }

    #[test_log::test]
    fn test_initialize() {
        let mut sampler = two_file_sampler(1);
        assert_eq!(sampler.state(), SamplerState::Uninitialized);
        sampler.initialize();
        assert_eq!(sampler.state(), SamplerState::Initialized);
        assert_eq!(sampler.top_level().len(), 1);
        let (_, entry) = sampler.top_level().iter().next().unwrap();
        assert_eq!(entry.stats.rt_cluster_count, 2);
        assert_eq!(entry.metabolite.mass_clusters().len(), 1);
        assert_eq!(entry.metabolite.len(), 2);
        for state in sampler.file_states() {
            assert_eq!(state.cluster_count(), 1);
        }
        sampler.check_invariants().unwrap();
    }

    #[test_log::test]
    fn test_removal_cascade() {
        let mut sampler = two_file_sampler(3);
        sampler.initialize();
        let peak = sampler.peaks()[1];

        // Taking the file 1 peak out leaves the shared metabolite alive
        let outcome = sampler.remove_peak_from_model(1, &peak);
        assert!(outcome.rt_cluster_removed);
        assert!(!outcome.mass_cluster_removed);
        assert!(!outcome.metabolite_removed);
        assert_eq!(sampler.top_level().len(), 1);

        // Put it back alone in a new metabolite
        let metabolite_id = sampler.top.create_metabolite(100.0);
        let rt_id = sampler.files[1].add_cluster(100.0, metabolite_id);
        sampler.top.attach_rt_cluster(metabolite_id, 100.0);
        let metabolite = sampler.top.metabolite_mut(metabolite_id).unwrap();
        let position = metabolite.add_mass_cluster(peak.mass_log);
        metabolite.add_peak(&peak, position);
        sampler.files[1].add_peak(&peak, rt_id);
        sampler.check_invariants().unwrap();
        assert_eq!(sampler.top_level().len(), 2);

        let outcome = sampler.remove_peak_from_model(1, &peak);
        assert_eq!(
            outcome,
            RemovalOutcome {
                mass_cluster_removed: true,
                rt_cluster_removed: true,
                metabolite_removed: true,
            }
        );
        assert_eq!(sampler.top_level().len(), 1);
        assert!(!sampler.top_level().contains(metabolite_id));
        assert_eq!(sampler.file_states()[1].cluster_count(), 0);

        // The other file still points at a live metabolite
        let other = sampler.metabolite_of(PeakId(0)).unwrap();
        assert!(sampler.top_level().contains(other));
        assert_eq!(sampler.metabolite_of(PeakId(1)), None);
        assert_eq!(sampler.metabolite_of(PeakId(99)), None);

        // Every remaining reference and tally is consistent; only the removed peak is unaccounted for
        assert_eq!(
            sampler.check_invariants(),
            Err(InvariantViolation::UnassignedPeak(PeakId(1)))
        );
        sampler.excluded.insert(PeakId(1));
        sampler.check_invariants().unwrap();
    }

    #[test_log::test]
    fn test_singleton_streak() {
        let mut sampler = two_file_sampler(5);
        sampler.params.speed_up = true;
        sampler.params.speed_up_num_sample = 2;
        assert!(!sampler.track_singleton_streak(PeakId(0), true));
        assert!(!sampler.track_singleton_streak(PeakId(0), true));
        assert!(!sampler.track_singleton_streak(PeakId(0), false));
        assert!(!sampler.track_singleton_streak(PeakId(0), true));
        assert!(!sampler.track_singleton_streak(PeakId(0), true));
        assert!(sampler.track_singleton_streak(PeakId(0), true));
    }

    #[test_log::test]
    fn test_step_until_done() {
        let mut sampler = two_file_sampler(7);
        let mut n = 0;
        while let Some(report) = sampler.step() {
            assert_eq!(report.index, n);
            assert_eq!(report.is_burn_in, n < 2);
            assert_eq!(report.peaks_processed, 2);
            n += 1;
        }
        assert_eq!(n, 10);
        assert_eq!(sampler.state(), SamplerState::Done);
        assert!(sampler.step().is_none());
    }

    #[test_log::test]
    fn test_reference_file_pinned() {
        let files = vec![
            InputFile::new(
                FileId(0),
                vec![Peak::new(300.0, 100.0, 1e4), Peak::new(410.0, 250.0, 1e4)],
            ),
            InputFile::new(
                FileId(1),
                vec![Peak::new(300.0, 103.0, 1e4), Peak::new(410.0, 255.0, 1e4)],
            ),
        ];
        let settings = HdpSettings::default()
            .with_samples(20, 5)
            .with_seed(13)
            .with_reference_file(0);
        let mut sampler = HdpMassRtSampler::from_settings(files, &settings).unwrap();
        while sampler.step().is_some() {
            let top = sampler.top_level();
            for (_, cluster) in sampler.file_states()[0].iter() {
                let ti = top.stats(cluster.metabolite).unwrap().rt;
                assert_eq!(cluster.rt, ti);
            }
        }
    }
}
