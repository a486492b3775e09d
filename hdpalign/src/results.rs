//! Collecting sampler snapshots and turning them into co-occurrence probabilities.
use std::collections::HashMap;

use tracing::trace;

use crate::peaks::PeakId;
use crate::sample::{HdpAllSamples, HdpSample};
use crate::sampler::SweepReport;

/// Receives the snapshot taken after every sweep
pub trait SampleCollector {
    fn collect(&mut self, report: &SweepReport, sample: HdpSample);
}

/// Keep every snapshot, burn-in included
impl SampleCollector for Vec<HdpSample> {
    fn collect(&mut self, _report: &SweepReport, sample: HdpSample) {
        self.push(sample);
    }
}

/// Stores snapshots once the burn-in has passed
#[derive(Debug, Default, Clone)]
pub struct SampleHandler {
    pub burn_in: usize,
    samples: HdpAllSamples,
    seen: usize,
}

impl SampleHandler {
    pub fn new(burn_in: usize) -> Self {
        Self {
            burn_in,
            samples: HdpAllSamples::new(),
            seen: 0,
        }
    }

    /// Store `sample` if it was drawn after the burn-in
    pub fn store_sample(&mut self, sample: HdpSample) -> bool {
        self.seen += 1;
        if sample.index + 1 > self.burn_in {
            trace!(
                "Storing sample {} with {} metabolites",
                sample.index,
                sample.metabolite_count()
            );
            self.samples.push(sample);
            true
        } else {
            trace!("Discarding burn-in sample {}", sample.index);
            false
        }
    }

    /// The number of snapshots received, stored or not
    pub fn seen(&self) -> usize {
        self.seen
    }

    pub fn samples(&self) -> &HdpAllSamples {
        &self.samples
    }

    pub fn into_samples(self) -> HdpAllSamples {
        self.samples
    }
}

impl SampleCollector for SampleHandler {
    fn collect(&mut self, _report: &SweepReport, sample: HdpSample) {
        self.store_sample(sample);
    }
}

/// A group of peaks that shared a mass cluster, and how often they did
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AlignedPeakSet {
    pub peaks: Vec<PeakId>,
    pub count: usize,
    pub probability: f64,
}

/// Tallies how often each exact set of peaks forms a mass cluster across samples
#[derive(Debug, Default, Clone)]
pub struct AlignmentResults {
    samples_taken: usize,
    tallies: HashMap<Vec<PeakId>, usize>,
}

impl AlignmentResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_samples(samples: &HdpAllSamples) -> Self {
        let mut this = Self::new();
        for sample in samples.iter() {
            this.add_sample(sample);
        }
        this
    }

    pub fn add_sample(&mut self, sample: &HdpSample) {
        self.samples_taken += 1;
        for mut set in sample.peak_sets() {
            set.sort_unstable();
            *self.tallies.entry(set).or_default() += 1;
        }
    }

    pub fn samples_taken(&self) -> usize {
        self.samples_taken
    }

    pub fn len(&self) -> usize {
        self.tallies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tallies.is_empty()
    }

    /// The fraction of samples in which exactly `peaks` formed a mass cluster
    pub fn set_probability(&self, peaks: &[PeakId]) -> f64 {
        if self.samples_taken == 0 {
            return 0.0;
        }
        let mut key = peaks.to_vec();
        key.sort();
        self.tallies.get(&key).copied().unwrap_or_default() as f64 / self.samples_taken as f64
    }

    /// The fraction of samples in which `a` and `b` shared a mass cluster
    pub fn pair_probability(&self, a: PeakId, b: PeakId) -> f64 {
        if self.samples_taken == 0 {
            return 0.0;
        }
        let together: usize = self
            .tallies
            .iter()
            .filter(|(set, _)| set.binary_search(&a).is_ok() && set.binary_search(&b).is_ok())
            .map(|(_, n)| *n)
            .sum();
        together as f64 / self.samples_taken as f64
    }

    /// Every observed peak set with its probability, most probable first
    pub fn aligned_sets(&self) -> Vec<AlignedPeakSet> {
        let mut sets: Vec<AlignedPeakSet> = self
            .tallies
            .iter()
            .map(|(peaks, count)| AlignedPeakSet {
                peaks: peaks.clone(),
                count: *count,
                probability: *count as f64 / self.samples_taken as f64,
            })
            .collect();
        sets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.peaks.cmp(&b.peaks)));
        sets
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mass_cluster::MassClusterId;
    use crate::metabolite::MetaboliteId;
    use crate::sample::{SampledMassCluster, SampledMetabolite};

    fn sample(index: usize, groups: &[&[usize]]) -> HdpSample {
        HdpSample {
            index,
            metabolites: vec![SampledMetabolite {
                id: MetaboliteId(0),
                rt: 0.0,
                mass_clusters: groups
                    .iter()
                    .enumerate()
                    .map(|(i, g)| SampledMassCluster {
                        id: MassClusterId(i),
                        theta: 0.0,
                        peaks: g.iter().map(|p| PeakId(*p)).collect(),
                    })
                    .collect(),
            }],
            excluded: Vec::new(),
        }
    }

    #[test]
    fn test_burn_in() {
        let mut handler = SampleHandler::new(2);
        for i in 0..5 {
            handler.store_sample(sample(i, &[&[0, 1]]));
        }
        assert_eq!(handler.seen(), 5);
        assert_eq!(handler.samples().len(), 3);
        assert_eq!(handler.samples().samples[0].index, 2);
    }

    #[test]
    fn test_probabilities() {
        let mut samples = HdpAllSamples::new();
        samples.push(sample(0, &[&[0, 1], &[2]]));
        samples.push(sample(1, &[&[0, 1, 2]]));
        samples.push(sample(2, &[&[0], &[1], &[2]]));
        samples.push(sample(3, &[&[0, 1], &[2]]));
        let mut last = sample(4, &[&[1]]);
        last.excluded = vec![PeakId(0), PeakId(2)];
        samples.push(last);

        let results = AlignmentResults::from_samples(&samples);
        assert_eq!(results.samples_taken(), 5);
        assert!((results.set_probability(&[PeakId(1), PeakId(0)]) - 0.4).abs() < 1e-12);
        assert!((results.pair_probability(PeakId(0), PeakId(1)) - 0.6).abs() < 1e-12);
        assert!((results.set_probability(&[PeakId(2)]) - 0.8).abs() < 1e-12);

        let sets = results.aligned_sets();
        assert_eq!(sets[0].count, 4);
        assert_eq!(sets[0].peaks, vec![PeakId(2)]);
    }

    #[test]
    fn test_unordered_members() {
        let mut samples = HdpAllSamples::new();
        samples.push(sample(0, &[&[2, 0, 1]]));
        samples.push(sample(1, &[&[0, 1, 2]]));
        samples.push(sample(2, &[&[1, 0], &[2]]));

        let results = AlignmentResults::from_samples(&samples);
        assert_eq!(results.len(), 3);
        assert!((results.set_probability(&[PeakId(0), PeakId(1), PeakId(2)]) - 2.0 / 3.0).abs() < 1e-12);
        assert!((results.pair_probability(PeakId(0), PeakId(1)) - 1.0).abs() < 1e-12);
        assert!((results.pair_probability(PeakId(0), PeakId(2)) - 2.0 / 3.0).abs() < 1e-12);
        assert!(samples.samples[0].co_clustered(PeakId(2), PeakId(0)));

        let sets = results.aligned_sets();
        assert_eq!(sets[0].count, 2);
        assert_eq!(sets[0].peaks, vec![PeakId(0), PeakId(1), PeakId(2)]);
    }
}
