use std::io;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender};
use thiserror::Error;
use tracing::{info, warn};

use hdpalign::{
    AlignmentResults, HdpAllSamples, HdpMassRtSampler, HdpParams, HdpSample, InputFile,
    ParameterError, SampleCollector, SampleHandler, SweepReport,
};

use crate::config::AlignerConfig;
use crate::input::load_input;
use crate::persist::{load_samples, persist_samples, write_alignment, AlignmentReport};
use crate::progress::SweepProgress;

#[derive(Debug, Error)]
pub enum HdpAlignerError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("Failed to read or write JSON: {0}")]
    JSONError(
        #[source]
        #[from]
        serde_json::Error,
    ),
    #[error("Failed to read the configuration: {0}")]
    ConfigurationError(
        #[source]
        #[from]
        figment::Error,
    ),
    #[error("Invalid sampler parameters: {0}")]
    ParameterError(
        #[source]
        #[from]
        ParameterError,
    ),
    #[error("Failed to configure logging: {0}")]
    LoggingError(String),
    #[error("The {0} task failed to complete")]
    TaskFailed(&'static str),
}

/// Forwards every sweep's snapshot to the collector thread
struct ChannelCollector {
    sender: Sender<(SweepReport, HdpSample)>,
    progress: SweepProgress,
    disconnected: bool,
}

impl ChannelCollector {
    fn new(sender: Sender<(SweepReport, HdpSample)>) -> Self {
        Self {
            sender,
            progress: SweepProgress::default(),
            disconnected: false,
        }
    }
}

impl SampleCollector for ChannelCollector {
    fn collect(&mut self, report: &SweepReport, sample: HdpSample) {
        self.progress += report;
        if self.disconnected {
            return;
        }
        if self.sender.send((*report, sample)).is_err() {
            warn!("Sample collector hung up after sample {}", report.index);
            self.disconnected = true;
        }
    }
}

fn collect_samples(
    receiver: Receiver<(SweepReport, HdpSample)>,
    burn_in: usize,
) -> HdpAllSamples {
    let mut handler = SampleHandler::new(burn_in);
    for (report, sample) in receiver.iter() {
        handler.collect(&report, sample);
    }
    handler.into_samples()
}

/// Runs the sampler over a peak list and aggregates its samples
#[derive(Debug, Clone)]
pub struct HdpAligner {
    pub config: AlignerConfig,
}

impl HdpAligner {
    pub fn new(config: AlignerConfig) -> Self {
        Self { config }
    }

    pub fn main(&self) -> Result<(), HdpAlignerError> {
        info!("hdpaligner v{}", env!("CARGO_PKG_VERSION"));
        info!("Input: {}", self.config.input_file.display());
        if let Some(path) = self.config.output_file.as_ref() {
            info!("Output: {}", path.display());
        }

        let files = load_input(&self.config.input_file)?;
        let peaks: Vec<_> = files.iter().flat_map(|f| f.peaks.iter().copied()).collect();
        info!("Loaded {} peaks from {} files", peaks.len(), files.len());

        let samples = match self
            .config
            .results_file
            .as_deref()
            .and_then(load_samples)
        {
            Some(samples) => samples,
            None => {
                let samples = self.sample(files)?;
                if let Some(path) = self.config.results_file.as_deref() {
                    persist_samples(path, &samples)?;
                }
                samples
            }
        };

        let results = AlignmentResults::from_samples(&samples);
        info!(
            "Tallied {} peak sets over {} samples",
            results.len(),
            results.samples_taken()
        );
        if let Some(path) = self.config.output_file.as_deref() {
            write_alignment(path, &AlignmentReport::new(&results, &peaks))?;
        }
        Ok(())
    }

    /// Draw samples on one thread while a second stores them past the burn-in
    pub fn sample(&self, files: Vec<InputFile>) -> Result<HdpAllSamples, HdpAlignerError> {
        let settings = &self.config.sampler;
        let params = HdpParams::from_settings(&files, settings)?;
        info!(
            "Drawing {} samples with a burn-in of {}",
            params.n_samples, params.burn_in
        );
        let (sender, receiver) = bounded(self.config.sample_buffer_size.max(1));

        let start = Instant::now();
        let sample_task = thread::spawn(move || {
            let mut sampler = HdpMassRtSampler::new(files, params);
            let mut collector = ChannelCollector::new(sender);
            sampler.run(&mut collector);
            collector.progress
        });
        let burn_in = params.burn_in;
        let collect_task = thread::spawn(move || collect_samples(receiver, burn_in));

        match sample_task.join() {
            Ok(progress) => {
                info!(
                    "Sweeps: {} ({} burn-in) | Peaks Processed: {}",
                    progress.sweeps, progress.burn_in_sweeps, progress.peaks_processed
                );
                info!(
                    "Mean Metabolites: {:0.2} | Mean Mass Clusters: {:0.2} | Excluded Peaks: {}",
                    progress.mean_metabolites(),
                    progress.mean_mass_clusters(),
                    progress.excluded
                );
            }
            Err(e) => {
                warn!("Failed to join sampler task: {e:?}");
                return Err(HdpAlignerError::TaskFailed("sampler"));
            }
        }

        let samples = match collect_task.join() {
            Ok(samples) => samples,
            Err(e) => {
                warn!("Failed to join collector task: {e:?}");
                return Err(HdpAlignerError::TaskFailed("collector"));
            }
        };
        info!("Total Elapsed Time: {:0.3?}", start.elapsed());
        Ok(samples)
    }
}
