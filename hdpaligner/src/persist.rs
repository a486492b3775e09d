use std::fs;
use std::io::{self, prelude::*, BufReader, BufWriter};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{info, warn};

use hdpalign::{AlignmentResults, HdpAllSamples, Peak, PeakId};

use crate::driver::HdpAlignerError;

fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// Open `path` for reading, decompressing it if it ends in `.gz`
pub fn open_reader(path: &Path) -> io::Result<Box<dyn Read>> {
    let handle = BufReader::new(fs::File::open(path)?);
    if is_gzip(path) {
        Ok(Box::new(MultiGzDecoder::new(handle)))
    } else {
        Ok(Box::new(handle))
    }
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, HdpAlignerError> {
    let reader = open_reader(path)?;
    let value = serde_json::from_reader(reader)?;
    Ok(value)
}

/// Write `value` as JSON to `path`, gzip-compressing it if the path ends in `.gz`
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), HdpAlignerError> {
    let handle = BufWriter::new(fs::File::create(path)?);
    if is_gzip(path) {
        let mut writer = GzEncoder::new(handle, Compression::default());
        serde_json::to_writer(&mut writer, value)?;
        writer.finish()?.flush()?;
    } else {
        let mut writer = handle;
        serde_json::to_writer(&mut writer, value)?;
        writer.flush()?;
    }
    Ok(())
}

/// Load previously persisted samples from `path`.
///
/// Returns `None` when the file does not exist or cannot be read as samples, in which case
/// the caller should sample afresh.
pub fn load_samples(path: &Path) -> Option<HdpAllSamples> {
    if !path.exists() {
        return None;
    }
    match read_json::<HdpAllSamples>(path) {
        Ok(samples) => {
            info!("Loaded {} samples from {}", samples.len(), path.display());
            Some(samples)
        }
        Err(e) => {
            warn!("Failed to load samples from {}: {e}", path.display());
            None
        }
    }
}

pub fn persist_samples(path: &Path, samples: &HdpAllSamples) -> Result<(), HdpAlignerError> {
    write_json(path, samples)?;
    info!("Saved {} samples to {}", samples.len(), path.display());
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedPeakRecord {
    pub id: PeakId,
    pub file: usize,
    pub index: usize,
    pub mass: f64,
    pub rt: f64,
    pub intensity: f32,
}

impl From<&Peak> for AlignedPeakRecord {
    fn from(peak: &Peak) -> Self {
        Self {
            id: peak.id,
            file: peak.file.0,
            index: peak.index,
            mass: peak.mass,
            rt: peak.rt,
            intensity: peak.intensity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedSetRecord {
    pub probability: f64,
    pub count: usize,
    pub peaks: Vec<AlignedPeakRecord>,
}

/// The aggregated co-occurrence probabilities of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentReport {
    pub samples_taken: usize,
    pub sets: Vec<AlignedSetRecord>,
}

impl AlignmentReport {
    /// Resolve the peak ids in `results` against `peaks`, which is indexed by sequence id
    pub fn new(results: &AlignmentResults, peaks: &[Peak]) -> Self {
        let sets = results
            .aligned_sets()
            .into_iter()
            .map(|set| AlignedSetRecord {
                probability: set.probability,
                count: set.count,
                peaks: set
                    .peaks
                    .iter()
                    .filter_map(|id| peaks.get(id.0))
                    .map(AlignedPeakRecord::from)
                    .collect(),
            })
            .collect();
        Self {
            samples_taken: results.samples_taken(),
            sets,
        }
    }
}

pub fn write_alignment(path: &Path, report: &AlignmentReport) -> Result<(), HdpAlignerError> {
    write_json(path, report)?;
    info!("Wrote {} aligned peak sets to {}", report.sets.len(), path.display());
    Ok(())
}
