use std::path::Path;

use serde::{Deserialize, Serialize};

use hdpalign::{assign_sequence_ids, FileId, InputFile, Peak};

use crate::driver::HdpAlignerError;
use crate::persist::read_json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakRecord {
    pub mass: f64,
    pub rt: f64,
    #[serde(default)]
    pub intensity: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakListRecord {
    #[serde(default)]
    pub name: Option<String>,
    pub peaks: Vec<PeakRecord>,
}

/// A minimal peak list interchange document: an ordered list of runs, each an ordered list
/// of peaks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakListDocument {
    pub files: Vec<PeakListRecord>,
}

impl PeakListDocument {
    /// Convert to sampler input files with sequence ids assigned
    pub fn into_input_files(self) -> Vec<InputFile> {
        let mut files: Vec<InputFile> = self
            .files
            .into_iter()
            .enumerate()
            .map(|(i, f)| {
                InputFile::new(
                    FileId(i),
                    f.peaks
                        .into_iter()
                        .map(|p| Peak::new(p.mass, p.rt, p.intensity))
                        .collect(),
                )
            })
            .collect();
        assign_sequence_ids(&mut files);
        files
    }
}

/// Read the peak lists at `path`
pub fn load_input(path: &Path) -> Result<Vec<InputFile>, HdpAlignerError> {
    let document: PeakListDocument = read_json(path)?;
    for (i, f) in document.files.iter().enumerate() {
        tracing::debug!(
            "File {i} ({}) holds {} peaks",
            f.name.as_deref().unwrap_or("unnamed"),
            f.peaks.len()
        );
    }
    Ok(document.into_input_files())
}
