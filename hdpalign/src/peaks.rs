//! Peak and input file records consumed by the sampler.
use std::fmt::Display;
use std::hash::Hash;

use identity_hash::IdentityHashable;

/// A globally unique, contiguous sequence number for a peak across all input files.
///
/// Sequence ids are assigned once in file order then peak order by [`assign_sequence_ids`],
/// and double as the peak's index into the sampler's peak table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeakId(pub usize);

impl Hash for PeakId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_usize(self.0);
    }
}

impl IdentityHashable for PeakId {}

impl Display for PeakId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The position of an input file (a single LC-MS run) in the ordered list of inputs
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FileId(pub usize);

impl Hash for FileId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_usize(self.0);
    }
}

impl IdentityHashable for FileId {}

impl Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A chromatographic peak detected in a single run.
///
/// The sampler never mutates a peak. `aligned` is owned by callers that post-process
/// the alignment results.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Peak {
    /// The sequence id, valid after [`assign_sequence_ids`]
    pub id: PeakId,
    /// The file this peak was detected in
    pub file: FileId,
    /// The position of this peak within its file
    pub index: usize,
    pub mass: f64,
    /// The natural logarithm of `mass`, the coordinate the mass clusters model
    pub mass_log: f64,
    /// The retention time
    pub rt: f64,
    pub intensity: f32,
    pub aligned: bool,
}

impl Peak {
    pub fn new(mass: f64, rt: f64, intensity: f32) -> Self {
        Self {
            id: PeakId::default(),
            file: FileId::default(),
            index: 0,
            mass,
            mass_log: mass.ln(),
            rt,
            intensity,
            aligned: false,
        }
    }
}

/// An ordered collection of peaks from one LC-MS run
#[derive(Debug, Default, Clone, PartialEq)]
pub struct InputFile {
    pub id: FileId,
    pub peaks: Vec<Peak>,
}

impl InputFile {
    /// Create a new file, stamping each peak with its file id and position
    pub fn new(id: FileId, peaks: Vec<Peak>) -> Self {
        let mut this = Self { id, peaks };
        for (i, p) in this.peaks.iter_mut().enumerate() {
            p.file = id;
            p.index = i;
        }
        this
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Peak> {
        self.peaks.iter()
    }
}

/// Assign contiguous sequence ids to all peaks across `files`, in file order then peak order.
///
/// Returns the total number of peaks.
pub fn assign_sequence_ids(files: &mut [InputFile]) -> usize {
    let mut sequence_id = 0;
    for file in files.iter_mut() {
        let file_id = file.id;
        for (i, p) in file.peaks.iter_mut().enumerate() {
            p.id = PeakId(sequence_id);
            p.file = file_id;
            p.index = i;
            sequence_id += 1;
        }
    }
    sequence_id
}

/// The mean retention time of every peak in `files`
pub fn mean_rt(files: &[InputFile]) -> f64 {
    let (sum, count) = files
        .iter()
        .flat_map(|f| f.iter())
        .fold((0.0, 0usize), |(s, n), p| (s + p.rt, n + 1));
    sum / count as f64
}

/// The log of the mean mass of every peak in `files`
pub fn log_mean_mass(files: &[InputFile]) -> f64 {
    let (sum, count) = files
        .iter()
        .flat_map(|f| f.iter())
        .fold((0.0, 0usize), |(s, n), p| (s + p.mass_log.exp(), n + 1));
    (sum / count as f64).ln()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sequence_ids() {
        let mut files = vec![
            InputFile::new(
                FileId(0),
                vec![Peak::new(100.0, 10.0, 1.0), Peak::new(200.0, 20.0, 1.0)],
            ),
            InputFile::new(FileId(1), vec![Peak::new(300.0, 30.0, 1.0)]),
        ];
        let total = assign_sequence_ids(&mut files);
        assert_eq!(total, 3);
        let ids: Vec<_> = files.iter().flat_map(|f| f.iter()).map(|p| p.id).collect();
        assert_eq!(ids, vec![PeakId(0), PeakId(1), PeakId(2)]);
        assert_eq!(files[1].peaks[0].file, FileId(1));
        assert_eq!(files[0].peaks[1].index, 1);
    }

    #[test]
    fn test_means() {
        let files = vec![InputFile::new(
            FileId(0),
            vec![Peak::new(100.0, 10.0, 1.0), Peak::new(300.0, 30.0, 1.0)],
        )];
        assert!((mean_rt(&files) - 20.0).abs() < 1e-12);
        assert!((log_mean_mass(&files) - 200.0f64.ln()).abs() < 1e-12);
    }
}
