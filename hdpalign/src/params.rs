//! Sampler settings and the numeric hyperparameters derived from them and the input data.
use std::collections::HashSet;

use thiserror::Error;

use crate::peaks::{log_mean_mass, mean_rt, FileId, InputFile};

/// The prior precision on both the metabolite RT mean and the mass cluster mean
pub const WEAK_PRIOR_PRECISION: f64 = 1.0 / 5e6;

/// Convert a parts-per-million mass tolerance into a precision over log-mass.
///
/// Two standard deviations span the tolerance window.
pub fn mass_precision_from_ppm(ppm: f64) -> f64 {
    let log_one_ppm = (1000001.0f64).ln() - (1000000.0f64).ln();
    let stdev = log_one_ppm * ppm / 2.0;
    1.0 / (stdev * stdev)
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterError {
    #[error("{0} must be positive and finite, got {1}")]
    NotPositive(&'static str, f64),
    #[error("At least one sample must be drawn")]
    NoSamples,
    #[error("The burn-in ({burn_in}) must be less than the number of samples ({n_samples})")]
    BurnInTooLong { burn_in: usize, n_samples: usize },
    #[error("The speed-up streak threshold must be at least 1")]
    ZeroSpeedUpThreshold,
    #[error("Reference file {0} is out of range for {1} input files")]
    ReferenceFileOutOfRange(usize, usize),
    #[error("No input peaks were provided")]
    NoPeaks,
    #[error("File id {0} is used by more than one input file")]
    DuplicateFileId(FileId),
}

/// The user-facing sampler settings.
///
/// Standard deviations and the ppm tolerance are converted to precisions by
/// [`HdpParams::from_settings`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct HdpSettings {
    /// The total number of sweeps to run
    pub n_samples: usize,
    /// The number of leading sweeps discarded by the sample collector
    pub burn_in: usize,
    /// The concentration of the RT cluster DP within each file
    pub alpha_rt: f64,
    /// The concentration of the mass cluster DP within each metabolite
    pub alpha_mass: f64,
    /// The concentration of the top-level metabolite DP
    pub top_alpha: f64,
    /// The spread of RT cluster values around their metabolite's RT mean
    pub global_rt_cluster_stdev: f64,
    /// The spread of peak RTs around their RT cluster's value
    pub local_rt_cluster_stdev: f64,
    pub mass_tolerance_ppm: f64,
    /// Whether to permanently exclude peaks that stay alone in their mass cluster
    pub speed_up: bool,
    /// The singleton streak length after which a peak is excluded
    pub speed_up_num_sample: usize,
    /// A file whose RT clusters are pinned to their metabolite's RT mean
    pub reference_file: Option<usize>,
    /// The random seed. When absent the generator is seeded from entropy.
    pub seed: Option<u64>,
}

impl Default for HdpSettings {
    fn default() -> Self {
        Self {
            n_samples: 200,
            burn_in: 100,
            alpha_rt: 10.0,
            alpha_mass: 100.0,
            top_alpha: 10.0,
            global_rt_cluster_stdev: 20.0,
            local_rt_cluster_stdev: 2.0,
            mass_tolerance_ppm: 2.0,
            speed_up: false,
            speed_up_num_sample: 100,
            reference_file: None,
            seed: None,
        }
    }
}

impl HdpSettings {
    pub fn with_samples(mut self, n_samples: usize, burn_in: usize) -> Self {
        self.n_samples = n_samples;
        self.burn_in = burn_in;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_speed_up(mut self, speed_up_num_sample: usize) -> Self {
        self.speed_up = true;
        self.speed_up_num_sample = speed_up_num_sample;
        self
    }

    pub fn with_reference_file(mut self, reference_file: usize) -> Self {
        self.reference_file = Some(reference_file);
        self
    }
}

/// The numeric hyperparameters the sampler runs with.
///
/// All spreads are stored as precisions (inverse variances).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HdpParams {
    /// The prior mean of metabolite RTs, the mean RT of all peaks
    pub mu_0: f64,
    pub sigma_0_prec: f64,
    /// The prior mean of mass cluster log-masses, the log of the mean mass of all peaks
    pub psi_0: f64,
    pub rho_0_prec: f64,
    /// RT cluster around metabolite precision
    pub delta_prec: f64,
    /// Peak around RT cluster precision
    pub gamma_prec: f64,
    /// Peak log-mass around mass cluster precision
    pub rho_prec: f64,
    pub alpha_rt: f64,
    pub alpha_mass: f64,
    pub top_alpha: f64,
    pub n_samples: usize,
    pub burn_in: usize,
    pub speed_up: bool,
    pub speed_up_num_sample: usize,
    pub reference_file: Option<FileId>,
    pub seed: Option<u64>,
}

fn check_positive(name: &'static str, value: f64) -> Result<f64, ParameterError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ParameterError::NotPositive(name, value))
    }
}

impl HdpParams {
    /// Derive and validate the sampler hyperparameters for `files` from `settings`.
    ///
    /// # Arguments
    /// - `files`: The input files the sampler will run over. Used to compute `mu_0` and `psi_0`.
    /// - `settings`: The user-facing settings
    pub fn from_settings(
        files: &[InputFile],
        settings: &HdpSettings,
    ) -> Result<Self, ParameterError> {
        if files.iter().all(|f| f.is_empty()) {
            return Err(ParameterError::NoPeaks);
        }
        let mut seen_files = HashSet::with_capacity(files.len());
        if let Some(dup) = files.iter().find(|f| !seen_files.insert(f.id)) {
            return Err(ParameterError::DuplicateFileId(dup.id));
        }
        if settings.n_samples == 0 {
            return Err(ParameterError::NoSamples);
        }
        if settings.burn_in >= settings.n_samples {
            return Err(ParameterError::BurnInTooLong {
                burn_in: settings.burn_in,
                n_samples: settings.n_samples,
            });
        }
        if settings.speed_up && settings.speed_up_num_sample == 0 {
            return Err(ParameterError::ZeroSpeedUpThreshold);
        }
        let reference_file = match settings.reference_file {
            Some(i) if i >= files.len() => {
                return Err(ParameterError::ReferenceFileOutOfRange(i, files.len()))
            }
            Some(i) => Some(files[i].id),
            None => None,
        };

        let global_stdev = check_positive("global_rt_cluster_stdev", settings.global_rt_cluster_stdev)?;
        let local_stdev = check_positive("local_rt_cluster_stdev", settings.local_rt_cluster_stdev)?;
        let ppm = check_positive("mass_tolerance_ppm", settings.mass_tolerance_ppm)?;

        let mu_0 = mean_rt(files);
        let psi_0 = log_mean_mass(files);
        if !mu_0.is_finite() {
            return Err(ParameterError::NotPositive("mean retention time", mu_0));
        }
        if !psi_0.is_finite() {
            return Err(ParameterError::NotPositive("mean mass", psi_0.exp()));
        }

        Ok(Self {
            mu_0,
            sigma_0_prec: WEAK_PRIOR_PRECISION,
            psi_0,
            rho_0_prec: WEAK_PRIOR_PRECISION,
            delta_prec: 1.0 / (global_stdev * global_stdev),
            gamma_prec: 1.0 / (local_stdev * local_stdev),
            rho_prec: mass_precision_from_ppm(ppm),
            alpha_rt: check_positive("alpha_rt", settings.alpha_rt)?,
            alpha_mass: check_positive("alpha_mass", settings.alpha_mass)?,
            top_alpha: check_positive("top_alpha", settings.top_alpha)?,
            n_samples: settings.n_samples,
            burn_in: settings.burn_in,
            speed_up: settings.speed_up,
            speed_up_num_sample: settings.speed_up_num_sample,
            reference_file,
            seed: settings.seed,
        })
    }

    pub fn is_reference_file(&self, file: FileId) -> bool {
        self.reference_file == Some(file)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::peaks::Peak;

    fn files() -> Vec<InputFile> {
        vec![
            InputFile::new(FileId(0), vec![Peak::new(100.0, 50.0, 1.0)]),
            InputFile::new(FileId(1), vec![Peak::new(300.0, 150.0, 1.0)]),
        ]
    }

    #[test]
    fn test_mass_precision() {
        let prec = mass_precision_from_ppm(2.0);
        let stdev = 1.0 / prec.sqrt();
        // one ppm in log space is ~1e-6
        assert!((stdev - 1e-6).abs() < 1e-9, "{stdev}");
    }

    #[test]
    fn test_duplicate_file_id() {
        let mut files = files();
        files.push(InputFile::new(FileId(1), vec![Peak::new(300.0, 151.0, 1.0)]));
        assert_eq!(
            HdpParams::from_settings(&files, &HdpSettings::default()),
            Err(ParameterError::DuplicateFileId(FileId(1)))
        );
    }

    #[test]
    fn test_derive() {
        let params = HdpParams::from_settings(&files(), &HdpSettings::default()).unwrap();
        assert!((params.mu_0 - 100.0).abs() < 1e-12);
        assert!((params.psi_0 - 200.0f64.ln()).abs() < 1e-12);
        assert!((params.delta_prec - 1.0 / 400.0).abs() < 1e-15);
        assert!((params.gamma_prec - 0.25).abs() < 1e-15);
        assert_eq!(params.sigma_0_prec, WEAK_PRIOR_PRECISION);
        assert_eq!(params.reference_file, None);
    }

    #[test]
    fn test_validation() {
        let files = files();
        let settings = HdpSettings::default().with_samples(10, 10);
        assert!(matches!(
            HdpParams::from_settings(&files, &settings),
            Err(ParameterError::BurnInTooLong { .. })
        ));

        let settings = HdpSettings::default().with_reference_file(2);
        assert_eq!(
            HdpParams::from_settings(&files, &settings),
            Err(ParameterError::ReferenceFileOutOfRange(2, 2))
        );

        let mut settings = HdpSettings::default();
        settings.alpha_mass = 0.0;
        assert!(matches!(
            HdpParams::from_settings(&files, &settings),
            Err(ParameterError::NotPositive("alpha_mass", _))
        ));

        assert_eq!(
            HdpParams::from_settings(&[], &HdpSettings::default()),
            Err(ParameterError::NoPeaks)
        );
    }
}
