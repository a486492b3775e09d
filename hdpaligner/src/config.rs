use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use hdpalign::HdpSettings;

/// The configuration file read from the working directory
pub const CONFIG_FILE: &str = "hdpaligner.toml";
/// The prefix of environment variables that override configuration keys
pub const ENV_PREFIX: &str = "HDPALIGNER_";

pub const SAMPLE_BUFFER_SIZE: usize = 16;

/// Batch alignment of LC-MS peak lists.
///
/// Configurations are read from `hdpaligner.toml` in the working directory, then an explicit
/// file if one is given, then environment variables prefixed with `HDPALIGNER_`. Nested keys
/// are separated by a double underscore, e.g. `HDPALIGNER_SAMPLER__N_SAMPLES=500`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AlignerConfig {
    /// The JSON peak list to align, optionally gzip-compressed
    pub input_file: PathBuf,

    /// Where to load previously drawn samples from, or save them to after sampling.
    ///
    /// If the file exists and can be read, sampling is skipped entirely.
    pub results_file: Option<PathBuf>,

    /// Where to write the aligned peak sets and their probabilities
    pub output_file: Option<PathBuf>,

    /// The path to write a log file to, in addition to STDERR
    pub log_file: Option<PathBuf>,

    /// The number of samples that may be queued between the sampler and the collector
    pub sample_buffer_size: usize,

    pub sampler: HdpSettings,
}

impl Default for AlignerConfig {
    fn default() -> Self {
        Self {
            input_file: PathBuf::from("peaks.json"),
            results_file: None,
            output_file: None,
            log_file: None,
            sample_buffer_size: SAMPLE_BUFFER_SIZE,
            sampler: HdpSettings::default(),
        }
    }
}

impl AlignerConfig {
    /// Build the layered configuration source
    pub fn figment(config_file: Option<&Path>) -> Figment {
        let mut config = Figment::from(Serialized::defaults(AlignerConfig::default()))
            .merge(Toml::file(CONFIG_FILE));
        if let Some(path) = config_file {
            config = config.merge(Toml::file_exact(path));
        }
        config.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load(config_file: Option<&Path>) -> Result<Self, figment::Error> {
        Self::figment(config_file).extract()
    }
}
