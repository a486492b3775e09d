use std::env;
use std::path::PathBuf;

use hdpaligner::{configure_log, AlignerConfig, HdpAligner, HdpAlignerError};

fn main() -> Result<(), HdpAlignerError> {
    let config_file = env::var_os("HDPALIGNER_CONFIG_FILE").map(PathBuf::from);
    let config = AlignerConfig::load(config_file.as_deref())?;
    let _guard = configure_log(config.log_file.as_deref())?;
    HdpAligner::new(config).main()
}
