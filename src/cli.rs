//! Command-line flags, layered on top of `config::Config::from_env`'s env >
//! file > defaults precedence as the highest-priority override.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Default)]
#[command(version, about = "Real-time data acquisition and historization service")]
pub struct Cli {
    /// Override RTDS_CONFIG_PATH / the default config file location.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override RTDS_BIND. Ignored by the forwarder and consumer binaries.
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<String>,
}
