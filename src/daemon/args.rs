use std::path::PathBuf;

use clap::{Args, Parser};
use tracing::level_filters::LevelFilter;

/// Values that take precedence over `config.toml`.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Base url of the ingestion endpoint, for example http://collector:5000
    #[arg(long)]
    pub endpoint: Option<String>,
    /// Identity reported with every record. Defaults to the host name.
    #[arg(long)]
    pub identity: Option<String>,
}

#[derive(Parser)]
pub struct DaemonArgs {
    /// Run in the current process instead of detaching.
    #[arg(long)]
    pub force: bool,
    #[arg(long)]
    pub dir: Option<PathBuf>,
    /// This option is for debugging purposes only.
    #[arg(long = "log-console")]
    pub log_console: bool,
    #[arg(long = "log-filter")]
    pub log: Option<LevelFilter>,
    #[command(flatten)]
    pub overrides: ConfigOverrides,
}
