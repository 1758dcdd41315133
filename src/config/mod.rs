mod logging_config;
pub mod config;

pub use config::{CatalogConfig, Config, ConfigError, DashboardConfig, HoneypotConfig};
pub use logging_config::LoggingConfig;

/// Structure representing application startup arguments.
#[derive(Debug, clap::Parser)]
#[command(name = "dicomhawk", about = "DICOM honeypot", version)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long)]
    pub config: Option<std::path::PathBuf>,
}
