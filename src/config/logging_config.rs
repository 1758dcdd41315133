use serde::Deserialize;
use std::path::PathBuf;

/// Where the honeypot channels are written
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Directory of the detailed and exception logs
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Directory of the simplified JSON-line log
    #[serde(default = "default_simplified_log_dir")]
    pub simplified_log_dir: PathBuf,
    /// Mirror operator output to stdout
    #[serde(default = "default_log_to_stdout")]
    pub log_to_stdout: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            simplified_log_dir: default_simplified_log_dir(),
            log_to_stdout: default_log_to_stdout(),
        }
    }
}

impl LoggingConfig {
    pub fn detailed_log_path(&self) -> PathBuf {
        self.log_dir.join("dicom_server.log")
    }

    pub fn simplified_log_path(&self) -> PathBuf {
        self.simplified_log_dir.join("dicom_simplified.log")
    }

    pub fn exception_log_path(&self) -> PathBuf {
        self.log_dir.join("exception.log")
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_simplified_log_dir() -> PathBuf {
    PathBuf::from("simplified_logs")
}

fn default_log_to_stdout() -> bool {
    true
}
