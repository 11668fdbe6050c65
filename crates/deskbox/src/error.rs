use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("no available ports found starting from {start}")]
    PortsExhausted { start: u16 },

    #[error("could not acquire {} within {timeout:?}", path.display())]
    LockTimeout { path: PathBuf, timeout: Duration },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("archive extraction failed: {0}")]
    Extract(String),

    #[error("VM failed to become ready within {0:?}")]
    ReadyTimeout(Duration),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
