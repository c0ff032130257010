//! Error handling for the vxprobe detector
//!
//! Configuration-class errors are fatal before any probe runs; per-probe
//! transport failures are captured as probe outcomes instead and never
//! surface through this type mid-run.

use thiserror::Error;

/// Main error type for detection operations
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Permission denied: {0}")]
    PermissionError(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Timeout error")]
    TimeoutError,

    #[error("Run deadline exceeded")]
    DeadlineExceeded,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Filter scope error: {0}")]
    FilterError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Raw socket error: {0}")]
    RawSocketError(String),

    #[error("Output error: {0}")]
    OutputError(String),
}

/// Result type alias for detection operations
pub type DetectResult<T> = Result<T, DetectError>;

impl DetectError {
    /// Configuration-class errors are fatal before any probe runs: no
    /// partial report, non-zero exit.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DetectError::PermissionError(_)
                | DetectError::InvalidTarget(_)
                | DetectError::ConfigError(_)
                | DetectError::FilterError(_)
        )
    }
}

/// Convert common errors to DetectError
impl From<std::net::AddrParseError> for DetectError {
    fn from(e: std::net::AddrParseError) -> Self {
        DetectError::InvalidTarget(e.to_string())
    }
}

impl From<std::num::ParseIntError> for DetectError {
    fn from(e: std::num::ParseIntError) -> Self {
        DetectError::ParseError(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for DetectError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        DetectError::TimeoutError
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(DetectError::PermissionError("need root".to_string()).is_fatal());
        assert!(DetectError::FilterError("iptables missing".to_string()).is_fatal());
        assert!(DetectError::InvalidTarget("bad host".to_string()).is_fatal());
        assert!(!DetectError::TimeoutError.is_fatal());
        assert!(!DetectError::NetworkError("unreachable".to_string()).is_fatal());
    }

    #[test]
    fn test_from_addr_parse_error() {
        let err: DetectError = "not-an-ip".parse::<std::net::Ipv4Addr>().unwrap_err().into();
        assert!(matches!(err, DetectError::InvalidTarget(_)));
    }
}
