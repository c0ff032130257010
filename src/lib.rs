//! vxprobe - remote Interpeak IPnet / VxWorks stack fingerprinter
//!
//! Sends a fixed battery of deliberately malformed TCP/ICMP probes at a
//! target host and scores the responses (or their absence) into a verdict on
//! whether the remote TCP/IP stack is IPnet, and whether the host is
//! affected by CVE-2019-12258 (URGENT/11).

pub mod config;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod network;
pub mod output;
pub mod vuln;

// Re-export commonly used types
pub use config::DetectConfig;
pub use engine::{DetectEngine, DetectionReport};
pub use error::{DetectError, DetectResult};
pub use fingerprint::report::{FingerprintReport, Verdict};
pub use vuln::VulnerabilityVerdict;

pub type Result<T> = std::result::Result<T, DetectError>;
