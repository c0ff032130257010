//! Configuration module for the vxprobe detector

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure for a detection run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectConfig {
    /// Target host to fingerprint
    pub target: String,

    /// Target TCP port (must be reachable; the TCP probes need a listener)
    pub port: u16,

    /// Per-probe timeout override in milliseconds; None uses each probe's
    /// catalog timeout
    pub timeout: Option<u64>,

    /// Run the CVE-2019-12258 check after fingerprinting. Disabled by
    /// default: the probe can crash a genuinely vulnerable device.
    pub check_vuln: bool,

    /// Margin added to the sum of probe timeouts for the run deadline, in
    /// milliseconds
    pub deadline_margin: u64,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            target: "127.0.0.1".to_string(),
            port: 80,
            timeout: None,
            check_vuln: false, // destructive check is opt-in
            deadline_margin: 5000,
        }
    }
}

impl DetectConfig {
    /// Create a new configuration for a target host and port
    pub fn new(target: String, port: u16) -> Self {
        Self {
            target,
            port,
            ..Default::default()
        }
    }

    /// Set the per-probe timeout override
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    /// Enable or disable the destructive vulnerability check
    pub fn with_vuln_check(mut self, enabled: bool) -> Self {
        self.check_vuln = enabled;
        self
    }

    /// Get the per-probe timeout override as a Duration
    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_millis)
    }

    /// Get the deadline margin as a Duration
    pub fn deadline_margin_duration(&self) -> Duration {
        Duration::from_millis(self.deadline_margin)
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| crate::DetectError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: DetectConfig = toml::from_str(&content)
            .map_err(|e| crate::DetectError::ConfigError(format!("Failed to parse TOML: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from the default location (~/.vxprobe.toml),
    /// falling back to defaults
    pub fn load_default_config() -> Self {
        let home_dir = dirs::home_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let config_path = home_dir.join(".vxprobe.toml");

        if config_path.exists() {
            if let Ok(config) = Self::from_toml_file(&config_path) {
                log::info!("Loaded config from {}", config_path.display());
                return config;
            }
        }

        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.target.is_empty() {
            return Err(crate::DetectError::InvalidTarget(
                "Target cannot be empty".to_string(),
            ));
        }

        if self.port == 0 {
            return Err(crate::DetectError::InvalidTarget(
                "Port must be greater than 0".to_string(),
            ));
        }

        if let Some(t) = self.timeout {
            if t == 0 {
                return Err(crate::DetectError::ConfigError(
                    "Probe timeout must be greater than 0".to_string(),
                ));
            }
        }

        Ok(())
    }
}
