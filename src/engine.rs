//! Detection engine: orchestrates one full run against one target
//!
//! Owns the run-scoped resources: the filter scope is acquired before the
//! first probe and released on every exit path — normal completion, error
//! and deadline abort alike. A process-wide deadline (the sum of all probe
//! timeouts plus a margin) bounds total run time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddrV4, ToSocketAddrs};
use std::time::Duration;

use crate::config::DetectConfig;
use crate::fingerprint::catalog::{CVE_2019_12258_PROBE, FINGERPRINT_PROBES, LIVENESS_PROBE};
use crate::fingerprint::classifier::classify;
use crate::fingerprint::prober::Prober;
use crate::fingerprint::report::{self, FingerprintReport};
use crate::network::filter::{FilterScope, IptablesFilterScope};
use crate::network::injector::{PacketInjector, RawSocketInjector};
use crate::network::socket::local_source_ip;
use crate::vuln::{VulnerabilityChecker, VulnerabilityVerdict};
use crate::DetectError;

/// Structured result of one detection run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub host: String,
    pub port: u16,
    pub timestamp: DateTime<Utc>,
    pub fingerprint: FingerprintReport,
    /// Present only when the destructive check was requested
    pub vulnerability: Option<VulnerabilityVerdict>,
}

/// Resolve a target host string to an IPv4 address
pub fn resolve_target(host: &str) -> crate::Result<Ipv4Addr> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(ip);
    }

    let addrs = (host, 0u16)
        .to_socket_addrs()
        .map_err(|e| DetectError::InvalidTarget(format!("{}: {}", host, e)))?;
    addrs
        .filter_map(|addr| match addr {
            std::net::SocketAddr::V4(v4) => Some(*v4.ip()),
            std::net::SocketAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| {
            DetectError::InvalidTarget(format!("{}: no IPv4 address found", host))
        })
}

/// Main detection engine
pub struct DetectEngine<I: PacketInjector, F: FilterScope> {
    config: DetectConfig,
    target_ip: Ipv4Addr,
    injector: I,
    filter: F,
}

impl DetectEngine<RawSocketInjector, IptablesFilterScope> {
    /// Build a production engine: raw-socket injector plus iptables filter
    /// scope. Fails fast on bad configuration or missing privilege.
    pub fn new(config: DetectConfig) -> crate::Result<Self> {
        config.validate()?;
        let target_ip = resolve_target(&config.target)?;
        let source_ip = local_source_ip(target_ip)?;
        let injector = RawSocketInjector::new(source_ip, target_ip)?;
        Ok(Self {
            config,
            target_ip,
            injector,
            filter: IptablesFilterScope::new(),
        })
    }
}

impl<I: PacketInjector, F: FilterScope> DetectEngine<I, F> {
    /// Assemble an engine from explicit parts. This is the seam the tests
    /// use to substitute injector and filter doubles.
    pub fn with_parts(config: DetectConfig, target_ip: Ipv4Addr, injector: I, filter: F) -> Self {
        Self {
            config,
            target_ip,
            injector,
            filter,
        }
    }

    /// Upper bound for the whole run: every probe's wait, the optional CVE
    /// sequence, plus the configured margin
    pub fn run_deadline(&self) -> Duration {
        let per_probe = |probe: &crate::fingerprint::catalog::Probe| {
            self.config.timeout_duration().unwrap_or(probe.timeout)
        };

        let mut total: Duration = FINGERPRINT_PROBES.iter().map(per_probe).sum();
        if self.config.check_vuln {
            // connection establishment, the CVE probe and the liveness probe
            total += per_probe(&CVE_2019_12258_PROBE) * 2;
            total += per_probe(&LIVENESS_PROBE);
        }
        total + self.config.deadline_margin_duration()
    }

    /// Run the full detection pass. The filter scope is released exactly
    /// once, whatever path the run takes out of this function.
    pub async fn run(&mut self) -> crate::Result<DetectionReport> {
        self.config.validate()?;

        if let Err(e) = self.filter.acquire() {
            // Acquisition may have partially succeeded; release is
            // idempotent-safe
            self.filter.release();
            return Err(e);
        }

        let deadline = self.run_deadline();
        let outcome = tokio::time::timeout(deadline, self.run_probes()).await;
        self.filter.release();

        match outcome {
            Ok(report) => Ok(report),
            Err(_) => {
                log::error!("run deadline of {:?} exceeded, aborting", deadline);
                Err(DetectError::DeadlineExceeded)
            }
        }
    }

    async fn run_probes(&self) -> DetectionReport {
        let src_port = self.filter.source_port();
        let dst_port = self.config.port;

        log::info!(
            "running {} fingerprint probes against {}:{}",
            FINGERPRINT_PROBES.len(),
            self.config.target,
            dst_port
        );

        let prober = Prober::new(
            &self.injector,
            src_port,
            dst_port,
            self.config.timeout_duration(),
        );
        let results = prober.run(&FINGERPRINT_PROBES).await;

        let scores = FINGERPRINT_PROBES
            .iter()
            .zip(results.iter())
            .map(|(probe, result)| classify(probe, result, src_port, dst_port))
            .collect();

        let fingerprint = report::aggregate(&self.config.target, dst_port, scores);
        log::info!(
            "fingerprint total {} -> {}",
            fingerprint.total_score,
            fingerprint.verdict
        );

        let vulnerability = if self.config.check_vuln {
            let mut checker = VulnerabilityChecker::new(
                &self.injector,
                SocketAddrV4::new(self.target_ip, dst_port),
                self.config.timeout_duration(),
            );
            Some(checker.run(fingerprint.verdict).await)
        } else {
            None
        };

        DetectionReport {
            host: self.config.target.clone(),
            port: dst_port,
            timestamp: Utc::now(),
            fingerprint,
            vulnerability,
        }
    }
}
