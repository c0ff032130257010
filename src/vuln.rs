//! CVE-2019-12258 vulnerability check
//!
//! Injects a SYN carrying a malformed window-scale option and garbage
//! sequence numbers onto an established connection's 4-tuple. A vulnerable
//! IPnet tears the connection down without validating the sequences; the
//! follow-up liveness probe then tells a crashed or wedged host apart from
//! a patched one.
//!
//! This check is destructive by nature — it may crash a genuinely
//! vulnerable device — so it is a separate entry point, never run as part
//! of fingerprinting, and disabled by default in the configuration.

use serde::{Deserialize, Serialize};
use std::net::SocketAddrV4;
use std::time::Duration;
use tokio::net::TcpStream;

use crate::fingerprint::catalog::{CVE_2019_12258_PROBE, LIVENESS_PROBE};
use crate::fingerprint::report::Verdict;
use crate::network::injector::{PacketInjector, ProbeShot};
use crate::network::ResponseSummary;

const ICMP_ECHO_REPLY: u8 = 0;

/// Outcome of the CVE-2019-12258 check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VulnerabilityVerdict {
    /// The liveness follow-up went unanswered after the malformed probe
    Vulnerable,
    /// The host stayed responsive
    Patched,
    /// The probe could not be delivered, the liveness result was ambiguous,
    /// or the fingerprint did not identify an IPnet stack
    Inconclusive,
}

impl std::fmt::Display for VulnerabilityVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VulnerabilityVerdict::Vulnerable => write!(f, "vulnerable"),
            VulnerabilityVerdict::Patched => write!(f, "patched"),
            VulnerabilityVerdict::Inconclusive => write!(f, "inconclusive"),
        }
    }
}

/// Progress of one check run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    NotStarted,
    ProbeSent,
    LivenessChecked,
    Done,
}

/// Runs the CVE probe sequence through a [`PacketInjector`]
pub struct VulnerabilityChecker<'a, I: PacketInjector + ?Sized> {
    injector: &'a I,
    target: SocketAddrV4,
    state: CheckState,
    timeout_override: Option<Duration>,
}

impl<'a, I: PacketInjector + ?Sized> VulnerabilityChecker<'a, I> {
    pub fn new(injector: &'a I, target: SocketAddrV4, timeout_override: Option<Duration>) -> Self {
        Self {
            injector,
            target,
            state: CheckState::NotStarted,
            timeout_override,
        }
    }

    pub fn state(&self) -> CheckState {
        self.state
    }

    fn timeout_for(&self, probe: &crate::fingerprint::catalog::Probe) -> Duration {
        self.timeout_override.unwrap_or(probe.timeout)
    }

    /// Run the full check: policy gate, connection establishment, probe
    /// injection, liveness follow-up.
    ///
    /// Checking a non-IPnet host for an IPnet-specific defect is
    /// meaningless, so any fingerprint other than an IPnet-positive one
    /// yields Inconclusive without a single packet being sent.
    pub async fn run(&mut self, fingerprint: Verdict) -> VulnerabilityVerdict {
        if !fingerprint.is_ipnet() {
            log::info!("fingerprint is {}, skipping CVE-2019-12258 probe", fingerprint);
            self.state = CheckState::Done;
            return VulnerabilityVerdict::Inconclusive;
        }

        let connect_timeout = self.timeout_for(&CVE_2019_12258_PROBE);
        let stream =
            match tokio::time::timeout(connect_timeout, TcpStream::connect(self.target)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    log::warn!("CVE check connection failed: {}", e);
                    self.state = CheckState::Done;
                    return VulnerabilityVerdict::Inconclusive;
                }
                Err(_) => {
                    log::warn!("CVE check connection timed out");
                    self.state = CheckState::Done;
                    return VulnerabilityVerdict::Inconclusive;
                }
            };

        let src_port = match stream.local_addr() {
            Ok(addr) => addr.port(),
            Err(e) => {
                log::warn!("CVE check could not read local address: {}", e);
                self.state = CheckState::Done;
                return VulnerabilityVerdict::Inconclusive;
            }
        };

        // The connection must stay open while the malformed SYN rides its
        // 4-tuple; a vulnerable stack resets exactly this connection.
        let verdict = self.run_on_tuple(src_port, self.target.port()).await;
        drop(stream);
        verdict
    }

    /// Run the probe sequence on an already-established connection's
    /// 4-tuple. Callers are expected to have applied the fingerprint policy
    /// gate; [`Self::run`] does both.
    pub async fn run_on_tuple(&mut self, src_port: u16, dst_port: u16) -> VulnerabilityVerdict {
        let cve_probe = &*CVE_2019_12258_PROBE;
        let shot = ProbeShot {
            template: &cve_probe.template,
            src_port,
            dst_port,
        };

        match self.injector.send_probe(shot, self.timeout_for(cve_probe)).await {
            Ok(response) => {
                self.state = CheckState::ProbeSent;
                log::debug!("CVE probe response: {:?}", response);
            }
            Err(e) => {
                // Nothing was delivered; a liveness check would measure noise
                log::warn!("CVE probe send failed: {}", e);
                self.state = CheckState::Done;
                return VulnerabilityVerdict::Inconclusive;
            }
        }

        let verdict = self.check_liveness(src_port, dst_port).await;
        self.state = CheckState::Done;
        verdict
    }

    async fn check_liveness(&mut self, src_port: u16, dst_port: u16) -> VulnerabilityVerdict {
        let liveness = &*LIVENESS_PROBE;
        let shot = ProbeShot {
            template: &liveness.template,
            src_port,
            dst_port,
        };

        let outcome = self.injector.send_probe(shot, self.timeout_for(liveness)).await;
        self.state = CheckState::LivenessChecked;

        match outcome {
            Ok(Some(ResponseSummary::Icmp {
                icmp_type: ICMP_ECHO_REPLY,
                from_target: true,
                ..
            })) => VulnerabilityVerdict::Patched,
            // Unexpected but non-timeout conditions (a router's
            // host-unreachable, a stray reply) are never folded into
            // Vulnerable
            Ok(Some(summary)) => {
                log::info!("ambiguous liveness response: {:?}", summary);
                VulnerabilityVerdict::Inconclusive
            }
            Ok(None) => VulnerabilityVerdict::Vulnerable,
            Err(e) => {
                log::warn!("liveness probe send failed: {}", e);
                VulnerabilityVerdict::Inconclusive
            }
        }
    }
}
