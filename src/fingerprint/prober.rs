//! Prober: runs the catalog against a target, one result per probe
//!
//! Sole network I/O boundary for fingerprinting. Probes run strictly
//! sequentially: several leave transient state behind (a half-open
//! connection, a pending ICMP exchange) that a parallel probe would
//! corrupt.

use std::time::Duration;

use crate::fingerprint::catalog::Probe;
use crate::network::injector::{PacketInjector, ProbeShot};
use crate::network::ResponseSummary;

/// Outcome of a single probe execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// A matching response arrived within the timeout
    Responded(ResponseSummary),
    /// No matching response within the timeout
    TimedOut,
    /// The probe could not be sent (unreachable network, permission, ...)
    SendFailed(String),
}

/// One probe's identity and outcome. Created once per probe execution;
/// never retried — a timeout or drop is itself a signal for absence-rule
/// probes, and retrying would corrupt the measurement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub probe: &'static str,
    pub outcome: ProbeOutcome,
}

/// Drives a [`PacketInjector`] through a probe sequence
pub struct Prober<'a, I: PacketInjector + ?Sized> {
    injector: &'a I,
    src_port: u16,
    dst_port: u16,
    timeout_override: Option<Duration>,
}

impl<'a, I: PacketInjector + ?Sized> Prober<'a, I> {
    pub fn new(
        injector: &'a I,
        src_port: u16,
        dst_port: u16,
        timeout_override: Option<Duration>,
    ) -> Self {
        Self {
            injector,
            src_port,
            dst_port,
            timeout_override,
        }
    }

    /// Effective wait for a probe: the run-level override beats the
    /// catalog default
    pub fn probe_timeout(&self, probe: &Probe) -> Duration {
        self.timeout_override.unwrap_or(probe.timeout)
    }

    /// Run every probe in catalog order. A send failure on one probe never
    /// aborts the rest; each probe is evaluated independently.
    pub async fn run(&self, probes: &[Probe]) -> Vec<ProbeResult> {
        let mut results = Vec::with_capacity(probes.len());
        for probe in probes {
            results.push(self.run_single(probe).await);
        }
        results
    }

    /// Execute one probe and record its outcome
    pub async fn run_single(&self, probe: &Probe) -> ProbeResult {
        let shot = ProbeShot {
            template: &probe.template,
            src_port: self.src_port,
            dst_port: self.dst_port,
        };

        let outcome = match self.injector.send_probe(shot, self.probe_timeout(probe)).await {
            Ok(Some(summary)) => {
                log::debug!("probe {} answered: {:?}", probe.name, summary);
                ProbeOutcome::Responded(summary)
            }
            Ok(None) => {
                log::debug!("probe {} timed out", probe.name);
                ProbeOutcome::TimedOut
            }
            Err(e) => {
                log::warn!("probe {} failed to send: {}", probe.name, e);
                ProbeOutcome::SendFailed(e.to_string())
            }
        };

        ProbeResult {
            probe: probe.name,
            outcome,
        }
    }
}
