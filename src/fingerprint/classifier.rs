//! Classifier: pure mapping from probe outcomes to score contributions
//!
//! No I/O, no mutable state. Every outcome — including a send failure —
//! yields exactly one score so the report stays auditable.

use serde::{Deserialize, Serialize};

use crate::fingerprint::catalog::{Probe, ResponseRule};
use crate::fingerprint::prober::{ProbeOutcome, ProbeResult};

/// One probe's scored contribution with its rationale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedScore {
    pub probe: String,
    pub contribution: i32,
    pub rationale: String,
    /// The VxWorks-specific field rule matched on this probe
    pub vxworks_signal: bool,
}

impl ClassifiedScore {
    fn new(probe: &str, contribution: i32, rationale: impl Into<String>) -> Self {
        Self {
            probe: probe.to_string(),
            contribution,
            rationale: rationale.into(),
            vxworks_signal: false,
        }
    }

    fn with_vxworks_signal(mut self) -> Self {
        self.vxworks_signal = true;
        self
    }
}

/// Classify one probe result against the rule embedded in its probe
/// definition. `src_port`/`dst_port` are the ports the probe was fired on;
/// field matchers use them to validate mirrored responses.
pub fn classify(probe: &Probe, result: &ProbeResult, src_port: u16, dst_port: u16) -> ClassifiedScore {
    match &result.outcome {
        // A failed send is neutral but never silently omitted
        ProbeOutcome::SendFailed(reason) => ClassifiedScore::new(
            probe.name,
            0,
            format!("send failed, scored neutral: {}", reason),
        ),

        ProbeOutcome::TimedOut => match probe.rule {
            ResponseRule::Absence { weight } => ClassifiedScore::new(
                probe.name,
                weight,
                "silent drop matches IPnet behavior",
            ),
            ResponseRule::Presence { .. } => {
                ClassifiedScore::new(probe.name, 0, "no response within timeout")
            }
            ResponseRule::Field { .. } => {
                ClassifiedScore::new(probe.name, 0, "no response, field rule unscored")
            }
        },

        ProbeOutcome::Responded(summary) => match probe.rule {
            ResponseRule::Presence { weight } => {
                if summary.is_from_target() {
                    ClassifiedScore::new(
                        probe.name,
                        weight,
                        "target answered a packet a conformant stack drops",
                    )
                } else {
                    ClassifiedScore::new(probe.name, 0, "only an intermediate hop answered")
                }
            }
            ResponseRule::Absence { .. } => {
                ClassifiedScore::new(probe.name, 0, "target answered, no silent-drop signal")
            }
            ResponseRule::Field {
                matcher,
                on_match,
                on_mismatch,
                marks_vxworks,
            } => {
                if matcher.matches(summary, src_port, dst_port) {
                    let score = ClassifiedScore::new(
                        probe.name,
                        on_match,
                        "response field matches the IPnet signature",
                    );
                    if marks_vxworks {
                        score.with_vxworks_signal()
                    } else {
                        score
                    }
                } else {
                    ClassifiedScore::new(
                        probe.name,
                        on_mismatch,
                        "response does not match the IPnet signature",
                    )
                }
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::catalog::{
        FINGERPRINT_PROBES, PROBE_ICMP_TRUNCATED_TIMESTAMP, PROBE_TCP_MALFORMED_OPTIONS,
        PROBE_TCP_URGENT_WITHOUT_FLAG,
    };
    use crate::network::ResponseSummary;
    use pnet::packet::tcp::TcpFlags;
    use proptest::prelude::*;

    const SRC_PORT: u16 = 40000;
    const DST_PORT: u16 = 502;

    fn probe_by_name(name: &str) -> &'static Probe {
        FINGERPRINT_PROBES
            .iter()
            .find(|p| p.name == name)
            .expect("probe in catalog")
    }

    fn responded(probe: &Probe, summary: ResponseSummary) -> ProbeResult {
        ProbeResult {
            probe: probe.name,
            outcome: ProbeOutcome::Responded(summary),
        }
    }

    #[test]
    fn test_vxworks_rst_scores_full_weight() {
        let probe = probe_by_name(PROBE_TCP_MALFORMED_OPTIONS);
        let result = responded(
            probe,
            ResponseSummary::Tcp {
                flags: TcpFlags::RST,
                source_port: DST_PORT,
                dest_port: SRC_PORT,
                window: 0,
            },
        );
        let score = classify(probe, &result, SRC_PORT, DST_PORT);
        assert_eq!(score.contribution, 100);
        assert!(score.vxworks_signal);
    }

    #[test]
    fn test_tolerant_stack_scores_negative() {
        let probe = probe_by_name(PROBE_TCP_MALFORMED_OPTIONS);
        let result = responded(
            probe,
            ResponseSummary::Tcp {
                flags: TcpFlags::SYN | TcpFlags::ACK,
                source_port: DST_PORT,
                dest_port: SRC_PORT,
                window: 8192,
            },
        );
        let score = classify(probe, &result, SRC_PORT, DST_PORT);
        assert_eq!(score.contribution, -100);
        assert!(!score.vxworks_signal);
    }

    #[test]
    fn test_absence_rule_scores_on_timeout_only() {
        let probe = probe_by_name(PROBE_TCP_URGENT_WITHOUT_FLAG);

        let timed_out = ProbeResult {
            probe: probe.name,
            outcome: ProbeOutcome::TimedOut,
        };
        assert_eq!(classify(probe, &timed_out, SRC_PORT, DST_PORT).contribution, 30);

        let answered = responded(
            probe,
            ResponseSummary::Tcp {
                flags: TcpFlags::SYN | TcpFlags::ACK,
                source_port: DST_PORT,
                dest_port: SRC_PORT,
                window: 8192,
            },
        );
        assert_eq!(classify(probe, &answered, SRC_PORT, DST_PORT).contribution, 0);
    }

    #[test]
    fn test_presence_rule_ignores_intermediate_hops() {
        let probe = probe_by_name(PROBE_ICMP_TRUNCATED_TIMESTAMP);

        let from_target = responded(
            probe,
            ResponseSummary::Icmp {
                icmp_type: 14,
                icmp_code: 0,
                from_target: true,
            },
        );
        assert_eq!(classify(probe, &from_target, SRC_PORT, DST_PORT).contribution, 90);

        let from_router = responded(
            probe,
            ResponseSummary::Icmp {
                icmp_type: 3,
                icmp_code: 1,
                from_target: false,
            },
        );
        assert_eq!(classify(probe, &from_router, SRC_PORT, DST_PORT).contribution, 0);
    }

    #[test]
    fn test_send_failure_is_neutral_but_audited() {
        for probe in FINGERPRINT_PROBES.iter() {
            let result = ProbeResult {
                probe: probe.name,
                outcome: ProbeOutcome::SendFailed("network unreachable".to_string()),
            };
            let score = classify(probe, &result, SRC_PORT, DST_PORT);
            assert_eq!(score.contribution, 0);
            assert!(score.rationale.contains("network unreachable"));
            assert!(!score.vxworks_signal);
        }
    }

    fn arb_summary() -> impl Strategy<Value = ResponseSummary> {
        prop_oneof![
            (any::<u16>(), any::<u16>(), any::<u16>(), any::<u16>()).prop_map(
                |(flags, source_port, dest_port, window)| ResponseSummary::Tcp {
                    flags,
                    source_port,
                    dest_port,
                    window,
                }
            ),
            (any::<u8>(), any::<u8>(), any::<bool>()).prop_map(
                |(icmp_type, icmp_code, from_target)| ResponseSummary::Icmp {
                    icmp_type,
                    icmp_code,
                    from_target,
                }
            ),
        ]
    }

    fn arb_outcome() -> impl Strategy<Value = ProbeOutcome> {
        prop_oneof![
            Just(ProbeOutcome::TimedOut),
            ".*".prop_map(ProbeOutcome::SendFailed),
            arb_summary().prop_map(ProbeOutcome::Responded),
        ]
    }

    proptest! {
        // Exactly one score per outcome, for every probe, never a panic
        #[test]
        fn classifier_is_total(outcome in arb_outcome()) {
            for probe in FINGERPRINT_PROBES.iter() {
                let result = ProbeResult { probe: probe.name, outcome: outcome.clone() };
                let score = classify(probe, &result, SRC_PORT, DST_PORT);
                prop_assert_eq!(score.probe.as_str(), probe.name);
                prop_assert!(!score.rationale.is_empty());
            }
        }
    }
}
