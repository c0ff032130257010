//! The fixed probe catalog
//!
//! Probes are immutable data: packet template, response rule, weight,
//! timeout. Adding or tuning a probe never touches prober or classifier
//! control flow.
//!
//! Probe behavior summary (observed against IPnet-based devices):
//! * IPnet drops a TCP segment whose options are malformed; the variant
//!   shipped with VxWorks answers it with a RST without validating
//!   sequence numbers.
//! * IPnet zeroes the ICMP code field in echo replies even when the request
//!   carried a nonzero (meaningless) code.
//! * IPnet answers an ICMP timestamp request even when the message is
//!   truncated; most stacks silently drop it.
//! * IPnet's urgent-field validation silently drops a SYN that carries an
//!   urgent pointer without the URG flag; a conformant stack ignores the
//!   stray pointer and answers.

use once_cell::sync::Lazy;
use std::time::Duration;

use crate::network::packet::{TcpOptionSpec, TCP_OPTION_MSS, TCP_OPTION_NOP, TCP_OPTION_WNDSCL};
use crate::network::{Protocol, ResponseSummary};

/// Default wait for a single probe response
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

pub const PROBE_TCP_MALFORMED_OPTIONS: &str = "tcp-malformed-options";
pub const PROBE_ICMP_ECHO_NONZERO_CODE: &str = "icmp-echo-nonzero-code";
pub const PROBE_ICMP_TRUNCATED_TIMESTAMP: &str = "icmp-truncated-timestamp";
pub const PROBE_TCP_URGENT_WITHOUT_FLAG: &str = "tcp-urgent-without-flag";
pub const PROBE_CVE_2019_12258: &str = "cve-2019-12258";
pub const PROBE_LIVENESS_ECHO: &str = "liveness-echo";

// Score contributions. The malformed-options and ICMP weights follow the
// published URGENT/11 detection research; the urgent-pointer weight is a
// calibration constant.
const MALFORMED_OPTIONS_ON_MATCH: i32 = 100;
const MALFORMED_OPTIONS_ON_MISMATCH: i32 = -100;
const ECHO_CODE_ON_MATCH: i32 = 20;
const ECHO_CODE_ON_MISMATCH: i32 = -20;
const TRUNCATED_TIMESTAMP_WEIGHT: i32 = 90;
const URGENT_SILENT_DROP_WEIGHT: i32 = 30;

const ICMP_ECHO_REQUEST: u8 = 8;
const ICMP_ECHO_REPLY: u8 = 0;
const ICMP_TIMESTAMP_REQUEST: u8 = 13;
const ICMP_TIMESTAMP_REPLY: u8 = 14;

/// Packet-construction template. Source/destination addressing is supplied
/// at injection time; templates only carry the edge-case payload shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeTemplate {
    /// TCP SYN with an explicit raw option list. `seq_ack` overrides the
    /// randomized sequence/acknowledgement numbers (the CVE probe sends
    /// garbage ones on purpose).
    TcpSyn {
        options: &'static [TcpOptionSpec],
        urgent_ptr: u16,
        seq_ack: Option<(u32, u32)>,
    },
    /// Raw ICMP message; a body shorter than the type's mandated layout is
    /// sent truncated as-is.
    Icmp {
        icmp_type: u8,
        icmp_code: u8,
        body: &'static [u8],
    },
}

/// Field-rule matcher evaluated against a decoded response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMatcher {
    /// RST whose source/destination ports mirror the probe's pair
    TcpRstMirroringProbe,
    /// Echo reply with the code field zeroed out
    IcmpEchoCodeZeroed,
    /// Timestamp reply (to a request most stacks would drop)
    IcmpTimestampReply,
}

impl FieldMatcher {
    /// Evaluate the matcher. `probe_src`/`probe_dst` are the ports the probe
    /// was sent from and to.
    pub fn matches(&self, summary: &ResponseSummary, probe_src: u16, probe_dst: u16) -> bool {
        match self {
            FieldMatcher::TcpRstMirroringProbe => {
                summary.is_rst() && summary.mirrors_ports(probe_src, probe_dst)
            }
            FieldMatcher::IcmpEchoCodeZeroed => matches!(
                summary,
                ResponseSummary::Icmp {
                    icmp_type: ICMP_ECHO_REPLY,
                    icmp_code: 0,
                    from_target: true,
                }
            ),
            FieldMatcher::IcmpTimestampReply => matches!(
                summary,
                ResponseSummary::Icmp {
                    icmp_type: ICMP_TIMESTAMP_REPLY,
                    from_target: true,
                    ..
                }
            ),
        }
    }
}

/// Response-matching policy for a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseRule {
    /// Scores `weight` when any response arrives: the stack answered a
    /// packet a conformant stack would silently drop.
    Presence { weight: i32 },
    /// Scores `weight` when no response arrives: the stack silently dropped
    /// a packet a conformant stack would answer.
    Absence { weight: i32 },
    /// Scores `on_match` when a response arrives and the matcher accepts it,
    /// `on_mismatch` for any other response, zero on silence. A strong
    /// counter-signal carries a negative `on_mismatch`.
    Field {
        matcher: FieldMatcher,
        on_match: i32,
        on_mismatch: i32,
        /// The matched behavior is specific to the IPnet build shipped with
        /// VxWorks, not just to IPnet.
        marks_vxworks: bool,
    },
}

/// A single fingerprinting probe definition. Immutable once defined.
#[derive(Debug, Clone)]
pub struct Probe {
    pub name: &'static str,
    pub protocol: Protocol,
    pub template: ProbeTemplate,
    pub rule: ResponseRule,
    pub timeout: Duration,
}

// Option lists referenced by the TCP templates.
//
// MSS 1460, NOP, then a window-scale option with length 2 and no value (a
// conformant stack skips it and honors the valid one that follows).
static MALFORMED_OPTION_LIST: [TcpOptionSpec; 4] = [
    TcpOptionSpec { kind: TCP_OPTION_MSS, data: &[0x05, 0xb4] },
    TcpOptionSpec { kind: TCP_OPTION_NOP, data: &[] },
    TcpOptionSpec { kind: TCP_OPTION_WNDSCL, data: &[] },
    TcpOptionSpec { kind: TCP_OPTION_WNDSCL, data: &[0x00] },
];

// Lone malformed window-scale option used by the CVE probe.
static CVE_OPTION_LIST: [TcpOptionSpec; 1] =
    [TcpOptionSpec { kind: TCP_OPTION_WNDSCL, data: &[] }];

/// The fixed, ordered fingerprinting battery
pub static FINGERPRINT_PROBES: Lazy<Vec<Probe>> = Lazy::new(|| {
    vec![
        Probe {
            name: PROBE_TCP_MALFORMED_OPTIONS,
            protocol: Protocol::Tcp,
            template: ProbeTemplate::TcpSyn {
                options: &MALFORMED_OPTION_LIST,
                urgent_ptr: 0,
                seq_ack: None,
            },
            rule: ResponseRule::Field {
                matcher: FieldMatcher::TcpRstMirroringProbe,
                on_match: MALFORMED_OPTIONS_ON_MATCH,
                on_mismatch: MALFORMED_OPTIONS_ON_MISMATCH,
                marks_vxworks: true,
            },
            timeout: PROBE_TIMEOUT,
        },
        Probe {
            name: PROBE_ICMP_ECHO_NONZERO_CODE,
            protocol: Protocol::Icmp,
            template: ProbeTemplate::Icmp {
                icmp_type: ICMP_ECHO_REQUEST,
                icmp_code: 0x41,
                body: &[0, 0, 0, 0],
            },
            rule: ResponseRule::Field {
                matcher: FieldMatcher::IcmpEchoCodeZeroed,
                on_match: ECHO_CODE_ON_MATCH,
                on_mismatch: ECHO_CODE_ON_MISMATCH,
                marks_vxworks: false,
            },
            timeout: PROBE_TIMEOUT,
        },
        Probe {
            name: PROBE_ICMP_TRUNCATED_TIMESTAMP,
            protocol: Protocol::Icmp,
            template: ProbeTemplate::Icmp {
                icmp_type: ICMP_TIMESTAMP_REQUEST,
                icmp_code: 0,
                // id + sequence only; the three timestamp words are cut off
                body: &[0, 0, 0, 0],
            },
            rule: ResponseRule::Presence {
                weight: TRUNCATED_TIMESTAMP_WEIGHT,
            },
            timeout: PROBE_TIMEOUT,
        },
        Probe {
            name: PROBE_TCP_URGENT_WITHOUT_FLAG,
            protocol: Protocol::Tcp,
            template: ProbeTemplate::TcpSyn {
                options: &[],
                urgent_ptr: 0xffff,
                seq_ack: None,
            },
            rule: ResponseRule::Absence {
                weight: URGENT_SILENT_DROP_WEIGHT,
            },
            timeout: PROBE_TIMEOUT,
        },
    ]
});

/// The CVE-2019-12258 probe: a SYN with a malformed window-scale option and
/// garbage sequence numbers, injected onto an established connection's
/// 4-tuple. A vulnerable IPnet resets the connection without validating the
/// sequence numbers. Not part of the fingerprint score.
pub static CVE_2019_12258_PROBE: Lazy<Probe> = Lazy::new(|| Probe {
    name: PROBE_CVE_2019_12258,
    protocol: Protocol::Tcp,
    template: ProbeTemplate::TcpSyn {
        options: &CVE_OPTION_LIST,
        urgent_ptr: 0,
        seq_ack: Some((0x4141, 0x4141)),
    },
    rule: ResponseRule::Field {
        matcher: FieldMatcher::TcpRstMirroringProbe,
        on_match: 0,
        on_mismatch: 0,
        marks_vxworks: false,
    },
    timeout: PROBE_TIMEOUT,
});

/// Benign echo request used as the liveness follow-up after the CVE probe
pub static LIVENESS_PROBE: Lazy<Probe> = Lazy::new(|| Probe {
    name: PROBE_LIVENESS_ECHO,
    protocol: Protocol::Icmp,
    template: ProbeTemplate::Icmp {
        icmp_type: ICMP_ECHO_REQUEST,
        icmp_code: 0,
        body: &[0, 0, 0, 0],
    },
    rule: ResponseRule::Presence { weight: 0 },
    timeout: PROBE_TIMEOUT,
});
