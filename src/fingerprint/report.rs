//! Score aggregation and the fingerprint verdict

use serde::{Deserialize, Serialize};

use crate::fingerprint::classifier::ClassifiedScore;

/// Total at or below this is a confident non-IPnet stack
pub const NOT_IPNET_THRESHOLD: i32 = -50;

/// Total at or above this is a confident IPnet stack. Chosen above the sum
/// an all-silent host can reach: absence of signal is not evidence of
/// absence, so a fully filtered target stays Inconclusive.
pub const IPNET_THRESHOLD: i32 = 100;

/// Discrete fingerprint verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    NotIPnet,
    Inconclusive,
    IPnetDetected,
    VxWorksIPnetDetected,
}

impl Verdict {
    /// Whether the verdict identifies the stack as IPnet
    pub fn is_ipnet(&self) -> bool {
        matches!(self, Verdict::IPnetDetected | Verdict::VxWorksIPnetDetected)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::NotIPnet => write!(f, "not IPnet"),
            Verdict::Inconclusive => write!(f, "inconclusive"),
            Verdict::IPnetDetected => write!(f, "IPnet detected"),
            Verdict::VxWorksIPnetDetected => write!(f, "VxWorks (IPnet) detected"),
        }
    }
}

/// Final fingerprint of one target. Constructed once by [`aggregate`];
/// never mutated afterwards — the total is always reproducible by summing
/// the listed contributions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintReport {
    pub host: String,
    pub port: u16,
    pub scores: Vec<ClassifiedScore>,
    pub total_score: i32,
    pub verdict: Verdict,
}

impl FingerprintReport {
    /// Re-derive the total from the listed contributions
    pub fn recomputed_total(&self) -> i32 {
        self.scores.iter().map(|s| s.contribution).sum()
    }
}

/// Sum the classified scores into a report with a verdict
pub fn aggregate(host: &str, port: u16, scores: Vec<ClassifiedScore>) -> FingerprintReport {
    let total_score: i32 = scores.iter().map(|s| s.contribution).sum();
    let vxworks_signal = scores.iter().any(|s| s.vxworks_signal);

    FingerprintReport {
        host: host.to_string(),
        port,
        verdict: verdict_for(total_score, vxworks_signal),
        total_score,
        scores,
    }
}

fn verdict_for(total_score: i32, vxworks_signal: bool) -> Verdict {
    if total_score <= NOT_IPNET_THRESHOLD {
        Verdict::NotIPnet
    } else if total_score < IPNET_THRESHOLD {
        Verdict::Inconclusive
    } else if vxworks_signal {
        Verdict::VxWorksIPnetDetected
    } else {
        Verdict::IPnetDetected
    }
}
