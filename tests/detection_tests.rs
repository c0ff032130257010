//! Integration tests for the detection engine using injector and filter
//! scope doubles

use async_trait::async_trait;
use pnet::packet::tcp::TcpFlags;
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vxprobe::config::DetectConfig;
use vxprobe::engine::DetectEngine;
use vxprobe::network::filter::FilterScope;
use vxprobe::network::injector::{PacketInjector, ProbeShot};
use vxprobe::network::ResponseSummary;
use vxprobe::{DetectError, Verdict};

const SRC_PORT: u16 = 40000;
const DST_PORT: u16 = 502;

#[derive(Clone)]
enum MockReply {
    Respond(ResponseSummary),
    Timeout,
    Fail,
    /// Never resolves; used to force a deadline abort
    Hang,
}

struct MockInjector {
    replies: Mutex<VecDeque<MockReply>>,
    calls: Arc<AtomicUsize>,
}

impl MockInjector {
    fn new(replies: Vec<MockReply>) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                replies: Mutex::new(replies.into()),
                calls: calls.clone(),
            },
            calls,
        )
    }
}

#[async_trait]
impl PacketInjector for MockInjector {
    async fn send_probe(
        &self,
        _shot: ProbeShot<'_>,
        _timeout: Duration,
    ) -> vxprobe::DetectResult<Option<ResponseSummary>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(MockReply::Timeout);
        match reply {
            MockReply::Respond(summary) => Ok(Some(summary)),
            MockReply::Timeout => Ok(None),
            MockReply::Fail => Err(DetectError::NetworkError("send failed".to_string())),
            MockReply::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

struct CountingFilter {
    acquired: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
    fail_acquire: bool,
}

impl CountingFilter {
    fn new(fail_acquire: bool) -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let acquired = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicUsize::new(0));
        (
            Self {
                acquired: acquired.clone(),
                released: released.clone(),
                fail_acquire,
            },
            acquired,
            released,
        )
    }
}

impl FilterScope for CountingFilter {
    fn acquire(&mut self) -> vxprobe::Result<()> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        if self.fail_acquire {
            Err(DetectError::FilterError("iptables unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn release(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    fn source_port(&self) -> u16 {
        SRC_PORT
    }
}

fn test_config() -> DetectConfig {
    DetectConfig::new("192.0.2.10".to_string(), DST_PORT).with_timeout(50)
}

fn target_ip() -> Ipv4Addr {
    "192.0.2.10".parse().unwrap()
}

fn rst_mirroring_probe() -> MockReply {
    MockReply::Respond(ResponseSummary::Tcp {
        flags: TcpFlags::RST,
        source_port: DST_PORT,
        dest_port: SRC_PORT,
        window: 0,
    })
}

fn echo_reply_code_zeroed() -> MockReply {
    MockReply::Respond(ResponseSummary::Icmp {
        icmp_type: 0,
        icmp_code: 0,
        from_target: true,
    })
}

fn timestamp_reply() -> MockReply {
    MockReply::Respond(ResponseSummary::Icmp {
        icmp_type: 14,
        icmp_code: 0,
        from_target: true,
    })
}

/// The documented IPnet/VxWorks signature: RST on malformed options, echo
/// reply with zeroed code, timestamp reply to the truncated request,
/// silence on the stray urgent pointer.
fn vxworks_signature() -> Vec<MockReply> {
    vec![
        rst_mirroring_probe(),
        echo_reply_code_zeroed(),
        timestamp_reply(),
        MockReply::Timeout,
    ]
}

#[tokio::test]
async fn test_full_signature_yields_vxworks_verdict() {
    let (injector, _) = MockInjector::new(vxworks_signature());
    let (filter, _, released) = CountingFilter::new(false);
    let mut engine = DetectEngine::with_parts(test_config(), target_ip(), injector, filter);

    let report = engine.run().await.unwrap();

    assert_eq!(report.fingerprint.verdict, Verdict::VxWorksIPnetDetected);
    assert_eq!(report.fingerprint.total_score, 240);
    assert_eq!(
        report.fingerprint.total_score,
        report.fingerprint.recomputed_total()
    );
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_all_drops_are_inconclusive_not_negative() {
    // A default-silent firewall answers nothing; absence of signal is not
    // evidence of absence
    let (injector, _) = MockInjector::new(vec![
        MockReply::Timeout,
        MockReply::Timeout,
        MockReply::Timeout,
        MockReply::Timeout,
    ]);
    let (filter, _, released) = CountingFilter::new(false);
    let mut engine = DetectEngine::with_parts(test_config(), target_ip(), injector, filter);

    let report = engine.run().await.unwrap();

    assert_eq!(report.fingerprint.verdict, Verdict::Inconclusive);
    assert_ne!(report.fingerprint.verdict, Verdict::NotIPnet);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_conformant_stack_yields_not_ipnet() {
    // SYN/ACKs everywhere, echo reply preserving the bogus code, no
    // timestamp reply
    let synack = MockReply::Respond(ResponseSummary::Tcp {
        flags: TcpFlags::SYN | TcpFlags::ACK,
        source_port: DST_PORT,
        dest_port: SRC_PORT,
        window: 29200,
    });
    let (injector, _) = MockInjector::new(vec![
        synack.clone(),
        MockReply::Respond(ResponseSummary::Icmp {
            icmp_type: 0,
            icmp_code: 0x41,
            from_target: true,
        }),
        MockReply::Timeout,
        synack,
    ]);
    let (filter, _, _) = CountingFilter::new(false);
    let mut engine = DetectEngine::with_parts(test_config(), target_ip(), injector, filter);

    let report = engine.run().await.unwrap();

    // -100 - 20 + 0 + 0
    assert_eq!(report.fingerprint.total_score, -120);
    assert_eq!(report.fingerprint.verdict, Verdict::NotIPnet);
}

#[tokio::test]
async fn test_send_failure_is_reported_and_run_completes() {
    let (injector, _) = MockInjector::new(vec![
        rst_mirroring_probe(),
        MockReply::Fail,
        timestamp_reply(),
        MockReply::Timeout,
    ]);
    let (filter, _, released) = CountingFilter::new(false);
    let mut engine = DetectEngine::with_parts(test_config(), target_ip(), injector, filter);

    let report = engine.run().await.unwrap();

    // The failed probe appears in the report with a neutral contribution
    assert_eq!(report.fingerprint.scores.len(), 4);
    let failed = &report.fingerprint.scores[1];
    assert_eq!(failed.contribution, 0);
    assert!(failed.rationale.contains("send failed"));

    // 100 + 0 + 90 + 30
    assert_eq!(report.fingerprint.total_score, 220);
    assert_eq!(report.fingerprint.verdict, Verdict::VxWorksIPnetDetected);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_deadline_abort_still_releases_filter() {
    let (injector, _) = MockInjector::new(vec![MockReply::Hang]);
    let (filter, _, released) = CountingFilter::new(false);
    let mut config = test_config().with_timeout(10);
    config.deadline_margin = 20;
    let mut engine = DetectEngine::with_parts(config, target_ip(), injector, filter);

    let result = engine.run().await;

    assert!(matches!(result, Err(DetectError::DeadlineExceeded)));
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_filter_acquisition_failure_is_fatal() {
    let (injector, calls) = MockInjector::new(vxworks_signature());
    let (filter, acquired, released) = CountingFilter::new(true);
    let mut engine = DetectEngine::with_parts(test_config(), target_ip(), injector, filter);

    let result = engine.run().await;

    assert!(matches!(result, Err(DetectError::FilterError(_))));
    assert_eq!(acquired.load(Ordering::SeqCst), 1);
    // Released exactly once even though acquisition failed
    assert_eq!(released.load(Ordering::SeqCst), 1);
    // Not a single probe went out
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_identical_inputs_give_identical_reports() {
    let mut fingerprints = Vec::new();
    for _ in 0..2 {
        let (injector, _) = MockInjector::new(vxworks_signature());
        let (filter, _, _) = CountingFilter::new(false);
        let mut engine = DetectEngine::with_parts(test_config(), target_ip(), injector, filter);
        fingerprints.push(engine.run().await.unwrap().fingerprint);
    }
    assert_eq!(fingerprints[0], fingerprints[1]);
}

#[tokio::test]
async fn test_vuln_check_not_run_by_default() {
    let (injector, calls) = MockInjector::new(vxworks_signature());
    let (filter, _, _) = CountingFilter::new(false);
    let mut engine = DetectEngine::with_parts(test_config(), target_ip(), injector, filter);

    let report = engine.run().await.unwrap();

    assert!(report.vulnerability.is_none());
    // Exactly the four fingerprint probes, nothing else
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_vuln_check_gated_on_ipnet_fingerprint() {
    // All probes drop: the fingerprint is inconclusive, so the destructive
    // probe must never leave the machine even when requested
    let (injector, calls) = MockInjector::new(vec![
        MockReply::Timeout,
        MockReply::Timeout,
        MockReply::Timeout,
        MockReply::Timeout,
    ]);
    let (filter, _, _) = CountingFilter::new(false);
    let config = test_config().with_vuln_check(true);
    let mut engine = DetectEngine::with_parts(config, target_ip(), injector, filter);

    let report = engine.run().await.unwrap();

    assert_eq!(report.fingerprint.verdict, Verdict::Inconclusive);
    assert_eq!(
        report.vulnerability,
        Some(vxprobe::VulnerabilityVerdict::Inconclusive)
    );
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}
