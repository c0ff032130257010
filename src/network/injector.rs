//! PacketInjector capability: send one crafted probe, await a matching reply
//!
//! The production implementation drives raw sockets directly so the probes
//! bypass the local kernel's TCP/IP stack. Everything above this interface
//! is network-free and testable with doubles.

use async_trait::async_trait;
use pnet::packet::tcp::TcpFlags;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};

use crate::fingerprint::catalog::ProbeTemplate;
use crate::network::packet::{IcmpProbeBuilder, PacketParser, TcpProbeBuilder};
use crate::network::socket::RawSocket;
use crate::network::ResponseSummary;
use crate::DetectResult;

/// One concrete injection of a probe template: the template plus the port
/// pair it is fired on. ICMP templates ignore the ports.
#[derive(Debug, Clone, Copy)]
pub struct ProbeShot<'a> {
    pub template: &'a ProbeTemplate,
    pub src_port: u16,
    pub dst_port: u16,
}

/// Capability interface for raw probe injection.
///
/// `Ok(None)` means no matching response arrived within the timeout; `Err`
/// means the probe could not be sent at all.
#[async_trait]
pub trait PacketInjector: Send + Sync {
    async fn send_probe(
        &self,
        shot: ProbeShot<'_>,
        timeout: Duration,
    ) -> DetectResult<Option<ResponseSummary>>;
}

/// Raw-socket implementation of [`PacketInjector`]
pub struct RawSocketInjector {
    source_ip: Ipv4Addr,
    target_ip: Ipv4Addr,
    tcp_socket: RawSocket,
    icmp_socket: RawSocket,
}

/// Poll interval while waiting for a matching reply
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(1);

impl RawSocketInjector {
    /// Open the raw TCP and ICMP sockets for a target. Requires
    /// CAP_NET_RAW; a permission failure here is fatal for the whole run.
    pub fn new(source_ip: Ipv4Addr, target_ip: Ipv4Addr) -> crate::Result<Self> {
        Ok(Self {
            source_ip,
            target_ip,
            tcp_socket: RawSocket::new_tcp()?,
            icmp_socket: RawSocket::new_icmp()?,
        })
    }

    fn build_packet(&self, shot: &ProbeShot<'_>) -> Vec<u8> {
        match shot.template {
            ProbeTemplate::TcpSyn {
                options,
                urgent_ptr,
                seq_ack,
            } => {
                let mut builder =
                    TcpProbeBuilder::new(self.source_ip, self.target_ip, shot.src_port, shot.dst_port)
                        .flags(TcpFlags::SYN)
                        .urgent_ptr(*urgent_ptr)
                        .options(options);
                if let Some((seq, ack)) = seq_ack {
                    builder = builder.seq_num(*seq).ack_num(*ack);
                }
                builder.build()
            }
            ProbeTemplate::Icmp {
                icmp_type,
                icmp_code,
                body,
            } => IcmpProbeBuilder::new(self.source_ip, self.target_ip, *icmp_type, *icmp_code)
                .body(body.to_vec())
                .build(),
        }
    }

    /// Wait for a reply that matches the shot, discarding unrelated traffic
    async fn await_response(
        &self,
        shot: &ProbeShot<'_>,
        deadline: Instant,
    ) -> Option<ResponseSummary> {
        let socket = match shot.template {
            ProbeTemplate::TcpSyn { .. } => &self.tcp_socket,
            ProbeTemplate::Icmp { .. } => &self.icmp_socket,
        };
        let mut buf = [0u8; 1500];

        while Instant::now() < deadline {
            match socket.try_recv(&mut buf) {
                Ok(Some(size)) => {
                    if let Some(summary) = self.match_response(shot, &buf[..size]) {
                        return Some(summary);
                    }
                }
                Ok(None) => tokio::time::sleep(RECV_POLL_INTERVAL).await,
                Err(e) => {
                    log::warn!("receive error while awaiting probe response: {}", e);
                    tokio::time::sleep(RECV_POLL_INTERVAL).await;
                }
            }
        }
        None
    }

    fn match_response(&self, shot: &ProbeShot<'_>, packet: &[u8]) -> Option<ResponseSummary> {
        match shot.template {
            ProbeTemplate::TcpSyn { .. } => {
                let summary = PacketParser::parse_tcp_response(packet, self.target_ip)?;
                if summary.mirrors_ports(shot.src_port, shot.dst_port) {
                    Some(summary)
                } else {
                    None
                }
            }
            ProbeTemplate::Icmp { .. } => {
                let summary = PacketParser::parse_icmp_response(packet, self.target_ip)?;
                match summary {
                    // Anything the target sends back is a match
                    ResponseSummary::Icmp { from_target: true, .. } => Some(summary),
                    // From other hops only delivery errors are of interest
                    ResponseSummary::Icmp { icmp_type: 3, .. }
                    | ResponseSummary::Icmp { icmp_type: 11, .. } => Some(summary),
                    _ => None,
                }
            }
        }
    }
}

#[async_trait]
impl PacketInjector for RawSocketInjector {
    async fn send_probe(
        &self,
        shot: ProbeShot<'_>,
        timeout: Duration,
    ) -> DetectResult<Option<ResponseSummary>> {
        let packet = self.build_packet(&shot);
        let dest = SocketAddr::V4(SocketAddrV4::new(self.target_ip, shot.dst_port));

        let socket = match shot.template {
            ProbeTemplate::TcpSyn { .. } => &self.tcp_socket,
            ProbeTemplate::Icmp { .. } => &self.icmp_socket,
        };
        socket.send_to(&packet, dest)?;
        log::debug!(
            "injected {} byte probe to {}:{}",
            packet.len(),
            self.target_ip,
            shot.dst_port
        );

        let deadline = Instant::now() + timeout;
        Ok(self.await_response(&shot, deadline).await)
    }
}
