//! Raw socket management for probe injection and response capture

use crate::DetectError;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

/// Raw socket wrapper for sending crafted packets and receiving replies
pub struct RawSocket {
    socket: Socket,
    _protocol: Protocol,
}

impl RawSocket {
    /// Create a new raw TCP socket
    pub fn new_tcp() -> crate::Result<Self> {
        Self::new(Protocol::TCP)
    }

    /// Create a new raw ICMP socket
    pub fn new_icmp() -> crate::Result<Self> {
        Self::new(Protocol::ICMPV4)
    }

    fn new(protocol: Protocol) -> crate::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::from(libc::SOCK_RAW), Some(protocol))
            .map_err(|e| {
                if e.kind() == io::ErrorKind::PermissionDenied {
                    DetectError::PermissionError("Permission denied for raw socket".to_string())
                } else {
                    DetectError::RawSocketError(e.to_string())
                }
            })?;

        // Probe packets carry their own IP header
        socket
            .set_header_included(true)
            .map_err(|e| DetectError::RawSocketError(e.to_string()))?;

        socket
            .set_nonblocking(true)
            .map_err(|e| DetectError::RawSocketError(e.to_string()))?;

        Ok(Self {
            socket,
            _protocol: protocol,
        })
    }

    /// Send a raw packet to the specified destination
    pub fn send_to(&self, packet: &[u8], dest: SocketAddr) -> crate::Result<usize> {
        let bytes_sent = self
            .socket
            .send_to(packet, &dest.into())
            .map_err(|e| DetectError::NetworkError(e.to_string()))?;
        Ok(bytes_sent)
    }

    /// Receive a packet from the socket, non-blocking
    ///
    /// Returns Ok(None) when no data is currently available.
    pub fn try_recv(&self, buf: &mut [u8]) -> crate::Result<Option<usize>> {
        use std::mem::MaybeUninit;

        let mut uninit_buf: Vec<MaybeUninit<u8>> = vec![MaybeUninit::uninit(); buf.len()];

        match self.socket.recv_from(&mut uninit_buf) {
            Ok((size, _addr)) => {
                if size > buf.len() {
                    return Err(DetectError::RawSocketError(
                        "Received size exceeds buffer length".to_string(),
                    ));
                }
                for i in 0..size {
                    buf[i] = unsafe { uninit_buf[i].assume_init() };
                }
                Ok(Some(size))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(DetectError::RawSocketError(format!(
                "Socket receive error: {}",
                e
            ))),
        }
    }

}

/// Determine the local source address the kernel would use to reach the
/// target. No packet is sent: connecting a UDP socket only selects a route.
pub fn local_source_ip(target: Ipv4Addr) -> crate::Result<Ipv4Addr> {
    let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))
        .map_err(|e| DetectError::NetworkError(e.to_string()))?;
    socket
        .connect(SocketAddrV4::new(target, 53))
        .map_err(|e| DetectError::NetworkError(e.to_string()))?;
    match socket
        .local_addr()
        .map_err(|e| DetectError::NetworkError(e.to_string()))?
    {
        SocketAddr::V4(addr) => Ok(*addr.ip()),
        SocketAddr::V6(_) => Err(DetectError::InvalidTarget(
            "IPv6 targets are not supported".to_string(),
        )),
    }
}
