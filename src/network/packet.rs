//! Packet crafting and parsing for fingerprinting probes
//!
//! The builders emit complete IPv4 packets. TCP options are written as raw
//! bytes so that deliberately malformed encodings (wrong option length, no
//! value) survive into the wire image.

use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::{Ipv4Packet, MutableIpv4Packet};
use pnet::packet::tcp::{MutableTcpPacket, TcpPacket};
use pnet::packet::util;
use rand::Rng;
use std::net::Ipv4Addr;

use super::ResponseSummary;

const IP_HEADER_LEN: usize = 20;
const TCP_HEADER_LEN: usize = 20;
const ICMP_HEADER_LEN: usize = 4;

/// A raw TCP option as placed on the wire.
///
/// Kinds 0 (EOL) and 1 (NOP) are single-byte options; every other kind is
/// encoded as kind, length, value with length = 2 + value bytes. An empty
/// value on a kind that requires one (e.g. window scale) yields the
/// malformed length-2 encoding some probes rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpOptionSpec {
    pub kind: u8,
    pub data: &'static [u8],
}

pub const TCP_OPTION_EOL: u8 = 0;
pub const TCP_OPTION_NOP: u8 = 1;
pub const TCP_OPTION_MSS: u8 = 2;
pub const TCP_OPTION_WNDSCL: u8 = 3;

/// Encode an option list into the TCP options area, zero-padded to a
/// 4-octet boundary
pub fn encode_tcp_options(options: &[TcpOptionSpec]) -> Vec<u8> {
    let mut encoded = Vec::new();
    for opt in options {
        match opt.kind {
            TCP_OPTION_EOL | TCP_OPTION_NOP => encoded.push(opt.kind),
            kind => {
                encoded.push(kind);
                encoded.push(2 + opt.data.len() as u8);
                encoded.extend_from_slice(opt.data);
            }
        }
    }
    while encoded.len() % 4 != 0 {
        encoded.push(TCP_OPTION_EOL);
    }
    encoded
}

/// TCP probe builder for crafting edge-case SYN packets
pub struct TcpProbeBuilder {
    source_ip: Ipv4Addr,
    dest_ip: Ipv4Addr,
    source_port: u16,
    dest_port: u16,
    flags: u16,
    seq_num: u32,
    ack_num: u32,
    window_size: u16,
    urgent_ptr: u16,
    options: Vec<u8>,
}

impl TcpProbeBuilder {
    pub fn new(source_ip: Ipv4Addr, dest_ip: Ipv4Addr, source_port: u16, dest_port: u16) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            source_ip,
            dest_ip,
            source_port,
            dest_port,
            flags: 0,
            seq_num: rng.gen(),
            ack_num: 0,
            window_size: 65535,
            urgent_ptr: 0,
            options: Vec::new(),
        }
    }

    pub fn flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    pub fn seq_num(mut self, seq_num: u32) -> Self {
        self.seq_num = seq_num;
        self
    }

    pub fn ack_num(mut self, ack_num: u32) -> Self {
        self.ack_num = ack_num;
        self
    }

    /// Set the urgent pointer field. Deliberately independent of the URG
    /// flag: several probes set one without the other.
    pub fn urgent_ptr(mut self, urgent_ptr: u16) -> Self {
        self.urgent_ptr = urgent_ptr;
        self
    }

    pub fn options(mut self, options: &[TcpOptionSpec]) -> Self {
        self.options = encode_tcp_options(options);
        self
    }

    /// Build the complete IP + TCP packet
    pub fn build(self) -> Vec<u8> {
        let tcp_len = TCP_HEADER_LEN + self.options.len();
        let total_len = IP_HEADER_LEN + tcp_len;
        let mut packet_buf = vec![0u8; total_len];

        // Build IP header
        {
            let mut ip_packet = MutableIpv4Packet::new(&mut packet_buf[..IP_HEADER_LEN]).unwrap();
            ip_packet.set_version(4);
            ip_packet.set_header_length(5); // 5 * 4 = 20 bytes
            ip_packet.set_total_length(total_len as u16);
            ip_packet.set_identification(rand::thread_rng().gen());
            ip_packet.set_flags(2); // Don't fragment
            ip_packet.set_ttl(64);
            ip_packet.set_next_level_protocol(IpNextHeaderProtocols::Tcp);
            ip_packet.set_source(self.source_ip);
            ip_packet.set_destination(self.dest_ip);

            let checksum = pnet::packet::ipv4::checksum(&ip_packet.to_immutable());
            ip_packet.set_checksum(checksum);
        }

        // Build TCP header
        {
            let mut tcp_packet = MutableTcpPacket::new(&mut packet_buf[IP_HEADER_LEN..]).unwrap();
            tcp_packet.set_source(self.source_port);
            tcp_packet.set_destination(self.dest_port);
            tcp_packet.set_sequence(self.seq_num);
            tcp_packet.set_acknowledgement(self.ack_num);
            tcp_packet.set_data_offset((tcp_len / 4) as u8);
            tcp_packet.set_flags(self.flags);
            tcp_packet.set_window(self.window_size);
            tcp_packet.set_urgent_ptr(self.urgent_ptr);
        }

        // Raw option bytes, bypassing pnet's well-formed option encoder
        packet_buf[IP_HEADER_LEN + TCP_HEADER_LEN..].copy_from_slice(&self.options);

        // Checksum covers the full segment including the options area
        let checksum = {
            let tcp_packet = TcpPacket::new(&packet_buf[IP_HEADER_LEN..]).unwrap();
            pnet::packet::tcp::ipv4_checksum(&tcp_packet, &self.source_ip, &self.dest_ip)
        };
        let mut tcp_packet = MutableTcpPacket::new(&mut packet_buf[IP_HEADER_LEN..]).unwrap();
        tcp_packet.set_checksum(checksum);

        packet_buf
    }
}

/// ICMP probe builder for crafting edge-case (including truncated) messages
pub struct IcmpProbeBuilder {
    source_ip: Ipv4Addr,
    dest_ip: Ipv4Addr,
    icmp_type: u8,
    icmp_code: u8,
    body: Vec<u8>,
}

impl IcmpProbeBuilder {
    pub fn new(source_ip: Ipv4Addr, dest_ip: Ipv4Addr, icmp_type: u8, icmp_code: u8) -> Self {
        Self {
            source_ip,
            dest_ip,
            icmp_type,
            icmp_code,
            body: Vec::new(),
        }
    }

    /// Set the message body following the 4-byte ICMP header. A body shorter
    /// than the type's mandated layout produces a truncated message.
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Build the complete IP + ICMP packet
    pub fn build(self) -> Vec<u8> {
        let icmp_len = ICMP_HEADER_LEN + self.body.len();
        let total_len = IP_HEADER_LEN + icmp_len;
        let mut packet_buf = vec![0u8; total_len];

        // Build IP header
        {
            let mut ip_packet = MutableIpv4Packet::new(&mut packet_buf[..IP_HEADER_LEN]).unwrap();
            ip_packet.set_version(4);
            ip_packet.set_header_length(5);
            ip_packet.set_total_length(total_len as u16);
            ip_packet.set_identification(rand::thread_rng().gen());
            ip_packet.set_flags(2);
            ip_packet.set_ttl(64);
            ip_packet.set_next_level_protocol(IpNextHeaderProtocols::Icmp);
            ip_packet.set_source(self.source_ip);
            ip_packet.set_destination(self.dest_ip);

            let checksum = pnet::packet::ipv4::checksum(&ip_packet.to_immutable());
            ip_packet.set_checksum(checksum);
        }

        // ICMP header + body
        packet_buf[IP_HEADER_LEN] = self.icmp_type;
        packet_buf[IP_HEADER_LEN + 1] = self.icmp_code;
        packet_buf[IP_HEADER_LEN + 4..].copy_from_slice(&self.body);

        // util::checksum works on arbitrary-length messages, truncated ones
        // included; skipword 1 skips the checksum field itself
        let checksum = util::checksum(&packet_buf[IP_HEADER_LEN..], 1);
        packet_buf[IP_HEADER_LEN + 2..IP_HEADER_LEN + 4].copy_from_slice(&checksum.to_be_bytes());

        packet_buf
    }
}

/// Packet parser for analyzing received packets
pub struct PacketParser;

impl PacketParser {
    /// Parse a TCP packet from the probed target and extract the response
    /// summary. Packets from any other source are not a match.
    pub fn parse_tcp_response(packet: &[u8], target: Ipv4Addr) -> Option<ResponseSummary> {
        if packet.len() < IP_HEADER_LEN {
            return None;
        }

        let ip_packet = Ipv4Packet::new(packet)?;
        if ip_packet.get_next_level_protocol() != IpNextHeaderProtocols::Tcp
            || ip_packet.get_source() != target
        {
            return None;
        }

        let ip_header_len = (ip_packet.get_header_length() as usize) * 4;
        let tcp_packet = TcpPacket::new(packet.get(ip_header_len..)?)?;

        Some(ResponseSummary::Tcp {
            flags: tcp_packet.get_flags(),
            source_port: tcp_packet.get_source(),
            dest_port: tcp_packet.get_destination(),
            window: tcp_packet.get_window(),
        })
    }

    /// Parse an ICMP packet and extract the response summary. The summary
    /// records whether the sender was the probed target or an intermediate
    /// hop reporting an error.
    pub fn parse_icmp_response(packet: &[u8], target: Ipv4Addr) -> Option<ResponseSummary> {
        if packet.len() < IP_HEADER_LEN {
            return None;
        }

        let ip_packet = Ipv4Packet::new(packet)?;
        if ip_packet.get_next_level_protocol() != IpNextHeaderProtocols::Icmp {
            return None;
        }

        let ip_header_len = (ip_packet.get_header_length() as usize) * 4;
        let icmp_payload = packet.get(ip_header_len..)?;
        if icmp_payload.len() < 2 {
            return None;
        }

        Some(ResponseSummary::Icmp {
            icmp_type: icmp_payload[0],
            icmp_code: icmp_payload[1],
            from_target: ip_packet.get_source() == target,
        })
    }
}
