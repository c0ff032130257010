//! Network module for packet crafting, raw sockets and capability interfaces

pub mod filter;
pub mod injector;
pub mod packet;
pub mod socket;

use pnet::packet::tcp::TcpFlags;
use serde::{Deserialize, Serialize};

/// Protocol enumeration for probe definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Icmp,
}

impl Protocol {
    pub fn number(&self) -> u8 {
        match self {
            Protocol::Tcp => 6,
            Protocol::Icmp => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Icmp => "icmp",
        }
    }
}

/// Transient per-probe summary of a decoded response. Consumed by the
/// classifier, never persisted.
///
/// An ICMP summary with `from_target: false` is an error message about the
/// probe from an intermediate hop (e.g. a router's destination-unreachable),
/// not the target stack answering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseSummary {
    Tcp {
        flags: u16,
        source_port: u16,
        dest_port: u16,
        window: u16,
    },
    Icmp {
        icmp_type: u8,
        icmp_code: u8,
        from_target: bool,
    },
}

impl ResponseSummary {
    /// Check whether a TCP response carries the RST flag
    pub fn is_rst(&self) -> bool {
        match self {
            ResponseSummary::Tcp { flags, .. } => flags & TcpFlags::RST != 0,
            ResponseSummary::Icmp { .. } => false,
        }
    }

    /// Check whether a TCP response mirrors the probe's port pair
    /// (its source is the port we probed, its destination is our source port)
    pub fn mirrors_ports(&self, probe_src: u16, probe_dst: u16) -> bool {
        match self {
            ResponseSummary::Tcp {
                source_port,
                dest_port,
                ..
            } => *source_port == probe_dst && *dest_port == probe_src,
            ResponseSummary::Icmp { .. } => false,
        }
    }

    /// Whether the response came from the probed stack itself. TCP responses
    /// are matched by 4-tuple before they reach the classifier.
    pub fn is_from_target(&self) -> bool {
        match self {
            ResponseSummary::Tcp { .. } => true,
            ResponseSummary::Icmp { from_target, .. } => *from_target,
        }
    }
}
