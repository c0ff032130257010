//! FilterScope capability: keep the local kernel out of the conversation
//!
//! Injected probes are answered by the remote stack, but the local kernel
//! sees the replies too and, having no connection state for them, answers
//! with RSTs of its own. While a scope is active those RSTs are suppressed
//! so that only the remote stack's behavior is observed.

use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::process::Command;

use crate::DetectError;

/// Scoped suppression of the local stack's automatic replies.
///
/// Acquired once before the first probe and released on every exit path.
/// Release must be idempotent and safe to call even if acquisition
/// partially failed.
pub trait FilterScope: Send {
    fn acquire(&mut self) -> crate::Result<()>;
    fn release(&mut self);

    /// The local source port reserved for probing while the scope is active
    fn source_port(&self) -> u16;
}

/// iptables-backed implementation of [`FilterScope`]
///
/// Reserves a free local port by holding a bound listener on it (so no
/// local service can land there mid-run), then inserts an OUTPUT rule
/// dropping RSTs the kernel emits from that port. The rule is deleted on
/// release; a `Drop` impl backstops the release on panic/early-return
/// paths.
pub struct IptablesFilterScope {
    listener: Option<TcpListener>,
    port: u16,
    rule_active: bool,
}

impl IptablesFilterScope {
    pub fn new() -> Self {
        Self {
            listener: None,
            port: 0,
            rule_active: false,
        }
    }

    fn rule_args(port: u16, action: &str) -> Vec<String> {
        vec![
            action.to_string(),
            "OUTPUT".to_string(),
            "-p".to_string(),
            "tcp".to_string(),
            "--sport".to_string(),
            port.to_string(),
            "--tcp-flags".to_string(),
            "RST".to_string(),
            "RST".to_string(),
            "-j".to_string(),
            "DROP".to_string(),
        ]
    }

    fn run_iptables(args: &[String]) -> crate::Result<()> {
        let output = Command::new("iptables")
            .args(args)
            .output()
            .map_err(|e| DetectError::FilterError(format!("failed to run iptables: {}", e)))?;

        if !output.status.success() {
            return Err(DetectError::FilterError(format!(
                "iptables exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

impl Default for IptablesFilterScope {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterScope for IptablesFilterScope {
    fn acquire(&mut self) -> crate::Result<()> {
        // Bind port 0 to let the kernel pick a free port, then keep holding
        // it for the lifetime of the scope
        let listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))
            .map_err(|e| DetectError::FilterError(format!("failed to reserve source port: {}", e)))?;
        self.port = listener
            .local_addr()
            .map_err(|e| DetectError::FilterError(e.to_string()))?
            .port();
        self.listener = Some(listener);

        Self::run_iptables(&Self::rule_args(self.port, "-I"))?;
        self.rule_active = true;
        log::info!("filter scope active on source port {}", self.port);
        Ok(())
    }

    fn release(&mut self) {
        if self.rule_active {
            if let Err(e) = Self::run_iptables(&Self::rule_args(self.port, "-D")) {
                log::error!("failed to remove iptables rule for port {}: {}", self.port, e);
            }
            self.rule_active = false;
        }
        self.listener = None;
    }

    fn source_port(&self) -> u16 {
        self.port
    }
}

impl Drop for IptablesFilterScope {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_args_shape() {
        let args = IptablesFilterScope::rule_args(40123, "-I");
        assert_eq!(args[0], "-I");
        assert!(args.contains(&"40123".to_string()));
        assert!(args.contains(&"DROP".to_string()));

        let delete = IptablesFilterScope::rule_args(40123, "-D");
        assert_eq!(delete[0], "-D");
        assert_eq!(&args[1..], &delete[1..]);
    }

    #[test]
    fn test_release_without_acquire_is_noop() {
        let mut scope = IptablesFilterScope::new();
        scope.release();
        scope.release();
        assert_eq!(scope.source_port(), 0);
    }
}
