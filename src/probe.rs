//! Liveness probes.
//!
//! A probe answers "is the generator's endpoint reachable right now" within a
//! bounded time. Every infrastructure failure (spawn error, timeout, refused
//! connection) is reported as dead; there is no unknown state.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::{GeneratorConfig, MonitorConfig, ProbeMethod};

/// Answers whether a host is alive.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe `host` once. Never takes much longer than the configured timeout.
    async fn probe(&self, host: &str) -> bool;
}

/// ICMP echo via the system `ping` binary.
#[derive(Debug, Clone)]
pub struct IcmpProber {
    timeout: Duration,
}

impl IcmpProber {
    /// Create a prober with the given reply timeout.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Prober for IcmpProber {
    async fn probe(&self, host: &str) -> bool {
        if !is_safe_host(host) {
            warn!(host, "refusing to probe malformed host");
            return false;
        }
        // ping's -W takes whole seconds.
        let wait_secs = self.timeout.as_secs().max(1);
        let child = Command::new("ping")
            .args(["-c", "1", "-W", &wait_secs.to_string(), host])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        let grace = Duration::from_secs(wait_secs.saturating_add(1));
        match tokio::time::timeout(grace, child).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                warn!(error = %e, "failed to run ping");
                false
            }
            Err(_) => {
                debug!(host, "ping timed out");
                false
            }
        }
    }
}

/// TCP connect to a fixed port.
#[derive(Debug, Clone)]
pub struct TcpProber {
    port: u16,
    timeout: Duration,
}

impl TcpProber {
    /// Create a prober that connects to `port` within `timeout`.
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, host: &str) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect((host, self.port))).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                debug!(host, port = self.port, error = %e, "tcp probe failed");
                false
            }
            Err(_) => {
                debug!(host, port = self.port, "tcp probe timed out");
                false
            }
        }
    }
}

/// Build the prober selected by configuration.
pub fn from_config(generator: &GeneratorConfig, monitor: &MonitorConfig) -> Arc<dyn Prober> {
    let timeout = Duration::from_millis(monitor.probe_timeout_ms);
    match generator.probe {
        ProbeMethod::Icmp => Arc::new(IcmpProber::new(timeout)),
        ProbeMethod::Tcp => Arc::new(TcpProber::new(generator.tcp_port, timeout)),
    }
}

/// Hostnames and IP literals only; nothing that `ping` could read as a flag.
fn is_safe_host(host: &str) -> bool {
    !host.is_empty()
        && !host.starts_with('-')
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '_'))
}
