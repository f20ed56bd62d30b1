use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::Parser;

/// Jeux game server.
#[derive(Debug, Clone, Parser)]
#[command(name = "jeux", version, about)]
pub struct ServerConfig {
    /// Port to listen on (0 picks an ephemeral port).
    #[arg(short, long, env = "JEUX_PORT")]
    pub port: u16,

    /// Address to bind.
    #[arg(long, env = "JEUX_HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Give up waiting for service threads after this many seconds on
    /// shutdown. Waits indefinitely when unset.
    #[arg(long, env = "JEUX_DRAIN_TIMEOUT_SECS")]
    pub drain_timeout_secs: Option<u64>,

    /// Emit logs as JSON.
    #[arg(long, env = "JEUX_LOG_JSON")]
    pub log_json: bool,
}

impl ServerConfig {
    /// Loopback configuration on an ephemeral port.
    pub fn local() -> Self {
        Self {
            port: 0,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            drain_timeout_secs: None,
            log_json: false,
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout_secs.map(Duration::from_secs)
    }
}
