use std::{
    env,
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use crate::protocol::ProtocolVersion;

pub const DEFAULT_PORT: u16 = 4200;

/// Everything a [`Session`](crate::Session) needs to reach its server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub address: SocketAddr,
    /// Newest protocol revision offered in the handshake.
    pub client_version: ProtocolVersion,
    pub connect_timeout: Duration,
    /// Read and write timeout of pooled connections. `None` blocks indefinitely.
    pub io_timeout: Option<Duration>,
    pub max_idle_connections: usize,
    /// Where spooled tables create their private directories.
    pub spool_dir: PathBuf,
    /// Pause before the invalidation listener reconnects.
    pub listener_retry_delay: Duration,
}

impl SessionConfig {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            client_version: ProtocolVersion::CURRENT,
            connect_timeout: Duration::from_secs(10),
            io_timeout: Some(Duration::from_secs(60)),
            max_idle_connections: 4,
            spool_dir: env::temp_dir(),
            listener_retry_delay: Duration::from_secs(5),
        }
    }
}
