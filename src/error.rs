use std::io;

use http::StatusCode;
use thiserror::Error;

/// Errors produced by the tunnel forwarders.
///
/// `Bind`, `Tls` and `Config` are fatal at startup. `Connect`,
/// `PeerRejected` and `Accept` are per-session: the owning forwarder logs
/// them and aborts only that session. Nothing here is ever retried.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: hyper_util::client::legacy::Error,
    },

    #[error("peer rejected tunnel with status {0}")]
    PeerRejected(StatusCode),

    #[error("failed to accept tunnel exchange: {0}")]
    Accept(String),

    #[error("invalid tunnel configuration: {0}")]
    Config(String),

    #[error("tls setup failed: {0}")]
    Tls(String),
}
