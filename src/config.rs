use std::path::PathBuf;

/// Configuration for one forwarder endpoint. Built once before the forwarder
/// starts and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Address the forwarder listens on (`host:port`).
    pub listen_addr: String,
    /// Peer address (`host:port`): the tunnel server for the client-side
    /// forwarder, the backend for the server-side forwarder.
    pub peer_addr: String,
    /// HTTP path the tunnel exchange is served at. Must match exactly on
    /// both endpoints, leading slash included.
    pub path: String,
    /// Client side: connect to the tunnel server over TLS.
    pub use_tls: bool,
    /// Client side: accept any server certificate.
    pub insecure_skip_verify: bool,
    /// Server side: TLS certificate chain (PEM).
    pub cert_file: Option<PathBuf>,
    /// Server side: TLS private key (PEM).
    pub key_file: Option<PathBuf>,
}

impl TunnelConfig {
    /// Whether the server-side forwarder terminates TLS. TLS is served only
    /// when both a certificate and a key are configured; otherwise the
    /// endpoint speaks cleartext HTTP/2 (h2c).
    pub fn serve_tls(&self) -> bool {
        self.cert_file.is_some() && self.key_file.is_some()
    }
}
