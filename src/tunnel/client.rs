//! Client-side forwarder: accepts local TCP connections and relays each
//! over a freshly opened HTTP/2 exchange.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use http::Uri;
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::config::TunnelConfig;
use crate::error::TunnelError;

use super::duplex::{self, TunnelClient};
use super::pump;
use super::tls;

pub struct ClientForwarder {
    listener: TcpListener,
    client: TunnelClient,
    url: Uri,
}

impl ClientForwarder {
    /// Binds the local listener and prepares the HTTP/2 client. A bind
    /// failure is fatal; an unbindable address will not become bindable
    /// without operator intervention.
    pub async fn bind(config: TunnelConfig) -> Result<Self, TunnelError> {
        let scheme = if config.use_tls { "https" } else { "http" };
        let url: Uri = format!("{}://{}{}", scheme, config.peer_addr, config.path)
            .parse()
            .map_err(|e| TunnelError::Config(format!("invalid tunnel url: {e}")))?;

        let connector = HttpsConnectorBuilder::new()
            .with_tls_config(tls::client_config(config.insecure_skip_verify))
            .https_or_http()
            .enable_http2()
            .build();
        // http2_only also applies to cleartext targets: plain http URLs are
        // carried over prior-knowledge h2c rather than HTTP/1.1.
        let client = Client::builder(TokioExecutor::new())
            .http2_only(true)
            .build(connector);

        let listener = TcpListener::bind(config.listen_addr.as_str())
            .await
            .map_err(|source| TunnelError::Bind {
                addr: config.listen_addr.clone(),
                source,
            })?;

        info!(
            listen = %config.listen_addr,
            url = %url,
            use_tls = config.use_tls,
            "client forwarder ready"
        );

        Ok(Self {
            listener,
            client,
            url,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts local connections until `shutdown` resolves. Each accepted
    /// connection runs its own session task; a failed dial closes only that
    /// connection. In-flight sessions are not cancelled by shutdown; they
    /// drain when their peers close.
    pub async fn serve(self, shutdown: impl Future<Output = ()>) -> Result<(), TunnelError> {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                res = self.listener.accept() => match res {
                    Ok((local, peer)) => {
                        debug!(%peer, "accepted local connection");
                        let client = self.client.clone();
                        let url = self.url.clone();
                        tokio::spawn(async move {
                            run_session(client, url, local, peer).await;
                        });
                    }
                    Err(e) => warn!(error = %e, "failed to accept local connection"),
                },
                _ = &mut shutdown => {
                    info!("client forwarder shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

async fn run_session(client: TunnelClient, url: Uri, local: TcpStream, peer: SocketAddr) {
    let tunnel = match duplex::open(&client, &url).await {
        Ok(tunnel) => tunnel,
        Err(e) => {
            // Dropping the local connection closes it; nothing was forwarded.
            warn!(%peer, error = %e, "failed to establish tunnel");
            return;
        }
    };

    match pump::run(local, tunnel).await {
        Ok((sent, received)) => debug!(%peer, sent, received, "session finished"),
        Err(e) => warn!(%peer, error = %e, "session ended with error"),
    }
}
