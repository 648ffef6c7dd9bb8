//! Server-side forwarder: serves HTTP/2 exchanges at the tunnel path and
//! relays each to a fixed backend TCP address.

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::{Request, Response, StatusCode};
use hyper::body::Incoming;
use hyper::server::conn::http2;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::config::TunnelConfig;
use crate::error::TunnelError;

use super::duplex::{self, TunnelBody};
use super::pump;
use super::tls;

/// How long in-flight exchanges get to finish after shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

struct ExchangeContext {
    path: String,
    backend_addr: String,
}

pub struct ServerForwarder {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    ctx: Arc<ExchangeContext>,
}

impl ServerForwarder {
    /// Binds the listener and, when both a certificate and key are
    /// configured, loads them into a TLS acceptor. Failures here are fatal.
    pub async fn bind(config: TunnelConfig) -> Result<Self, TunnelError> {
        let tls = match (&config.cert_file, &config.key_file) {
            (Some(cert), Some(key)) => Some(tls::server_acceptor(cert, key)?),
            _ => None,
        };

        let listener = TcpListener::bind(config.listen_addr.as_str())
            .await
            .map_err(|source| TunnelError::Bind {
                addr: config.listen_addr.clone(),
                source,
            })?;

        info!(
            listen = %config.listen_addr,
            backend = %config.peer_addr,
            path = %config.path,
            serve_tls = tls.is_some(),
            "server forwarder ready"
        );

        Ok(Self {
            listener,
            tls,
            ctx: Arc::new(ExchangeContext {
                path: config.path,
                backend_addr: config.peer_addr,
            }),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves HTTP/2 connections until `shutdown` resolves, then stops
    /// accepting and gives in-flight exchanges the grace period before
    /// aborting whatever remains.
    pub async fn serve(self, shutdown: impl Future<Output = ()>) -> Result<(), TunnelError> {
        let mut conns = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                res = self.listener.accept() => match res {
                    Ok((stream, peer)) => {
                        let tls = self.tls.clone();
                        let ctx = Arc::clone(&self.ctx);
                        conns.spawn(async move {
                            serve_connection(stream, peer, tls, ctx).await;
                        });
                    }
                    Err(e) => warn!(error = %e, "failed to accept connection"),
                },
                _ = &mut shutdown => {
                    info!("server forwarder shutting down");
                    break;
                }
            }
        }

        drop(self.listener);

        let drain = async {
            while conns.join_next().await.is_some() {}
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!(
                remaining = conns.len(),
                "grace period elapsed, aborting remaining exchanges"
            );
            conns.shutdown().await;
        }

        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    tls: Option<TlsAcceptor>,
    ctx: Arc<ExchangeContext>,
) {
    debug!(%peer, "accepted connection");
    match tls {
        Some(acceptor) => {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(%peer, error = %e, "tls handshake failed");
                    return;
                }
            };
            serve_h2(TokioIo::new(tls_stream), peer, ctx).await;
        }
        None => serve_h2(TokioIo::new(stream), peer, ctx).await,
    }
}

async fn serve_h2<I>(io: I, peer: SocketAddr, ctx: Arc<ExchangeContext>)
where
    I: hyper::rt::Read + hyper::rt::Write + Send + Unpin + 'static,
{
    let service = service_fn(move |req| handle_exchange(Arc::clone(&ctx), req));
    // An HTTP/1.1 peer fails the h2 handshake here; the exchange is
    // rejected rather than downgraded.
    if let Err(e) = http2::Builder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
    {
        debug!(%peer, error = %e, "connection closed with error");
    }
}

async fn handle_exchange(
    ctx: Arc<ExchangeContext>,
    req: Request<Incoming>,
) -> Result<Response<TunnelBody>, Infallible> {
    if req.uri().path() != ctx.path {
        debug!(path = %req.uri().path(), "rejecting exchange for unknown path");
        return Ok(status_response(StatusCode::NOT_FOUND));
    }

    let (tunnel, response) = match duplex::accept(req) {
        Ok(pair) => pair,
        Err(e) => {
            warn!(error = %e, "failed to accept tunnel exchange");
            return Ok(status_response(StatusCode::INTERNAL_SERVER_ERROR));
        }
    };

    match TcpStream::connect(ctx.backend_addr.as_str()).await {
        Ok(backend) => {
            tokio::spawn(async move {
                match pump::run(backend, tunnel).await {
                    Ok((sent, received)) => debug!(sent, received, "session finished"),
                    Err(e) => warn!(error = %e, "session ended with error"),
                }
            });
        }
        Err(e) => {
            // The 200 response still goes out; dropping the tunnel ends its
            // body immediately and nothing is forwarded.
            warn!(backend = %ctx.backend_addr, error = %e, "failed to dial backend");
            drop(tunnel);
        }
    }

    Ok(response)
}

fn status_response(status: StatusCode) -> Response<TunnelBody> {
    Response::builder()
        .status(status)
        .body(TunnelBody::empty())
        .unwrap()
}
