//! One HTTP/2 exchange presented as a bidirectional byte stream.
//!
//! The request body carries one direction and the response body the other,
//! so a single request/response pair behaves like an open TCP connection.
//! On the client the request body is the only writable channel toward the
//! peer and the response body the only readable one; on the server it is
//! the other way around. [`DuplexStream`] hides that asymmetry behind
//! `AsyncRead + AsyncWrite`.
//!
//! Flow control and framing are left entirely to hyper's HTTP/2 layer; the
//! only buffering here is the bounded chunk channel feeding the outbound
//! body and at most one partially consumed inbound data frame.

use std::convert::Infallible;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::{Method, Request, Response, StatusCode, Uri, Version};
use http_body::{Body, Frame};
use hyper::body::Incoming;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio_util::sync::PollSender;

use crate::error::TunnelError;

/// Outbound chunks queued between the writer half and hyper.
const OUTBOUND_BUFFER: usize = 8;

/// Largest chunk handed to the HTTP/2 layer in one body frame.
const MAX_FRAME_CHUNK: usize = 16 * 1024;

/// HTTP client used to open tunnel exchanges.
pub(crate) type TunnelClient = Client<HttpsConnector<HttpConnector>, TunnelBody>;

/// Streaming request/response body fed by a bounded channel.
///
/// The body ends (END_STREAM on the wire) once the sending half is closed
/// and all queued chunks have been drained.
pub struct TunnelBody {
    rx: Option<mpsc::Receiver<Bytes>>,
}

impl TunnelBody {
    pub(crate) fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self { rx: Some(rx) }
    }

    /// A body that is already at end-of-stream. Used for responses that
    /// reject an exchange instead of upgrading it.
    pub fn empty() -> Self {
        Self { rx: None }
    }
}

impl Body for TunnelBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let Some(rx) = self.get_mut().rx.as_mut() else {
            return Poll::Ready(None);
        };
        match rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => Poll::Ready(Some(Ok(Frame::data(chunk)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.rx.is_none()
    }
}

/// Readable half: the inbound body of the exchange.
pub struct BodyReader {
    body: Incoming,
    chunk: Bytes,
}

impl AsyncRead for BodyReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.chunk.is_empty() {
                let n = this.chunk.len().min(buf.remaining());
                buf.put_slice(&this.chunk.split_to(n));
                return Poll::Ready(Ok(()));
            }
            match Pin::new(&mut this.body).poll_frame(cx) {
                Poll::Ready(Some(Ok(frame))) => {
                    // Trailer frames carry no tunnel payload.
                    if let Ok(data) = frame.into_data() {
                        this.chunk = data;
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, e)));
                }
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Writable half: feeds the outbound body of the exchange.
pub struct BodyWriter {
    tx: PollSender<Bytes>,
}

impl AsyncWrite for BodyWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match this.tx.poll_reserve(cx) {
            Poll::Ready(Ok(())) => {}
            Poll::Ready(Err(_)) => return Poll::Ready(Err(closed())),
            Poll::Pending => return Poll::Pending,
        }
        let n = buf.len().min(MAX_FRAME_CHUNK);
        match this.tx.send_item(Bytes::copy_from_slice(&buf[..n])) {
            Ok(()) => Poll::Ready(Ok(n)),
            Err(_) => Poll::Ready(Err(closed())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Chunks are handed to hyper as soon as it polls the body.
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Idempotent; ends the outbound body without touching the inbound
        // direction, so a half-closed exchange stays readable.
        self.get_mut().tx.close();
        Poll::Ready(Ok(()))
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "tunnel exchange closed")
}

/// A bidirectional byte channel built from one HTTP/2 request/response pair.
pub struct DuplexStream {
    reader: BodyReader,
    writer: BodyWriter,
}

impl DuplexStream {
    fn new(inbound: Incoming, outbound: mpsc::Sender<Bytes>) -> Self {
        Self {
            reader: BodyReader {
                body: inbound,
                chunk: Bytes::new(),
            },
            writer: BodyWriter {
                tx: PollSender::new(outbound),
            },
        }
    }

    /// Splits the stream into independently owned read and write halves.
    pub fn into_split(self) -> (BodyReader, BodyWriter) {
        (self.reader, self.writer)
    }
}

impl AsyncRead for DuplexStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().reader).poll_read(cx, buf)
    }
}

impl AsyncWrite for DuplexStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().writer).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_shutdown(cx)
    }
}

/// Opens a tunnel exchange to `url` (client side).
///
/// The request body is streamed lazily; the response body becomes the
/// inbound direction. Any response status other than 200 is treated as a
/// rejection and the exchange is torn down, never returned as a healthy
/// stream.
pub(crate) async fn open(client: &TunnelClient, url: &Uri) -> Result<DuplexStream, TunnelError> {
    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
    let req = Request::builder()
        .method(Method::POST)
        .uri(url.clone())
        .body(TunnelBody::new(rx))
        .unwrap();

    let resp = client
        .request(req)
        .await
        .map_err(|source| TunnelError::Connect {
            url: url.to_string(),
            source,
        })?;

    if resp.status() != StatusCode::OK {
        return Err(TunnelError::PeerRejected(resp.status()));
    }

    Ok(DuplexStream::new(resp.into_body(), tx))
}

/// Upgrades an inbound exchange to a duplex stream (server side).
///
/// Returns the stream together with the status-200 response that begins
/// it; the caller sends the response and owns the stream from then on.
pub(crate) fn accept(
    req: Request<Incoming>,
) -> Result<(DuplexStream, Response<TunnelBody>), TunnelError> {
    if req.version() != Version::HTTP_2 {
        return Err(TunnelError::Accept(format!(
            "peer speaks {:?}, not HTTP/2",
            req.version()
        )));
    }

    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
    let stream = DuplexStream::new(req.into_body(), tx);
    let response = Response::builder()
        .status(StatusCode::OK)
        .body(TunnelBody::new(rx))
        .unwrap();

    Ok((stream, response))
}
