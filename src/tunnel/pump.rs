//! Moves bytes between one local connection and one tunnel stream until
//! either direction ends, then tears both down.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Copy buffer size for each direction.
const COPY_CHUNK: usize = 16 * 1024;

/// Runs one tunnel session: two concurrent copy tasks, local→tunnel and
/// tunnel→local.
///
/// The first direction to terminate, whether by clean end-of-input or an
/// I/O error, ends the session: the other task is aborted and awaited, and
/// all four half-handles are dropped, which closes both resources and
/// unblocks anything still waiting on them. Returns only after both tasks
/// have exited, with the byte counts (sent, received). Errors are terminal
/// for the session and never retried here.
pub async fn run<L, T>(local: L, tunnel: T) -> io::Result<(u64, u64)>
where
    L: AsyncRead + AsyncWrite + Send + 'static,
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let (local_rd, local_wr) = tokio::io::split(local);
    let (tunnel_rd, tunnel_wr) = tokio::io::split(tunnel);

    let sent = Arc::new(AtomicU64::new(0));
    let received = Arc::new(AtomicU64::new(0));

    let mut to_peer = tokio::spawn(copy_chunks(local_rd, tunnel_wr, Arc::clone(&sent)));
    let mut from_peer = tokio::spawn(copy_chunks(tunnel_rd, local_wr, Arc::clone(&received)));

    let first = tokio::select! {
        res = &mut to_peer => {
            trace!("local-to-peer direction finished first");
            from_peer.abort();
            let _ = from_peer.await;
            res
        }
        res = &mut from_peer => {
            trace!("peer-to-local direction finished first");
            to_peer.abort();
            let _ = to_peer.await;
            res
        }
    };

    let totals = (sent.load(Ordering::Relaxed), received.load(Ordering::Relaxed));
    match first {
        Ok(Ok(())) => Ok(totals),
        Ok(Err(e)) => Err(e),
        Err(e) => Err(io::Error::other(e)),
    }
}

async fn copy_chunks<R, W>(mut reader: R, mut writer: W, copied: Arc<AtomicU64>) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_CHUNK];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            // Propagate the half-close before the session is torn down.
            writer.shutdown().await?;
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        copied.fetch_add(n as u64, Ordering::Relaxed);
    }
}
