//! # Connection Worker
//!
//! Own one client socket: wait for input, frame lines, dispatch them to the
//! command parser and write replies back.
//!
//! ## State Machine
//!
//! ```text
//! WAIT_READABLE -> READ_LINE -> DISPATCH -> WRITE_REPLY -> WAIT_READABLE
//!       |
//!       +--> CLOSED (stop flag, peer disconnect, I/O error)
//! ```
//!
//! ## Notes
//! - Each wait, reads and reply writes alike, is bounded by the poll interval
//!   and raced against the worker stop flag, so shutdown never waits on an
//!   idle client or on one that stopped reading.
//! - A reply the peer does not drain within the poll interval closes the
//!   connection.
//! - Several lines arriving in one read are handled in order; an incomplete
//!   line stays buffered until its terminator shows up.
//! - Failures end this connection only.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, trace, warn};

use lkv_common::protocol::LINE_TERMINATOR;
use lkv_common::{KvError, KvErrorCategory, KvResult, StopFlag};
use lkv_engine::KvStore;

use crate::metrics::ServerMetrics;
use crate::protocol::execute;
use crate::registry::WorkerId;

const READ_CHUNK: usize = 4096;

/// Everything a worker needs besides its socket.
#[derive(Clone)]
pub struct ConnectionContext {
    pub store: Arc<dyn KvStore>,
    pub stop: StopFlag,
    pub metrics: Arc<ServerMetrics>,
    pub poll_interval: Duration,
    pub max_line_len: usize,
}

/// Why a connection loop ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The worker stop flag was set.
    Stopped,
    /// The client closed its side of the stream.
    PeerClosed,
}

/// Worker entry point: serves `stream` and logs how it ended.
pub async fn run_worker(id: WorkerId, stream: TcpStream, peer: SocketAddr, ctx: ConnectionContext) {
    ctx.metrics.record_connection_open();
    match handle_connection(stream, &ctx).await {
        Ok(reason) => debug!(worker = id, %peer, ?reason, "connection closed"),
        Err(err) if err.is_peer_closed() => {
            trace!(worker = id, %peer, error = %err, "connection closed by peer")
        }
        Err(err) => match err.category() {
            KvErrorCategory::Transient => {
                trace!(worker = id, %peer, error = %err, "connection interrupted")
            }
            KvErrorCategory::Client | KvErrorCategory::Protocol => {
                warn!(worker = id, %peer, error = %err, "connection closed after client error")
            }
            KvErrorCategory::Server => error!(worker = id, %peer, error = %err, "connection failed"),
        },
    }
    ctx.metrics.record_connection_closed();
}

/// Serves one client until stop, disconnect or error.
pub async fn handle_connection(mut stream: TcpStream, ctx: &ConnectionContext) -> KvResult<CloseReason> {
    stream.set_nodelay(true)?;
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    loop {
        let read = tokio::select! {
            biased;
            _ = ctx.stop.wait() => return Ok(CloseReason::Stopped),
            read = timeout(ctx.poll_interval, stream.read_buf(&mut buf)) => read,
        };

        match read {
            // Nothing readable within the poll interval.
            Err(_elapsed) => continue,
            Ok(Ok(0)) => {
                if !buf.is_empty() {
                    trace!(bytes = buf.len(), "dropping unterminated line at end of stream");
                }
                return Ok(CloseReason::PeerClosed);
            }
            Ok(Ok(_)) => {}
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::WouldBlock => continue,
            Ok(Err(err)) => return Err(err.into()),
        }

        while let Some(line) = next_line(&mut buf) {
            ctx.metrics.record_line();
            let line = decode_line(&line);
            let command = line.trim_end();
            trace!(command, "received line");

            let Some(reply) = execute(ctx.store.as_ref(), command) else {
                continue;
            };
            if reply.is_empty() {
                continue;
            }
            if let Some(reason) = send_reply(&mut stream, reply.as_bytes(), ctx).await? {
                return Ok(reason);
            }
        }

        if buf.len() > ctx.max_line_len {
            return Err(KvError::LineTooLong {
                limit: ctx.max_line_len,
            });
        }
    }
}

/// Writes one reply. Returns `Some(Stopped)` if the stop flag won the race.
async fn send_reply(
    stream: &mut TcpStream,
    reply: &[u8],
    ctx: &ConnectionContext,
) -> KvResult<Option<CloseReason>> {
    let write = async {
        stream.write_all(reply).await?;
        stream.flush().await
    };

    tokio::select! {
        biased;
        _ = ctx.stop.wait() => Ok(Some(CloseReason::Stopped)),
        written = timeout(ctx.poll_interval, write) => match written {
            Ok(result) => {
                result?;
                Ok(None)
            }
            Err(_elapsed) => Err(KvError::ReplyStalled {
                waited: ctx.poll_interval,
            }),
        },
    }
}

/// Decodes a request line; invalid UTF-8 sequences become U+FFFD.
fn decode_line(bytes: &[u8]) -> Cow<'_, str> {
    let line = String::from_utf8_lossy(bytes);
    if let Cow::Owned(_) = line {
        warn!(bytes = bytes.len(), "request line is not valid UTF-8, invalid bytes replaced");
    }
    line
}

/// Splits one terminated line off the front of `buf`, terminator removed.
fn next_line(buf: &mut BytesMut) -> Option<BytesMut> {
    let end = buf.iter().position(|&b| b == LINE_TERMINATOR)?;
    let mut line = buf.split_to(end + 1);
    line.truncate(end);
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lkv_engine::Storage;
    use tokio::net::TcpListener;

    #[test]
    fn frames_complete_lines_only() {
        let mut buf = BytesMut::from("$set a=1\r\n$get a\n$get");
        assert_eq!(next_line(&mut buf).unwrap(), &b"$set a=1\r"[..]);
        assert_eq!(next_line(&mut buf).unwrap(), &b"$get a"[..]);
        assert!(next_line(&mut buf).is_none());
        assert_eq!(&buf[..], b"$get");

        buf.extend_from_slice(b" b\n");
        assert_eq!(next_line(&mut buf).unwrap(), &b"$get b"[..]);
        assert!(buf.is_empty());
    }

    type Served = (TcpStream, StopFlag, tokio::task::JoinHandle<KvResult<CloseReason>>);

    async fn serve_one(store: Arc<Storage>, max_line_len: usize) -> Served {
        serve_one_with_poll(store, max_line_len, Duration::from_millis(20)).await
    }

    async fn serve_one_with_poll(store: Arc<Storage>, max_line_len: usize, poll_interval: Duration) -> Served {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stop = StopFlag::new();
        let ctx = ConnectionContext {
            store,
            stop: stop.clone(),
            metrics: Arc::new(ServerMetrics::new()),
            poll_interval,
            max_line_len,
        };

        let client = TcpStream::connect(addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        let task = tokio::spawn(async move { handle_connection(server_side, &ctx).await });
        (client, stop, task)
    }

    fn temp_storage(dir: &tempfile::TempDir) -> Arc<Storage> {
        Arc::new(Storage::open(dir.path().join("config.txt")))
    }

    #[tokio::test]
    async fn pipelined_lines_are_answered_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (mut client, _stop, task) = serve_one(temp_storage(&dir), 1024).await;

        client
            .write_all(b"$set color=red\n$set shape=circle\n$get color\n")
            .await
            .unwrap();
        let mut reply = [0u8; 3];
        timeout(Duration::from_secs(2), client.read_exact(&mut reply))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&reply, b"red");

        drop(client);
        let reason = timeout(Duration::from_secs(2), task).await.unwrap().unwrap().unwrap();
        assert_eq!(reason, CloseReason::PeerClosed);
    }

    #[tokio::test]
    async fn stop_flag_closes_idle_connection() {
        let dir = tempfile::tempdir().unwrap();
        let (_client, stop, task) = serve_one(temp_storage(&dir), 1024).await;

        stop.set();
        let reason = timeout(Duration::from_secs(2), task).await.unwrap().unwrap().unwrap();
        assert_eq!(reason, CloseReason::Stopped);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        assert!(matches!(decode_line(b"$get color"), Cow::Borrowed("$get color")));

        let decoded = decode_line(b"$get k\xff");
        assert!(matches!(decoded, Cow::Owned(_)));
        assert_eq!(decoded, "$get k\u{FFFD}");
    }

    #[tokio::test]
    async fn reader_that_never_drains_is_disconnected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = temp_storage(&dir);
        storage.write("big".into(), "x".repeat(60_000));
        let (mut client, _stop, task) = serve_one(storage, 1024).await;

        client.write_all("$get big\n".repeat(2000).as_bytes()).await.unwrap();

        let result = timeout(Duration::from_secs(10), task).await.unwrap().unwrap();
        assert!(matches!(result, Err(KvError::ReplyStalled { .. })));
    }

    #[tokio::test]
    async fn stop_interrupts_a_blocked_reply() {
        let dir = tempfile::tempdir().unwrap();
        let storage = temp_storage(&dir);
        storage.write("big".into(), "x".repeat(60_000));
        let (mut client, stop, task) = serve_one_with_poll(storage, 1024, Duration::from_secs(30)).await;

        client.write_all("$get big\n".repeat(2000).as_bytes()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        stop.set();
        let reason = timeout(Duration::from_secs(2), task).await.unwrap().unwrap().unwrap();
        assert_eq!(reason, CloseReason::Stopped);
    }

    #[tokio::test]
    async fn oversized_line_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut client, _stop, task) = serve_one(temp_storage(&dir), 16).await;

        client.write_all(&[b'x'; 64]).await.unwrap();
        let result = timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert!(matches!(result, Err(KvError::LineTooLong { limit: 16 })));
    }
}
