//! # LineKV Client
//!
//! Minimal async client for the line protocol.
//!
//! ## Design Principles
//!
//! 1. **Thin Wrapper**: Requests are built with the shared protocol helpers so
//!    client and server agree on the wire format.
//! 2. **Bounded Replies**: The server sends no reply for a missing key and no
//!    terminator after a value, so a reply is "whatever arrives before the
//!    wait runs out".
//! 3. **Raw Access**: `send_line`/`read_reply` let tests send malformed input.

use std::io;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::timeout;

use lkv_common::protocol::{get_request, set_request};

/// Default time to wait for the first byte of a reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_millis(100);

/// Quiet period that ends a reply once bytes have started arriving.
const REPLY_SETTLE: Duration = Duration::from_millis(5);

/// Connection to a LineKV server.
pub struct Client {
    stream: TcpStream,
    reply_timeout: Duration,
    buf: BytesMut,
}

impl Client {
    /// Connects to `addr`.
    pub async fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Client {
            stream,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            buf: BytesMut::with_capacity(1024),
        })
    }

    /// Sets how long `get` waits for the first reply byte.
    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    /// Sends `$set key=value`. The server never replies to it.
    pub async fn set(&mut self, key: &str, value: &str) -> io::Result<()> {
        self.send_line(&set_request(key, value)).await
    }

    /// Sends `$get key` and waits for the value.
    ///
    /// Returns `None` when nothing arrives in time, which is how the server
    /// answers for a missing key.
    pub async fn get(&mut self, key: &str) -> io::Result<Option<String>> {
        self.send_line(&get_request(key)).await?;
        self.read_reply().await
    }

    /// Writes `line` verbatim; callers include the terminator.
    pub async fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.flush().await
    }

    /// Collects reply bytes until the connection goes quiet.
    ///
    /// Returns `None` if nothing arrives within the reply timeout.
    pub async fn read_reply(&mut self) -> io::Result<Option<String>> {
        self.buf.clear();
        let mut wait = self.reply_timeout;
        loop {
            match timeout(wait, self.stream.read_buf(&mut self.buf)).await {
                Err(_elapsed) => break,
                Ok(Ok(0)) => break,
                Ok(Ok(_)) => wait = REPLY_SETTLE,
                Ok(Err(err)) => return Err(err),
            }
        }

        if self.buf.is_empty() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }

    /// Closes the write side of the connection.
    pub async fn shutdown(mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}
