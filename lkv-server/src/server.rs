//! # Listener Loop and Server Lifecycle
//!
//! Accept connections, spawn one worker task per client, and tear everything
//! down in a fixed order.
//!
//! ## Shutdown Order
//!
//! 1. stop the listener and join it (no new workers after this point)
//! 2. set the worker stop flag; every worker exits at its next wake-up
//! 3. join every registered worker, running or finished
//! 4. stop the reaper and join it
//!
//! The storage owner then stops the snapshot task, which saves once more if
//! the store is dirty.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, trace, warn};

use lkv_common::{KvError, KvResult, StopFlag};
use lkv_engine::KvStore;

use crate::config::ServerConfig;
use crate::connection::{ConnectionContext, run_worker};
use crate::metrics::ServerMetrics;
use crate::registry::{WorkerRegistry, run_reaper};
use crate::shutdown::StopSignals;

const LISTEN_BACKLOG: i32 = 1024;

/// Pause after a failed accept so a persistent error does not spin.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Outcome of a completed shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers joined by the shutdown drain. Workers the reaper joined while
    /// the drain was running are not counted.
    pub workers_joined: usize,
}

/// Running server: listener, reaper and the registry of connection workers.
pub struct Server {
    local_addr: SocketAddr,
    signals: StopSignals,
    registry: Arc<WorkerRegistry>,
    metrics: Arc<ServerMetrics>,
    listener: JoinHandle<()>,
    reaper: JoinHandle<()>,
}

impl Server {
    /// Binds the listening socket and starts the listener and reaper tasks.
    pub async fn start(config: &ServerConfig, store: Arc<dyn KvStore>) -> KvResult<Self> {
        let listener = bind_listener(config.listen)?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "server listening");

        let signals = StopSignals::new();
        let registry = Arc::new(WorkerRegistry::new());
        let metrics = Arc::new(ServerMetrics::new());
        let ctx = ConnectionContext {
            store,
            stop: signals.workers.clone(),
            metrics: Arc::clone(&metrics),
            poll_interval: config.poll_interval,
            max_line_len: config.max_line_len,
        };

        let listener = tokio::spawn(run_listener(
            listener,
            Arc::clone(&registry),
            ctx,
            signals.accept.clone(),
            config.poll_interval,
        ));
        let reaper = tokio::spawn(run_reaper(
            Arc::clone(&registry),
            config.reap_interval,
            signals.reaper.clone(),
        ));

        Ok(Server {
            local_addr,
            signals,
            registry,
            metrics,
            listener,
            reaper,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connection counters shared with the workers.
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Workers registered and not yet joined.
    pub fn active_workers(&self) -> usize {
        self.registry.active_count()
    }

    /// Stops accepting, stops and joins every worker, then stops the reaper.
    pub async fn shutdown(self) -> KvResult<ShutdownReport> {
        info!("stopping listener");
        self.signals.accept.set();
        join_task(self.listener, "listener").await?;

        info!(active = self.registry.active_count(), "stopping connection workers");
        self.signals.workers.set();
        let workers_joined = self.registry.join_all().await;

        self.signals.reaper.set();
        join_task(self.reaper, "reaper").await?;

        info!(workers_joined, "server stopped");
        Ok(ShutdownReport { workers_joined })
    }
}

fn bind_listener(addr: SocketAddr) -> KvResult<TcpListener> {
    let bind_err = |source| KvError::Bind { addr, source };

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP)).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.listen(LISTEN_BACKLOG).map_err(bind_err)?;

    TcpListener::from_std(socket.into()).map_err(bind_err)
}

async fn run_listener(
    listener: TcpListener,
    registry: Arc<WorkerRegistry>,
    ctx: ConnectionContext,
    stop: StopFlag,
    poll_interval: Duration,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = stop.wait() => break,
            accepted = timeout(poll_interval, listener.accept()) => accepted,
        };

        match accepted {
            // No connection within the poll interval.
            Err(_elapsed) => continue,
            Ok(Ok((stream, peer))) => {
                let ctx = ctx.clone();
                let worker = registry.spawn(move |id| run_worker(id, stream, peer, ctx));
                info!(%peer, worker, "new connection");
            }
            Ok(Err(err)) => {
                let err = KvError::from(err);
                if err.is_retryable() {
                    trace!(error = %err, "accept interrupted, retrying");
                    continue;
                }
                warn!(error = %err, "error while accepting connection");
                if stop.sleep_or_stopped(ACCEPT_RETRY_DELAY).await {
                    break;
                }
            }
        }
    }
    info!("listener stopped");
}

async fn join_task(task: JoinHandle<()>, name: &'static str) -> KvResult<()> {
    task.await.map_err(|err| KvError::Join {
        task: name,
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener as StdListener;

    #[test]
    fn bind_reports_address_in_use() {
        let taken = StdListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let result = runtime.block_on(async { bind_listener(addr) });

        match result {
            Err(KvError::Bind { addr: reported, .. }) => assert_eq!(reported, addr),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("binding an occupied port should fail"),
        }
    }
}
