//! Client runtime: connection pool, dispatcher thread, event queue, and
//! the log handle (`Gin`) built on top of them.

pub mod backoff;
mod error;
pub mod event;
pub mod forward;
pub mod gin;
pub(crate) mod io;
pub mod pool;
pub mod resolver;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender};

pub use backoff::{Backoff, BackoffPolicy};
pub use error::ClientError;
pub use event::{
    Completed, Context, Event, EventKind, EventQueue, HandleId, RequestId, free_event,
};
pub use forward::forward_append;
pub use gin::{Gin, GinState, OpenOptions};
pub use pool::{ConnPool, Connection, PoolConfig, PooledConn};

use crate::core::{Limits, ServerAddr, Status};
use crate::proto::{Op, Reply, Request};
use io::{Completion, Dispatcher, IoCommand, Pending, Shared};

/// Runtime settings for a client.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Directory server used for name resolution.
    pub router: ServerAddr,
    /// Prefix tried first when resolving undotted human names.
    pub name_root: Option<String>,
    pub pool: PoolConfig,
    pub backoff: BackoffPolicy,
    pub request_timeout: Duration,
    pub close_timeout: Duration,
    pub verify_signatures: bool,
}

impl ClientConfig {
    pub fn new(router: ServerAddr) -> Self {
        Self {
            router,
            name_root: None,
            pool: PoolConfig::default(),
            backoff: BackoffPolicy::default(),
            request_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(5),
            verify_signatures: true,
        }
    }

    pub fn limits(&self) -> &Limits {
        &self.pool.limits
    }
}

struct ClientInner {
    config: ClientConfig,
    shared: Arc<Shared>,
    commands: Sender<IoCommand>,
    /// Dropped on shutdown to cut backoff sleeps short.
    done_tx: Mutex<Option<Sender<()>>>,
    done_rx: Receiver<()>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    next_handle: AtomicU64,
}

impl ClientInner {
    fn shutdown(&self) {
        let Ok(mut done) = self.done_tx.lock() else {
            return;
        };
        if done.take().is_none() {
            return;
        }
        drop(done);
        tracing::debug!("client shutting down");
        let _ = self.commands.send(IoCommand::Shutdown);
        if let Ok(mut handle) = self.dispatcher.lock()
            && let Some(handle) = handle.take()
            && handle.join().is_err()
        {
            tracing::error!("dispatcher thread panicked");
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle to one client runtime. Cheap to clone; the runtime stops when
/// the last clone is dropped or `shutdown` is called.
#[derive(Clone)]
pub struct GdpClient {
    inner: Arc<ClientInner>,
}

impl GdpClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let (inbound_tx, inbound_rx) = crossbeam::channel::unbounded();
        let (commands_tx, commands_rx) = crossbeam::channel::unbounded();
        let (done_tx, done_rx) = crossbeam::channel::bounded(1);

        let pool = ConnPool::new(config.pool.clone(), inbound_tx);
        let shared = Arc::new(Shared::new(pool, config.backoff));
        let dispatcher = Dispatcher::new(shared.clone(), commands_rx, inbound_rx);
        let handle = std::thread::Builder::new()
            .name("gdp-io".into())
            .spawn(move || dispatcher.run())
            .map_err(|source| ClientError::Spawn {
                what: "dispatcher",
                source,
            })?;

        tracing::info!(router = %config.router, "client started");
        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                shared,
                commands: commands_tx,
                done_tx: Mutex::new(Some(done_tx)),
                done_rx,
                dispatcher: Mutex::new(Some(handle)),
                next_handle: AtomicU64::new(1),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn pool(&self) -> &ConnPool {
        &self.inner.shared.pool
    }

    pub fn event_queue(&self) -> &EventQueue {
        &self.inner.shared.queue
    }

    /// Next event for `handle` (or any handle), waiting up to `timeout`.
    pub fn next_event(
        &self,
        handle: Option<HandleId>,
        timeout: Option<Duration>,
    ) -> Result<Event, ClientError> {
        self.inner.shared.queue.next_event(handle, timeout)
    }

    /// Stop the dispatcher. Blocked callers and event consumers wake up.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.inner.shared
    }

    pub(crate) fn next_handle(&self) -> HandleId {
        HandleId(self.inner.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn next_rid(&self) -> u64 {
        self.inner.shared.next_rid()
    }

    /// Run `op` under the client's backoff policy.
    pub(crate) fn with_retry<T>(
        &self,
        what: &'static str,
        op: impl FnMut() -> Result<T, ClientError>,
    ) -> Result<T, ClientError> {
        backoff::retry(self.inner.config.backoff, &self.inner.done_rx, what, op)
    }

    /// Lease a connection to `addr`, retrying transient dial failures.
    pub fn connect(&self, addr: &ServerAddr) -> Result<PooledConn, ClientError> {
        self.with_retry("connect", || self.pool().acquire(addr))
    }

    /// Send `op` and block for the reply.
    pub(crate) fn call(
        &self,
        lease: &PooledConn,
        handle: Option<HandleId>,
        op: Op,
    ) -> Result<Reply, ClientError> {
        let (tx, rx) = crossbeam::channel::bounded(1);
        let rid = self.submit(lease, handle, op, Completion::Waiter(tx), false)?;
        let timeout = self.inner.config.request_timeout;
        match rx.recv_timeout(timeout) {
            Ok(result) => Ok(result?),
            Err(crossbeam::channel::RecvTimeoutError::Timeout) => {
                self.inner.shared.pending.remove(rid);
                Err(ClientError::Timeout(timeout))
            }
            Err(crossbeam::channel::RecvTimeoutError::Disconnected) => {
                Err(Status::unavailable("client shut down").into())
            }
        }
    }

    /// Register `op` as pending and queue it for the dispatcher.
    pub(crate) fn submit(
        &self,
        lease: &PooledConn,
        handle: Option<HandleId>,
        op: Op,
        completion: Completion,
        retryable: bool,
    ) -> Result<u64, ClientError> {
        if self.is_shut_down() {
            return Err(ClientError::Shutdown);
        }
        let rid = self.next_rid();
        self.inner.shared.pending.insert(Pending {
            handle,
            lease: lease.clone(),
            request: Request { rid, op },
            completion,
            attempt: retryable.then_some(0),
        })?;
        if self.inner.commands.send(IoCommand::Send { rid }).is_err() {
            self.inner.shared.pending.remove(rid);
            return Err(ClientError::Shutdown);
        }
        Ok(rid)
    }

    fn is_shut_down(&self) -> bool {
        self.inner
            .done_tx
            .lock()
            .map(|done| done.is_none())
            .unwrap_or(true)
    }
}

impl std::fmt::Debug for GdpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GdpClient")
            .field("router", &self.inner.config.router)
            .finish_non_exhaustive()
    }
}

/// Shorthand for unexpected replies.
pub(crate) fn unexpected(op: &'static str, reply: Reply) -> ClientError {
    ClientError::UnexpectedReply {
        op,
        reply: format!("{reply:?}"),
    }
}
