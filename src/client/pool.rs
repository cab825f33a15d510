//! Connection pool keyed by server address.
//!
//! At most one live connection exists per address. A connection is shared
//! by every lease handed out for its address; leases are counted and the
//! socket is torn down once the connection is dead and the last lease is
//! gone. Connect attempts for the same address are coalesced: concurrent
//! callers wait on the first attempt instead of dialing again.

use std::collections::{HashMap, HashSet};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::Sender;

use super::ClientError;
use crate::core::{Limits, ServerAddr, Status};
use crate::proto::{Envelope, FrameReader, FrameWriter, Message, WireError, encode_envelope};

pub type ConnId = u64;

/// What reader threads hand to the dispatcher.
#[derive(Debug)]
pub enum Inbound {
    Message { conn: ConnId, message: Message },
    Closed { conn: ConnId, error: Option<String> },
}

#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub max_connections: usize,
    pub connect_timeout: Duration,
    /// Bound on waiting for a free slot when the pool is full.
    pub acquire_timeout: Duration,
    pub limits: Limits,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 16,
            connect_timeout: Duration::from_secs(2),
            acquire_timeout: Duration::from_secs(10),
            limits: Limits::default(),
        }
    }
}

pub struct Connection {
    id: ConnId,
    addr: ServerAddr,
    stream: TcpStream,
    writer: Mutex<FrameWriter<TcpStream>>,
    alive: AtomicBool,
    leases: AtomicUsize,
}

impl Connection {
    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn addr(&self) -> &ServerAddr {
        &self.addr
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn leases(&self) -> usize {
        self.leases.load(Ordering::Acquire)
    }

    /// Write one message. A failed write marks the connection dead.
    pub fn send(&self, message: Message) -> Result<(), ClientError> {
        if !self.is_alive() {
            return Err(Status::unavailable(format!("connection to {} is closed", self.addr)).into());
        }
        let body = encode_envelope(&Envelope::new(message)).map_err(WireError::from)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| ClientError::LockPoisoned("connection writer"))?;
        if let Err(err) = writer.write_frame(&body) {
            self.alive.store(false, Ordering::Release);
            return Err(WireError::from(err).into());
        }
        Ok(())
    }

    fn mark_dead(&self) {
        self.alive.store(false, Ordering::Release);
    }

    fn teardown(&self) {
        self.mark_dead();
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("alive", &self.is_alive())
            .field("leases", &self.leases())
            .finish()
    }
}

/// A counted lease on a pooled connection.
pub struct PooledConn {
    conn: Arc<Connection>,
    pool: Arc<PoolInner>,
}

impl PooledConn {
    fn new(conn: Arc<Connection>, pool: Arc<PoolInner>) -> Self {
        conn.leases.fetch_add(1, Ordering::AcqRel);
        Self { conn, pool }
    }
}

impl Clone for PooledConn {
    fn clone(&self) -> Self {
        Self::new(self.conn.clone(), self.pool.clone())
    }
}

impl std::ops::Deref for PooledConn {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        let remaining = self.conn.leases.fetch_sub(1, Ordering::AcqRel) - 1;
        self.pool.released(&self.conn, remaining);
    }
}

impl std::fmt::Debug for PooledConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.conn.fmt(f)
    }
}

#[derive(Default)]
struct PoolState {
    conns: HashMap<ServerAddr, Arc<Connection>>,
    connecting: HashSet<ServerAddr>,
    shut_down: bool,
}

struct PoolInner {
    config: PoolConfig,
    state: Mutex<PoolState>,
    changed: Condvar,
    inbound: Sender<Inbound>,
    next_id: AtomicU64,
}

impl PoolInner {
    fn lock(&self) -> Result<MutexGuard<'_, PoolState>, ClientError> {
        self.state
            .lock()
            .map_err(|_| ClientError::LockPoisoned("connection pool"))
    }

    fn released(&self, conn: &Arc<Connection>, remaining: usize) {
        if remaining == 0 && !conn.is_alive() {
            conn.teardown();
        }
        // Take the lock so a waiter cannot miss the wakeup between its
        // idle check and its wait.
        let _guard = self.state.lock();
        self.changed.notify_all();
    }
}

#[derive(Clone)]
pub struct ConnPool {
    inner: Arc<PoolInner>,
}

impl ConnPool {
    pub fn new(config: PoolConfig, inbound: Sender<Inbound>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(PoolState::default()),
                changed: Condvar::new(),
                inbound,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Lease the connection for `addr`, dialing if none is live.
    pub fn acquire(&self, addr: &ServerAddr) -> Result<PooledConn, ClientError> {
        let deadline = Instant::now() + self.inner.config.acquire_timeout;
        let mut state = self.inner.lock()?;
        loop {
            if state.shut_down {
                return Err(ClientError::Shutdown);
            }
            if let Some(conn) = state.conns.get(addr) {
                if conn.is_alive() {
                    return Ok(PooledConn::new(conn.clone(), self.inner.clone()));
                }
                state.conns.remove(addr);
                continue;
            }
            let in_flight = state.connecting.contains(addr);
            let full = state.conns.len() + state.connecting.len()
                >= self.inner.config.max_connections.max(1);
            if !in_flight && (!full || evict_idle(&mut state)) {
                state.connecting.insert(addr.clone());
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(%addr, "timed out waiting for a pool slot");
                return Err(ClientError::Timeout(self.inner.config.acquire_timeout));
            }
            state = self
                .inner
                .changed
                .wait_timeout(state, deadline - now)
                .map_err(|_| ClientError::LockPoisoned("connection pool"))?
                .0;
        }
        drop(state);

        let result = self.connect(addr);

        let mut state = self.inner.lock()?;
        state.connecting.remove(addr);
        self.inner.changed.notify_all();
        let conn = Arc::new(result?);
        if state.shut_down {
            conn.teardown();
            return Err(ClientError::Shutdown);
        }
        state.conns.insert(addr.clone(), conn.clone());
        Ok(PooledConn::new(conn, self.inner.clone()))
    }

    fn connect(&self, addr: &ServerAddr) -> Result<Connection, ClientError> {
        let connect_err = |source| ClientError::Connect {
            addr: addr.clone(),
            source,
        };
        let sock_addr = addr
            .as_str()
            .to_socket_addrs()
            .map_err(connect_err)?
            .next()
            .ok_or_else(|| {
                connect_err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "address resolved to nothing",
                ))
            })?;
        let stream = TcpStream::connect_timeout(&sock_addr, self.inner.config.connect_timeout)
            .map_err(connect_err)?;
        let _ = stream.set_nodelay(true);
        let read_half = stream.try_clone().map_err(connect_err)?;
        let write_half = stream.try_clone().map_err(connect_err)?;

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let limits = self.inner.config.limits.clone();
        let inbound = self.inner.inbound.clone();
        thread::Builder::new()
            .name(format!("gdp-conn-{id}"))
            .spawn(move || run_reader(id, read_half, inbound, limits))
            .map_err(|source| ClientError::Spawn {
                what: "connection reader",
                source,
            })?;

        tracing::debug!(conn = id, %addr, "connected");
        Ok(Connection {
            id,
            addr: addr.clone(),
            stream,
            writer: Mutex::new(FrameWriter::new(
                write_half,
                self.inner.config.limits.max_frame_bytes,
            )),
            alive: AtomicBool::new(true),
            leases: AtomicUsize::new(0),
        })
    }

    /// Drop a connection from the pool after a failure. Outstanding leases
    /// keep the socket until they are released.
    pub fn mark_dead(&self, id: ConnId) {
        let Ok(mut state) = self.inner.lock() else {
            return;
        };
        let addr = state
            .conns
            .iter()
            .find(|(_, conn)| conn.id == id)
            .map(|(addr, _)| addr.clone());
        if let Some(addr) = addr
            && let Some(conn) = state.conns.remove(&addr)
        {
            conn.mark_dead();
            if conn.leases() == 0 {
                conn.teardown();
            }
            tracing::debug!(conn = id, %addr, "connection marked dead");
        }
        self.inner.changed.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|state| state.conns.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current connection id for `addr`, if one is pooled.
    pub fn conn_id(&self, addr: &ServerAddr) -> Option<ConnId> {
        let state = self.inner.lock().ok()?;
        state.conns.get(addr).map(|conn| conn.id)
    }

    pub fn shutdown(&self) {
        let Ok(mut state) = self.inner.lock() else {
            return;
        };
        state.shut_down = true;
        for (_, conn) in state.conns.drain() {
            conn.teardown();
        }
        self.inner.changed.notify_all();
    }
}

fn evict_idle(state: &mut PoolState) -> bool {
    let idle = state
        .conns
        .iter()
        .find(|(_, conn)| conn.leases() == 0)
        .map(|(addr, _)| addr.clone());
    match idle.and_then(|addr| state.conns.remove(&addr)) {
        Some(conn) => {
            tracing::debug!(conn = conn.id, addr = %conn.addr, "evicting idle connection");
            conn.teardown();
            true
        }
        None => false,
    }
}

fn run_reader(id: ConnId, stream: TcpStream, inbound: Sender<Inbound>, limits: Limits) {
    let mut reader = FrameReader::new(stream, limits.max_frame_bytes);
    loop {
        let closed = match crate::proto::read_message(&mut reader, &limits) {
            Ok(Some(message)) => {
                if inbound.send(Inbound::Message { conn: id, message }).is_err() {
                    return;
                }
                continue;
            }
            Ok(None) => Inbound::Closed {
                conn: id,
                error: None,
            },
            Err(err) => Inbound::Closed {
                conn: id,
                error: Some(err.to_string()),
            },
        };
        let _ = inbound.send(closed);
        return;
    }
}
