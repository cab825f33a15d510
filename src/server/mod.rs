//! Log server: accept loop, per-connection sessions, storage and the
//! optional name directory.

pub mod directory;
pub(crate) mod handler;
pub mod store;
pub mod subscription;

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender};
use thiserror::Error;

pub use directory::Directory;
pub use store::LogStore;
pub use subscription::ConnKey;

use crate::client::{ClientConfig, ClientError};
use crate::core::{ErrorKind, InternalName, Limits, ServerAddr, Status};
use crate::error::{Effect, Transience};
use crate::proto::{
    Envelope, FrameReader, FrameWriter, Message, Nak, WireError, encode_envelope, read_message,
};
use handler::{Handler, Relay};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Status(#[from] Status),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
}

impl ServerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServerError::Io(_) => ErrorKind::Unavailable,
            ServerError::Status(status) => status.kind,
            ServerError::Client(e) => e.kind(),
            ServerError::Wire(e) => e.kind(),
            ServerError::LockPoisoned(_) => ErrorKind::Internal,
        }
    }

    pub fn transience(&self) -> Transience {
        self.kind().transience()
    }

    pub fn effect(&self) -> Effect {
        match self {
            ServerError::Status(_) | ServerError::Wire(_) => Effect::None,
            ServerError::Client(e) => e.effect(),
            ServerError::Io(_) | ServerError::LockPoisoned(_) => Effect::Unknown,
        }
    }

    pub fn to_status(&self) -> Status {
        match self {
            ServerError::Status(status) => status.clone(),
            ServerError::Client(e) => e.to_status(),
            other => Status::new(other.kind(), other.to_string()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Address published in the directory; defaults to the bound address.
    pub advertise_addr: Option<ServerAddr>,
    /// This server's own name, the target of forwarded appends.
    pub name: InternalName,
    pub human: Option<String>,
    pub serve_directory: bool,
    /// Remote directory; required unless `serve_directory` is set.
    pub router: Option<ServerAddr>,
    pub max_connections: NonZeroUsize,
    pub limits: Limits,
    /// Template for the relay client.
    pub client: Option<ClientConfig>,
}

impl ServerConfig {
    pub fn new(listen_addr: impl Into<String>, name: InternalName) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            advertise_addr: None,
            name,
            human: None,
            serve_directory: false,
            router: None,
            max_connections: NonZeroUsize::new(256).unwrap_or(NonZeroUsize::MIN),
            limits: Limits::default(),
            client: None,
        }
    }
}

pub struct LogServer {
    config: ServerConfig,
}

pub struct ServerHandle {
    shutdown: Arc<AtomicBool>,
    join: JoinHandle<()>,
    local_addr: SocketAddr,
    advertise: ServerAddr,
    store: Arc<LogStore>,
    handler: Arc<Handler>,
    sessions: Sessions,
}

type Sessions = Arc<Mutex<HashMap<ConnKey, Sender<Message>>>>;

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn addr(&self) -> &ServerAddr {
        &self.advertise
    }

    pub fn name(&self) -> &InternalName {
        &self.handler.name
    }

    pub fn store(&self) -> &Arc<LogStore> {
        &self.store
    }

    /// Tell every connected client to go away while still accepting new
    /// connections. Their subscriptions are dropped as the sessions end.
    pub fn drop_sessions(&self) -> usize {
        let sessions = self
            .sessions
            .lock()
            .map(|sessions| sessions.values().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        for outbound in &sessions {
            let _ = outbound.send(Message::Shutdown);
        }
        tracing::info!(sessions = sessions.len(), "dropping client sessions");
        sessions.len()
    }

    /// Stop accepting, tell connected clients, and wait for the loop.
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.join.join();
        self.handler.relay.shutdown();
    }

    /// Block until the accept loop exits.
    pub fn wait(self) {
        let _ = self.join.join();
        self.handler.relay.shutdown();
    }
}

impl LogServer {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    pub fn start(self) -> Result<ServerHandle, ServerError> {
        let config = self.config;
        let listener = TcpListener::bind(&config.listen_addr)?;
        let local_addr = listener.local_addr()?;
        let advertise = config
            .advertise_addr
            .clone()
            .unwrap_or_else(|| advertise_for(local_addr));

        let router = match (&config.router, config.serve_directory) {
            (Some(router), _) => router.clone(),
            (None, true) => advertise.clone(),
            (None, false) => {
                return Err(Status::new(
                    ErrorKind::NotFound,
                    "a router address is required without a local directory",
                )
                .into());
            }
        };
        let mut relay_config = config
            .client
            .clone()
            .unwrap_or_else(|| ClientConfig::new(router.clone()));
        relay_config.router = router;
        relay_config.pool.limits = config.limits.clone();

        let store = Arc::new(LogStore::new(config.limits.clone()));
        let handler = Arc::new(Handler {
            store: store.clone(),
            directory: config.serve_directory.then(|| Arc::new(Directory::new())),
            name: config.name,
            advertise: advertise.clone(),
            relay: Relay::new(relay_config),
        });

        let shutdown = Arc::new(AtomicBool::new(false));
        let sessions = Sessions::default();
        let runtime = ServerRuntime {
            handler: handler.clone(),
            limits: config.limits.clone(),
            max_connections: config.max_connections,
            shutdown: shutdown.clone(),
            active: Arc::new(AtomicUsize::new(0)),
            next_conn: Arc::new(AtomicU64::new(1)),
            sessions: sessions.clone(),
        };
        let join = thread::Builder::new()
            .name("gdp-accept".into())
            .spawn(move || run_accept_loop(listener, runtime))?;

        let handle = ServerHandle {
            shutdown,
            join,
            local_addr,
            advertise,
            store,
            handler,
            sessions,
        };
        // Servers are addressable by name for forwarded appends and clones.
        if let Err(err) = handle
            .handler
            .register(&config.name, config.human.as_deref())
        {
            tracing::error!(name = %config.name, "server registration failed: {err}");
            handle.shutdown();
            return Err(err);
        }
        tracing::info!(
            name = %config.name,
            addr = %handle.advertise,
            directory = config.serve_directory,
            "log server listening"
        );
        Ok(handle)
    }
}

fn advertise_for(local: SocketAddr) -> ServerAddr {
    if local.ip().is_unspecified() {
        ServerAddr::new(format!("127.0.0.1:{}", local.port()))
    } else {
        ServerAddr::from(local)
    }
}

#[derive(Clone)]
struct ServerRuntime {
    handler: Arc<Handler>,
    limits: Limits,
    max_connections: NonZeroUsize,
    shutdown: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    next_conn: Arc<AtomicU64>,
    sessions: Sessions,
}

struct ConnectionGuard {
    active: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    fn try_acquire(active: &Arc<AtomicUsize>, max: NonZeroUsize) -> Option<Self> {
        let mut current = active.load(Ordering::Acquire);
        loop {
            if current >= max.get() {
                return None;
            }
            match active.compare_exchange(
                current,
                current.saturating_add(1),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(Self {
                        active: Arc::clone(active),
                    });
                }
                Err(next) => current = next,
            }
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let prev = self.active.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "active connection counter underflow");
    }
}

fn run_accept_loop(listener: TcpListener, runtime: ServerRuntime) {
    if let Err(err) = listener.set_nonblocking(true) {
        tracing::error!("log server failed to set nonblocking: {err}");
        return;
    }

    loop {
        if runtime.shutdown.load(Ordering::Relaxed) {
            break;
        }

        match listener.accept() {
            Ok((stream, peer)) => {
                let Some(guard) =
                    ConnectionGuard::try_acquire(&runtime.active, runtime.max_connections)
                else {
                    tracing::warn!(%peer, "connection limit reached");
                    drop(stream);
                    continue;
                };
                let runtime = runtime.clone();
                thread::spawn(move || {
                    if let Err(err) = run_session(stream, runtime, guard) {
                        tracing::warn!(%peer, "session error: {err}");
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(25));
            }
            Err(err) => {
                tracing::warn!("accept error: {err}");
                thread::sleep(Duration::from_millis(25));
            }
        }
    }

    let sessions = runtime
        .sessions
        .lock()
        .map(|mut sessions| sessions.drain().collect::<Vec<_>>())
        .unwrap_or_default();
    tracing::info!(sessions = sessions.len(), "log server stopping");
    for (_, outbound) in sessions {
        let _ = outbound.send(Message::Shutdown);
    }
}

fn run_session(
    stream: TcpStream,
    runtime: ServerRuntime,
    _guard: ConnectionGuard,
) -> Result<(), ServerError> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    let conn = runtime.next_conn.fetch_add(1, Ordering::Relaxed);
    let limits = runtime.limits.clone();

    let mut reader = FrameReader::new(stream.try_clone()?, limits.max_frame_bytes);
    let writer = FrameWriter::new(stream.try_clone()?, limits.max_frame_bytes);
    let (outbound, outbound_rx) = crossbeam::channel::unbounded::<Message>();
    let writer_stream = stream.try_clone()?;
    let writer_handle = thread::spawn(move || run_writer(conn, writer, writer_stream, outbound_rx));

    if let Ok(mut sessions) = runtime.sessions.lock() {
        sessions.insert(conn, outbound.clone());
    }
    tracing::debug!(conn, "session started");

    let result = loop {
        let message = match read_message(&mut reader, &limits) {
            Ok(Some(message)) => message,
            Ok(None) => break Ok(()),
            Err(WireError::Decode(err)) => {
                // Undecodable body: the framing is intact, so report and drop.
                tracing::warn!(conn, "bad request: {err}");
                let _ = outbound.send(Message::Nak(Nak {
                    rid: 0,
                    status: Status::new(err.kind(), err.to_string()),
                }));
                break Ok(());
            }
            Err(err) => break Err(ServerError::from(err)),
        };
        match message {
            Message::Request(request) => {
                let reply = runtime.handler.handle(conn, request, &outbound);
                if outbound.send(reply).is_err() {
                    break Ok(());
                }
            }
            other => {
                tracing::warn!(conn, "unexpected message from client: {other:?}");
            }
        }
    };

    runtime.handler.store.drop_connection(conn);
    if let Ok(mut sessions) = runtime.sessions.lock() {
        sessions.remove(&conn);
    }
    drop(outbound);
    let _ = stream.shutdown(std::net::Shutdown::Both);
    let _ = writer_handle.join();
    tracing::debug!(conn, "session ended");
    result
}

fn run_writer(
    conn: ConnKey,
    mut writer: FrameWriter<TcpStream>,
    stream: TcpStream,
    outbound: Receiver<Message>,
) {
    for message in outbound.iter() {
        let shutdown = matches!(message, Message::Shutdown);
        let written = encode_envelope(&Envelope::new(message))
            .map_err(WireError::from)
            .and_then(|body| writer.write_frame(&body).map_err(WireError::from));
        if let Err(err) = written {
            tracing::debug!(conn, "write failed: {err}");
            break;
        }
        if shutdown {
            break;
        }
    }
    let _ = stream.shutdown(std::net::Shutdown::Both);
}
