//! Log handles.
//!
//! A `Gin` is one open view of a log: it caches the log's head, knows its
//! writer key, and owns at most one subscription. Handles are `Send + Sync`;
//! concurrent appends through one handle are acknowledged in submission
//! order because they share one connection and one dispatcher.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::event::{Context, HandleId, RequestId};
use super::io::{Completion, LogHead, RequestKind, SubEntry, verify_datum};
use super::{ClientError, GdpClient, PooledConn, unexpected};
use crate::core::{
    CoreError, Datum, ErrorKind, InternalName, LogInfo, LogMetadata, OpenMode, PublicKey,
    RecnoOutOfRange, RecordHash, ServerAddr, SigningKeyPair, Status,
};
use crate::proto::{Op, Reply};

/// Handle lifecycle.
///
/// `Opening` only exists inside [`Gin::open`]; callers never hold a handle
/// in that state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GinState {
    Closed,
    Opening,
    Open,
    Subscribing,
    Closing,
}

impl GinState {
    pub fn as_str(self) -> &'static str {
        match self {
            GinState::Closed => "closed",
            GinState::Opening => "opening",
            GinState::Open => "open",
            GinState::Subscribing => "subscribing",
            GinState::Closing => "closing",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct OpenOptions {
    /// Key used to sign appended records.
    pub signer: Option<Arc<SigningKeyPair>>,
    /// Create the log on this server if it does not exist yet. Only honored
    /// for modes that can append.
    pub create_on: Option<InternalName>,
    /// Metadata for a log created by this open.
    pub metadata: Option<LogMetadata>,
    /// Human name registered alongside a created log.
    pub human: Option<String>,
    /// Override the client's signature verification setting.
    pub verify: Option<bool>,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signer(mut self, signer: Arc<SigningKeyPair>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn create_on(mut self, server: InternalName, metadata: LogMetadata) -> Self {
        self.create_on = Some(server);
        self.metadata = Some(metadata);
        self
    }

    pub fn human(mut self, human: impl Into<String>) -> Self {
        self.human = Some(human.into());
        self
    }

    pub fn verify(mut self, verify: bool) -> Self {
        self.verify = Some(verify);
        self
    }
}

struct ActiveSub {
    sub_id: u64,
    active: Arc<AtomicBool>,
}

pub struct Gin {
    id: HandleId,
    name: InternalName,
    mode: OpenMode,
    client: GdpClient,
    addr: ServerAddr,
    lease: Mutex<PooledConn>,
    state: Mutex<GinState>,
    head: Arc<LogHead>,
    metadata: LogMetadata,
    verifier: Option<PublicKey>,
    signer: Option<Arc<SigningKeyPair>>,
    subscription: Mutex<Option<ActiveSub>>,
}

impl GdpClient {
    /// Create `name` on the server registered as `server`. Returns the
    /// address now hosting it.
    pub fn create_log(
        &self,
        name: &InternalName,
        metadata: &LogMetadata,
        server: &InternalName,
        human: Option<&str>,
    ) -> Result<ServerAddr, ClientError> {
        let addr = self.resolve(server)?;
        let op = Op::Create {
            log: *name,
            metadata: metadata.clone(),
            human: human.map(str::to_owned),
        };
        let reply = self.with_retry("create", || {
            let lease = self.pool().acquire(&addr)?;
            self.call(&lease, None, op.clone())
        })?;
        match reply {
            Reply::Info(_) | Reply::Done => {
                tracing::info!(log = %name, server = %server, %addr, "log created");
                Ok(addr)
            }
            reply => Err(unexpected("CREATE", reply)),
        }
    }
}

impl Gin {
    /// Open `name` in `mode`.
    ///
    /// Resolution and the OPEN handshake are retried on transient failure.
    /// A missing log is created first when `options.create_on` is set and
    /// the mode can append.
    pub fn open(
        client: &GdpClient,
        name: InternalName,
        mode: OpenMode,
        options: OpenOptions,
    ) -> Result<Gin, ClientError> {
        if !name.is_valid() {
            return Err(CoreError::InvalidName(crate::core::InvalidName {
                raw: name.printable(),
                reason: "reserved name".to_string(),
            })
            .into());
        }
        tracing::debug!(log = %name, mode = mode.as_str(), state = GinState::Opening.as_str(), "opening log");

        let addr = match client.resolve(&name) {
            Ok(addr) => addr,
            Err(err) if err.kind() == ErrorKind::NotFound && mode.can_append() => {
                let Some(server) = options.create_on.as_ref() else {
                    return Err(err);
                };
                let metadata = options.metadata.clone().unwrap_or_default();
                client.create_log(&name, &metadata, server, options.human.as_deref())?
            }
            Err(err) => return Err(err),
        };

        let (lease, reply) = client.with_retry("open", || {
            let lease = client.pool().acquire(&addr)?;
            let reply = client.call(&lease, None, Op::Open { log: name, mode })?;
            Ok((lease, reply))
        })?;
        let Reply::Opened { info, metadata } = reply else {
            return Err(unexpected("OPEN", reply));
        };

        let verify = options.verify.unwrap_or(client.config().verify_signatures);
        let verifier = if verify { metadata.writer_key()? } else { None };
        let id = client.next_handle();
        tracing::info!(handle = %id, log = %name, %addr, highest = info.highest_recno, "log open");

        Ok(Gin {
            id,
            name,
            mode,
            client: client.clone(),
            addr,
            lease: Mutex::new(lease),
            state: Mutex::new(GinState::Open),
            head: Arc::new(LogHead::new(info.highest_recno, info.last_hash)),
            metadata,
            verifier,
            signer: options.signer,
            subscription: Mutex::new(None),
        })
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn name(&self) -> &InternalName {
        &self.name
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn addr(&self) -> &ServerAddr {
        &self.addr
    }

    pub fn metadata(&self) -> &LogMetadata {
        &self.metadata
    }

    pub fn client(&self) -> &GdpClient {
        &self.client
    }

    /// Highest recno this handle knows of.
    pub fn highest_recno(&self) -> u64 {
        self.head.highest()
    }

    pub fn last_hash(&self) -> Option<RecordHash> {
        self.head.last_hash()
    }

    pub fn state(&self) -> GinState {
        let Ok(mut state) = self.state.lock() else {
            return GinState::Closed;
        };
        if *state == GinState::Subscribing && !self.subscription_active() {
            *state = GinState::Open;
        }
        *state
    }

    /// Requests submitted through this handle that have not completed.
    pub fn outstanding(&self) -> usize {
        self.client.shared().pending.count_for(self.id)
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, GinState>, ClientError> {
        self.state
            .lock()
            .map_err(|_| ClientError::LockPoisoned("handle state"))
    }

    fn require_open(&self, op: &'static str) -> Result<(), ClientError> {
        match self.state() {
            GinState::Open | GinState::Subscribing => Ok(()),
            state => Err(ClientError::InvalidState {
                state: state.as_str(),
                op,
            }),
        }
    }

    fn require_mode(&self, op: &'static str, allowed: bool) -> Result<(), ClientError> {
        if allowed {
            Ok(())
        } else {
            Err(ClientError::ModeDenied {
                mode: self.mode.as_str(),
                op,
            })
        }
    }

    /// Current lease, re-dialing if the old connection died.
    pub(crate) fn lease(&self) -> Result<PooledConn, ClientError> {
        let mut lease = self
            .lease
            .lock()
            .map_err(|_| ClientError::LockPoisoned("handle connection"))?;
        if !lease.is_alive() {
            tracing::debug!(handle = %self.id, addr = %self.addr, "reconnecting");
            *lease = self.client.connect(&self.addr)?;
        }
        Ok(lease.clone())
    }

    fn call(&self, op: Op) -> Result<Reply, ClientError> {
        let lease = self.lease()?;
        self.client.call(&lease, Some(self.id), op)
    }

    fn submit(
        &self,
        op: Op,
        kind: RequestKind,
        context: Option<Context>,
        retryable: bool,
    ) -> Result<RequestId, ClientError> {
        let lease = self.lease()?;
        let completion = Completion::Event {
            kind,
            context,
            verifier: self.verifier.clone(),
            head: self.head.clone(),
        };
        let rid = self
            .client
            .submit(&lease, Some(self.id), op, completion, retryable)?;
        Ok(RequestId(rid))
    }

    /// Fill in chaining and signature before the record leaves.
    fn prepare(&self, mut datum: Datum, prevhash: Option<RecordHash>) -> Datum {
        if let Some(prev) = prevhash {
            datum = datum.chained(self.head.highest() + 1, prev);
        }
        if let Some(signer) = &self.signer {
            datum.sign(signer);
        }
        datum
    }

    /// Append and wait for the server's acknowledgement.
    ///
    /// With `prevhash`, the record is pinned to the position after the
    /// cached head and the server rejects it if the log has moved on.
    pub fn append(&self, datum: Datum, prevhash: Option<RecordHash>) -> Result<u64, ClientError> {
        self.require_open("append")?;
        self.require_mode("append", self.mode.can_append())?;
        let datum = self.prepare(datum, prevhash);
        match self.call(Op::Append {
            log: self.name,
            datum,
        })? {
            Reply::Appended { recno, hash } => {
                self.head.advance(recno, Some(hash));
                tracing::trace!(handle = %self.id, recno, "appended");
                Ok(recno)
            }
            reply => Err(unexpected("APPEND", reply)),
        }
    }

    /// Queue an append; completion arrives as a DONE or ERROR event.
    pub fn append_async(
        &self,
        datum: Datum,
        prevhash: Option<RecordHash>,
        context: Option<Context>,
    ) -> Result<RequestId, ClientError> {
        self.require_open("append")?;
        self.require_mode("append", self.mode.can_append())?;
        let datum = self.prepare(datum, prevhash);
        self.submit(
            Op::Append {
                log: self.name,
                datum,
            },
            RequestKind::Append,
            context,
            false,
        )
    }

    /// Ask the server for the log's head and update the cache.
    pub fn refresh(&self) -> Result<LogInfo, ClientError> {
        match self.call(Op::Stat { log: self.name })? {
            Reply::Info(info) => {
                self.head.advance(info.highest_recno, info.last_hash);
                Ok(info)
            }
            reply => Err(unexpected("STAT", reply)),
        }
    }

    /// Bounds-check `recno`, refreshing the cached head once if needed.
    fn check_recno(&self, recno: u64) -> Result<(), ClientError> {
        if recno >= 1 && recno <= self.head.highest() {
            return Ok(());
        }
        if recno >= 1 {
            self.refresh()?;
            if recno <= self.head.highest() {
                return Ok(());
            }
        }
        Err(CoreError::from(RecnoOutOfRange {
            recno,
            highest: self.head.highest(),
        })
        .into())
    }

    pub fn read_by_recno(&self, recno: u64) -> Result<Datum, ClientError> {
        self.require_open("read")?;
        self.require_mode("read", self.mode.can_read())?;
        self.check_recno(recno)?;
        match self.call(Op::Read {
            log: self.name,
            recno,
        })? {
            Reply::Datum(datum) => {
                verify_datum(&datum, self.verifier.as_ref())?;
                Ok(datum)
            }
            reply => Err(unexpected("READ", reply)),
        }
    }

    pub fn read_by_recno_async(
        &self,
        recno: u64,
        context: Option<Context>,
    ) -> Result<RequestId, ClientError> {
        self.require_open("read")?;
        self.require_mode("read", self.mode.can_read())?;
        self.check_recno(recno)?;
        self.submit(
            Op::Read {
                log: self.name,
                recno,
            },
            RequestKind::Read,
            context,
            false,
        )
    }

    /// Start delivering records as DATA events on this handle.
    ///
    /// `start == 0` delivers only records committed after the server
    /// processes the request; otherwise records from `start` are replayed
    /// first. `max == 0` means unbounded; otherwise EOS follows the last.
    /// A lost connection is re-subscribed from the next undelivered recno.
    pub fn subscribe(
        &self,
        start: u64,
        max: u64,
        context: Option<Context>,
    ) -> Result<(), ClientError> {
        self.require_mode("subscribe", self.mode.can_read())?;
        {
            let state = self.state();
            if state != GinState::Open {
                return Err(ClientError::InvalidState {
                    state: state.as_str(),
                    op: "subscribe",
                });
            }
        }
        let lease = self.lease()?;
        let sub_id = self.client.next_rid();
        let active = Arc::new(AtomicBool::new(true));
        let shared = self.client.shared();
        shared.subs.insert(
            sub_id,
            SubEntry {
                handle: self.id,
                log: self.name,
                lease: lease.clone(),
                context,
                next_recno: start,
                remaining: (max > 0).then_some(max),
                delivered: 0,
                verifier: self.verifier.clone(),
                head: self.head.clone(),
                active: active.clone(),
                attempt: 0,
            },
        )?;
        // Registered before sending so no early DATA is dropped.
        let op = Op::Subscribe {
            log: self.name,
            sub_id,
            start,
            max,
        };
        match self.client.call(&lease, Some(self.id), op) {
            Ok(Reply::Info(head)) => {
                if start == 0 {
                    shared.subs.start_after(sub_id, head.highest_recno);
                }
            }
            Ok(Reply::Done) => {}
            Ok(reply) => {
                shared.subs.remove(sub_id);
                return Err(unexpected("SUBSCRIBE", reply));
            }
            Err(err) => {
                shared.subs.remove(sub_id);
                return Err(err);
            }
        }
        *self
            .subscription
            .lock()
            .map_err(|_| ClientError::LockPoisoned("handle subscription"))? =
            Some(ActiveSub { sub_id, active });
        *self.lock_state()? = GinState::Subscribing;
        tracing::debug!(handle = %self.id, sub_id, start, max, "subscribed");
        Ok(())
    }

    fn subscription_active(&self) -> bool {
        self.subscription
            .lock()
            .ok()
            .and_then(|sub| sub.as_ref().map(|s| s.active.load(Ordering::Acquire)))
            .unwrap_or(false)
    }

    /// Stop the subscription. Events already queued stay deliverable.
    pub fn unsubscribe(&self) -> Result<(), ClientError> {
        let sub = self
            .subscription
            .lock()
            .map_err(|_| ClientError::LockPoisoned("handle subscription"))?
            .take();
        let Some(sub) = sub else {
            return Err(ClientError::InvalidState {
                state: self.state().as_str(),
                op: "unsubscribe",
            });
        };
        // Dropping the entry first stops new DATA events at the dispatcher.
        let still_live = self.client.shared().subs.remove(sub.sub_id).is_some();
        {
            let mut state = self.lock_state()?;
            if *state == GinState::Subscribing {
                *state = GinState::Open;
            }
        }
        if still_live {
            let op = Op::Unsubscribe {
                log: self.name,
                sub_id: sub.sub_id,
            };
            match self.call(op) {
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::warn!(handle = %self.id, sub_id = sub.sub_id, "unsubscribe not confirmed: {err}");
                }
            }
        }
        tracing::debug!(handle = %self.id, sub_id = sub.sub_id, "unsubscribed");
        Ok(())
    }

    /// Close the handle.
    ///
    /// Ends any subscription, waits up to the client's close timeout for
    /// outstanding requests, then discards whatever is left and frees the
    /// handle's queued events.
    pub fn close(&self) -> Result<(), ClientError> {
        {
            let mut state = self.lock_state()?;
            match *state {
                GinState::Closed => return Ok(()),
                GinState::Closing => {
                    return Err(ClientError::InvalidState {
                        state: "closing",
                        op: "close",
                    });
                }
                _ => *state = GinState::Closing,
            }
        }
        if self.has_subscription() {
            let _ = self.unsubscribe();
        }

        let shared = self.client.shared();
        let timeout = self.client.config().close_timeout;
        if !shared.pending.wait_drained(self.id, timeout) {
            let discarded = shared
                .pending
                .discard(self.id, &Status::unavailable("handle closed"));
            tracing::warn!(handle = %self.id, discarded, "closing with requests outstanding");
        }

        if let Ok(lease) = self.lease.lock()
            && lease.is_alive()
            && let Err(err) = self.client.call(&lease, None, Op::Close { log: self.name })
        {
            tracing::debug!(handle = %self.id, "close not acknowledged: {err}");
        }

        let freed = shared.queue.retire(self.id);
        *self.lock_state()? = GinState::Closed;
        tracing::debug!(handle = %self.id, freed, "log closed");
        Ok(())
    }

    fn has_subscription(&self) -> bool {
        self.subscription
            .lock()
            .map(|sub| sub.is_some())
            .unwrap_or(false)
    }

    /// Delete the log on its server and close this handle.
    pub fn delete(&self) -> Result<(), ClientError> {
        self.require_open("delete")?;
        match self.call(Op::Delete { log: self.name })? {
            Reply::Done => {}
            reply => return Err(unexpected("DELETE", reply)),
        }
        tracing::info!(log = %self.name, "log deleted");
        self.close()
    }

    pub(crate) fn submit_forward(
        &self,
        datum: Datum,
        target: InternalName,
        context: Option<Context>,
    ) -> Result<RequestId, ClientError> {
        self.require_open("forward")?;
        self.submit(
            Op::ForwardAppend {
                log: self.name,
                target,
                datum,
            },
            RequestKind::Forward,
            context,
            true,
        )
    }
}

impl Drop for Gin {
    fn drop(&mut self) {
        if self.state() != GinState::Closed
            && let Err(err) = self.close()
        {
            tracing::warn!(handle = %self.id, "close on drop failed: {err}");
        }
    }
}

impl std::fmt::Debug for Gin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gin")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("addr", &self.addr)
            .field("state", &self.state())
            .finish()
    }
}
