//! The dispatcher thread.
//!
//! One thread per client owns all socket writes and produces all events.
//! Application threads register a pending entry, then hand the dispatcher
//! the request id; reader threads hand it decoded frames. Retries after a
//! lost connection are deadline tasks on the same thread.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, Sender};

use super::backoff::BackoffPolicy;
use super::event::{Completed, Context, Event, EventQueue, HandleId, RequestId};
use super::pool::{ConnId, ConnPool, Inbound, PooledConn};
use super::ClientError;
use crate::core::{Datum, ErrorKind, InternalName, PublicKey, RecordHash, Status};
use crate::proto::{DataPush, EosPush, Message, Op, Reply, Request};

/// What the dispatcher does once a request completes.
pub(crate) enum Completion {
    /// A blocked caller.
    Waiter(Sender<Result<Reply, Status>>),
    /// Deliver an event on the handle's behalf.
    Event {
        kind: RequestKind,
        context: Option<Context>,
        verifier: Option<PublicKey>,
        head: Arc<LogHead>,
    },
    /// Re-establishing a subscription after reconnect.
    Resubscribe { sub_id: u64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RequestKind {
    Append,
    Read,
    Forward,
}

/// Cached head of a log, shared between a handle and its in-flight work.
#[derive(Debug, Default)]
pub(crate) struct LogHead {
    highest: AtomicU64,
    last_hash: Mutex<Option<RecordHash>>,
}

impl LogHead {
    pub fn new(highest: u64, last_hash: Option<RecordHash>) -> Self {
        Self {
            highest: AtomicU64::new(highest),
            last_hash: Mutex::new(last_hash),
        }
    }

    pub fn highest(&self) -> u64 {
        self.highest.load(Ordering::Acquire)
    }

    pub fn last_hash(&self) -> Option<RecordHash> {
        self.last_hash.lock().ok().and_then(|guard| *guard)
    }

    /// Advance to `recno` if it is newer than what we have.
    pub fn advance(&self, recno: u64, hash: Option<RecordHash>) {
        let previous = self.highest.fetch_max(recno, Ordering::AcqRel);
        if recno >= previous
            && hash.is_some()
            && let Ok(mut last) = self.last_hash.lock()
        {
            *last = hash;
        }
    }
}

pub(crate) struct Pending {
    pub handle: Option<HandleId>,
    pub lease: PooledConn,
    pub request: Request,
    pub completion: Completion,
    /// Set for requests the dispatcher may resend after a transient failure.
    pub attempt: Option<u32>,
}

#[derive(Default)]
pub(crate) struct PendingTable {
    entries: Mutex<HashMap<u64, Pending>>,
    drained: Condvar,
}

impl PendingTable {
    fn lock(&self) -> Result<MutexGuard<'_, HashMap<u64, Pending>>, ClientError> {
        self.entries
            .lock()
            .map_err(|_| ClientError::LockPoisoned("pending table"))
    }

    pub fn insert(&self, pending: Pending) -> Result<(), ClientError> {
        self.lock()?.insert(pending.request.rid, pending);
        Ok(())
    }

    pub fn take(&self, rid: u64) -> Option<Pending> {
        let taken = self.lock().ok()?.remove(&rid);
        self.drained.notify_all();
        taken
    }

    pub fn remove(&self, rid: u64) {
        let _ = self.take(rid);
    }

    fn outgoing(&self, rid: u64) -> Option<(PooledConn, Request)> {
        let entries = self.lock().ok()?;
        entries
            .get(&rid)
            .map(|p| (p.lease.clone(), p.request.clone()))
    }

    fn rids_for_conn(&self, conn: ConnId) -> Vec<u64> {
        self.lock()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, p)| p.lease.id() == conn)
                    .map(|(rid, _)| *rid)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn count_for(&self, handle: HandleId) -> usize {
        self.lock()
            .map(|entries| entries.values().filter(|p| p.handle == Some(handle)).count())
            .unwrap_or(0)
    }

    /// Wait until `handle` has nothing in flight; false on timeout.
    pub fn wait_drained(&self, handle: HandleId, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let Ok(mut entries) = self.lock() else {
            return false;
        };
        loop {
            if !entries.values().any(|p| p.handle == Some(handle)) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            entries = match self.drained.wait_timeout(entries, deadline - now) {
                Ok((guard, _)) => guard,
                Err(_) => return false,
            };
        }
    }

    /// Remove everything in flight for `handle`. Blocked callers get `status`.
    pub fn discard(&self, handle: HandleId, status: &Status) -> usize {
        let Ok(mut entries) = self.lock() else {
            return 0;
        };
        let rids: Vec<u64> = entries
            .iter()
            .filter(|(_, p)| p.handle == Some(handle))
            .map(|(rid, _)| *rid)
            .collect();
        for rid in &rids {
            if let Some(Pending {
                completion: Completion::Waiter(tx),
                ..
            }) = entries.remove(rid)
            {
                let _ = tx.send(Err(status.clone()));
            }
        }
        drop(entries);
        self.drained.notify_all();
        rids.len()
    }

    fn drain(&self) -> Vec<Pending> {
        let drained = self
            .lock()
            .map(|mut entries| entries.drain().map(|(_, p)| p).collect())
            .unwrap_or_default();
        self.drained.notify_all();
        drained
    }
}

pub(crate) struct SubEntry {
    pub handle: HandleId,
    pub log: InternalName,
    pub lease: PooledConn,
    pub context: Option<Context>,
    /// Next recno we expect; duplicates below it are dropped.
    pub next_recno: u64,
    pub remaining: Option<u64>,
    pub delivered: u64,
    pub verifier: Option<PublicKey>,
    pub head: Arc<LogHead>,
    pub active: Arc<AtomicBool>,
    pub attempt: u32,
}

#[derive(Default)]
pub(crate) struct SubscriptionTable {
    entries: Mutex<HashMap<u64, SubEntry>>,
}

impl SubscriptionTable {
    fn lock(&self) -> Result<MutexGuard<'_, HashMap<u64, SubEntry>>, ClientError> {
        self.entries
            .lock()
            .map_err(|_| ClientError::LockPoisoned("subscription table"))
    }

    pub fn insert(&self, sub_id: u64, entry: SubEntry) -> Result<(), ClientError> {
        self.lock()?.insert(sub_id, entry);
        Ok(())
    }

    pub fn remove(&self, sub_id: u64) -> Option<SubEntry> {
        let entry = self.lock().ok()?.remove(&sub_id);
        if let Some(entry) = &entry {
            entry.active.store(false, Ordering::Release);
        }
        entry
    }

    pub fn len(&self) -> usize {
        self.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    /// Pin a live-only subscription to the first recno after `highest`,
    /// unless records have already arrived.
    pub fn start_after(&self, sub_id: u64, highest: u64) {
        if let Ok(mut entries) = self.lock()
            && let Some(entry) = entries.get_mut(&sub_id)
            && entry.next_recno == 0
        {
            entry.next_recno = highest + 1;
        }
    }

    fn ids_for_conn(&self, conn: ConnId) -> Vec<u64> {
        self.lock()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, s)| s.lease.id() == conn)
                    .map(|(id, _)| *id)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// State shared by the client handle and the dispatcher.
pub(crate) struct Shared {
    pub pool: ConnPool,
    pub queue: EventQueue,
    pub pending: PendingTable,
    pub subs: SubscriptionTable,
    pub backoff: BackoffPolicy,
    next_rid: AtomicU64,
}

impl Shared {
    pub fn new(pool: ConnPool, backoff: BackoffPolicy) -> Self {
        Self {
            pool,
            queue: EventQueue::new(),
            pending: PendingTable::default(),
            subs: SubscriptionTable::default(),
            backoff,
            next_rid: AtomicU64::new(1),
        }
    }

    pub fn next_rid(&self) -> u64 {
        self.next_rid.fetch_add(1, Ordering::Relaxed)
    }
}

pub(crate) enum IoCommand {
    Send { rid: u64 },
    Shutdown,
}

enum Task {
    Resend { rid: u64 },
    Resubscribe { sub_id: u64 },
}

pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
    commands: Receiver<IoCommand>,
    inbound: Receiver<Inbound>,
    timers: BinaryHeap<Reverse<(Instant, u64)>>,
    tasks: HashMap<u64, Task>,
    next_task: u64,
}

impl Dispatcher {
    pub fn new(
        shared: Arc<Shared>,
        commands: Receiver<IoCommand>,
        inbound: Receiver<Inbound>,
    ) -> Self {
        Self {
            shared,
            commands,
            inbound,
            timers: BinaryHeap::new(),
            tasks: HashMap::new(),
            next_task: 0,
        }
    }

    pub fn run(mut self) {
        tracing::debug!("dispatcher started");
        let commands = self.commands.clone();
        let inbound = self.inbound.clone();
        loop {
            let timer = match self.timers.peek() {
                Some(Reverse((at, _))) => crossbeam::channel::at(*at),
                None => crossbeam::channel::never(),
            };
            crossbeam::select! {
                recv(commands) -> cmd => match cmd {
                    Ok(IoCommand::Send { rid }) => self.send(rid),
                    Ok(IoCommand::Shutdown) | Err(_) => break,
                },
                recv(inbound) -> msg => match msg {
                    Ok(inbound) => self.handle_inbound(inbound),
                    Err(_) => break,
                },
                recv(timer) -> _ => self.run_due_tasks(),
            }
        }
        self.finish();
    }

    fn send(&mut self, rid: u64) {
        let Some((lease, request)) = self.shared.pending.outgoing(rid) else {
            // Discarded by close before we got to it.
            return;
        };
        let op = request.op.as_str();
        tracing::trace!(rid, op, conn = lease.id(), "sending request");
        if let Err(err) = lease.send(Message::Request(request)) {
            tracing::warn!(rid, op, addr = %lease.addr(), "send failed: {err}");
            self.shared.pool.mark_dead(lease.id());
            self.fail_or_retry(rid, err.to_status());
        }
    }

    fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Message { conn, message } => match message {
                Message::Ack(ack) => self.complete(ack.rid, Ok(ack.reply)),
                Message::Nak(nak) => self.fail_or_retry(nak.rid, nak.status),
                Message::Data(push) => self.deliver_data(push),
                Message::Eos(push) => self.deliver_eos(push),
                Message::Shutdown => {
                    tracing::info!(conn, "server announced shutdown");
                    self.connection_lost(conn);
                }
                Message::Request(request) => {
                    tracing::warn!(conn, rid = request.rid, "ignoring request sent to client");
                }
            },
            Inbound::Closed { conn, error } => {
                match error {
                    Some(error) => tracing::warn!(conn, "connection failed: {error}"),
                    None => tracing::debug!(conn, "connection closed by peer"),
                }
                self.connection_lost(conn);
            }
        }
    }

    fn connection_lost(&mut self, conn: ConnId) {
        self.shared.pool.mark_dead(conn);
        for rid in self.shared.pending.rids_for_conn(conn) {
            self.fail_or_retry(rid, Status::unavailable("connection lost"));
        }
        for sub_id in self.shared.subs.ids_for_conn(conn) {
            self.schedule_resubscribe(sub_id);
        }
    }

    fn complete(&mut self, rid: u64, result: Result<Reply, Status>) {
        let Some(pending) = self.shared.pending.take(rid) else {
            tracing::debug!(rid, "reply for unknown request dropped");
            return;
        };
        match pending.completion {
            Completion::Waiter(tx) => {
                let _ = tx.send(result);
            }
            Completion::Event {
                kind,
                context,
                verifier,
                head,
            } => {
                let Some(handle) = pending.handle else {
                    return;
                };
                let request = Some(RequestId(rid));
                let event = match result.and_then(|reply| outcome(kind, reply, verifier, &head)) {
                    Ok(outcome) => Event::Done {
                        handle,
                        request: RequestId(rid),
                        outcome,
                        context,
                    },
                    Err(status) => Event::Error {
                        handle,
                        request,
                        status,
                        context,
                    },
                };
                self.push(event);
            }
            Completion::Resubscribe { sub_id } => match result {
                Ok(_) => {
                    if let Ok(mut subs) = self.shared.subs.lock()
                        && let Some(entry) = subs.get_mut(&sub_id)
                    {
                        entry.attempt = 0;
                    }
                    tracing::info!(sub_id, "subscription re-established");
                }
                Err(status) if status.transience().is_retryable() => {
                    self.schedule_resubscribe(sub_id)
                }
                Err(status) => self.end_subscription(sub_id, status),
            },
        }
    }

    fn fail_or_retry(&mut self, rid: u64, status: Status) {
        if status.transience().is_retryable() {
            let delay = match self.shared.pending.lock() {
                Ok(mut entries) => match entries.get_mut(&rid) {
                    Some(Pending {
                        attempt: Some(attempt),
                        ..
                    }) => {
                        let delay = self.shared.backoff.delay_for(*attempt);
                        *attempt += 1;
                        delay
                    }
                    _ => None,
                },
                Err(_) => None,
            };
            if let Some(delay) = delay {
                tracing::debug!(rid, ?delay, "scheduling resend: {status}");
                self.schedule(delay, Task::Resend { rid });
                return;
            }
        }
        self.complete(rid, Err(status));
    }

    fn deliver_data(&mut self, push: DataPush) {
        let (event, finished) = {
            let Ok(mut subs) = self.shared.subs.lock() else {
                return;
            };
            let Some(entry) = subs.get_mut(&push.sub_id) else {
                tracing::trace!(sub_id = push.sub_id, "data for unknown subscription dropped");
                return;
            };
            let recno = push.datum.recno;
            if recno < entry.next_recno {
                tracing::debug!(sub_id = push.sub_id, recno, "duplicate record dropped");
                return;
            }
            entry.next_recno = recno + 1;
            entry.delivered += 1;
            if let Some(remaining) = entry.remaining.as_mut() {
                *remaining = remaining.saturating_sub(1);
            }
            let finished = entry.remaining == Some(0);
            entry.head.advance(recno, Some(push.datum.record_hash()));
            let event = match entry.verifier.as_ref().map(|key| push.datum.verify(key)) {
                Some(Err(err)) => Event::Error {
                    handle: entry.handle,
                    request: None,
                    status: Status::new(
                        ErrorKind::SignatureInvalid,
                        format!("record {recno} of {}: {err}", push.log),
                    ),
                    context: entry.context.clone(),
                },
                _ => Event::Data {
                    handle: entry.handle,
                    datum: push.datum,
                    context: entry.context.clone(),
                },
            };
            (event, finished)
        };
        self.push(event);
        // Quota met: end here so a lost connection cannot reopen it.
        if finished {
            self.finish_subscription(push.sub_id);
        }
    }

    fn deliver_eos(&mut self, push: EosPush) {
        if !self.finish_subscription(push.sub_id) {
            tracing::trace!(sub_id = push.sub_id, log = %push.log, "end of stream for unknown subscription");
        }
    }

    /// End a subscription with EOS. False if it was already gone.
    fn finish_subscription(&mut self, sub_id: u64) -> bool {
        let Some(entry) = self.shared.subs.remove(sub_id) else {
            return false;
        };
        tracing::debug!(sub_id, log = %entry.log, delivered = entry.delivered, "subscription ended");
        self.push(Event::Eos {
            handle: entry.handle,
            delivered: entry.delivered,
            context: entry.context,
        });
        true
    }

    fn resubscribe_pending(&self, sub_id: u64) -> bool {
        self.tasks
            .values()
            .any(|task| matches!(task, Task::Resubscribe { sub_id: queued } if *queued == sub_id))
    }

    fn schedule_resubscribe(&mut self, sub_id: u64) {
        // Shutdown and EOF on the same connection both land here.
        if self.resubscribe_pending(sub_id) {
            return;
        }
        let delay = {
            let Ok(mut subs) = self.shared.subs.lock() else {
                return;
            };
            let Some(entry) = subs.get_mut(&sub_id) else {
                return;
            };
            let delay = self.shared.backoff.delay_for(entry.attempt);
            entry.attempt += 1;
            delay
        };
        match delay {
            Some(delay) => self.schedule(delay, Task::Resubscribe { sub_id }),
            None => self.end_subscription(
                sub_id,
                Status::unavailable("subscription lost: retries exhausted"),
            ),
        }
    }

    fn resubscribe(&mut self, sub_id: u64) {
        let (addr, log) = {
            let Ok(subs) = self.shared.subs.lock() else {
                return;
            };
            let Some(entry) = subs.get(&sub_id) else {
                return;
            };
            (entry.lease.addr().clone(), entry.log)
        };
        // The dial happens off the subscription lock.
        let lease = match self.shared.pool.acquire(&addr) {
            Ok(lease) => lease,
            Err(err) => {
                tracing::debug!(sub_id, %addr, "resubscribe dial failed: {err}");
                if err.transience().is_retryable() {
                    self.schedule_resubscribe(sub_id);
                } else {
                    self.end_subscription(sub_id, err.to_status());
                }
                return;
            }
        };
        let (handle, start, max) = {
            let Ok(mut subs) = self.shared.subs.lock() else {
                return;
            };
            let Some(entry) = subs.get_mut(&sub_id) else {
                return;
            };
            entry.lease = lease.clone();
            (
                entry.handle,
                entry.next_recno,
                entry.remaining.unwrap_or(0),
            )
        };
        let rid = self.shared.next_rid();
        let pending = Pending {
            handle: Some(handle),
            lease,
            request: Request {
                rid,
                op: Op::Subscribe {
                    log,
                    sub_id,
                    start,
                    max,
                },
            },
            completion: Completion::Resubscribe { sub_id },
            attempt: None,
        };
        if self.shared.pending.insert(pending).is_ok() {
            tracing::debug!(sub_id, start, "resubscribing");
            self.send(rid);
        }
    }

    fn end_subscription(&mut self, sub_id: u64, status: Status) {
        let Some(entry) = self.shared.subs.remove(sub_id) else {
            return;
        };
        tracing::warn!(sub_id, log = %entry.log, "subscription failed: {status}");
        self.push(Event::Error {
            handle: entry.handle,
            request: None,
            status,
            context: entry.context,
        });
    }

    fn resend(&mut self, rid: u64) {
        let Some(addr) = self
            .shared
            .pending
            .lock()
            .ok()
            .and_then(|entries| entries.get(&rid).map(|p| p.lease.addr().clone()))
        else {
            return;
        };
        match self.shared.pool.acquire(&addr) {
            Ok(lease) => {
                if let Ok(mut entries) = self.shared.pending.lock()
                    && let Some(pending) = entries.get_mut(&rid)
                {
                    pending.lease = lease;
                }
                self.send(rid);
            }
            Err(err) => {
                tracing::debug!(rid, %addr, "resend dial failed: {err}");
                self.fail_or_retry(rid, err.to_status());
            }
        }
    }

    fn schedule(&mut self, delay: Duration, task: Task) {
        let id = self.next_task;
        self.next_task += 1;
        self.tasks.insert(id, task);
        self.timers.push(Reverse((Instant::now() + delay, id)));
    }

    fn run_due_tasks(&mut self) {
        let now = Instant::now();
        while let Some(Reverse((at, id))) = self.timers.peek().copied() {
            if at > now {
                break;
            }
            self.timers.pop();
            match self.tasks.remove(&id) {
                Some(Task::Resend { rid }) => self.resend(rid),
                Some(Task::Resubscribe { sub_id }) => self.resubscribe(sub_id),
                None => {}
            }
        }
    }

    fn push(&self, event: Event) {
        if let Err(err) = self.shared.queue.push(event) {
            tracing::error!("dropping event: {err}");
        }
    }

    fn finish(self) {
        tracing::debug!("dispatcher stopping");
        let status = Status::unavailable("client shut down");
        for pending in self.shared.pending.drain() {
            if let Completion::Waiter(tx) = pending.completion {
                let _ = tx.send(Err(status.clone()));
            }
        }
        if let Ok(mut subs) = self.shared.subs.lock() {
            for (_, entry) in subs.drain() {
                entry.active.store(false, Ordering::Release);
            }
        }
        self.shared.queue.shutdown();
        self.shared.pool.shutdown();
    }
}

fn outcome(
    kind: RequestKind,
    reply: Reply,
    verifier: Option<PublicKey>,
    head: &LogHead,
) -> Result<Completed, Status> {
    match (kind, reply) {
        (RequestKind::Append, Reply::Appended { recno, hash }) => {
            head.advance(recno, Some(hash));
            Ok(Completed::Appended { recno })
        }
        (RequestKind::Forward, Reply::Appended { recno, .. }) => Ok(Completed::Forwarded { recno }),
        (RequestKind::Read, Reply::Datum(datum)) => {
            verify_datum(&datum, verifier.as_ref())?;
            Ok(Completed::Read(datum))
        }
        (kind, reply) => Err(Status::new(
            ErrorKind::Protocol,
            format!("unexpected reply {reply:?} to {kind:?}"),
        )),
    }
}

pub(crate) fn verify_datum(datum: &Datum, verifier: Option<&PublicKey>) -> Result<(), Status> {
    match verifier {
        Some(key) => datum.verify(key).map_err(|err| {
            Status::new(
                ErrorKind::SignatureInvalid,
                format!("record {}: {err}", datum.recno),
            )
        }),
        None => Ok(()),
    }
}
