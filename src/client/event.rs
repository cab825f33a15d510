//! Client event queue.
//!
//! The dispatcher thread is the only producer. Any number of application
//! threads may consume, each optionally filtering on one handle. Events for
//! a handle come out in the order they went in.

use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::ClientError;
use crate::core::{Datum, Status};

/// Identifies an open log handle within one client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub(crate) u64);

impl HandleId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gin#{}", self.0)
    }
}

/// Identifies one asynchronous request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub(crate) u64);

impl RequestId {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Caller-supplied value echoed back on events.
#[derive(Clone)]
pub struct Context(Arc<dyn Any + Send + Sync>);

impl Context {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Context(..)")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Data,
    Done,
    Error,
    Eos,
    Shutdown,
}

/// Result carried by a `Done` event.
#[derive(Clone, Debug, PartialEq)]
pub enum Completed {
    Appended { recno: u64 },
    Forwarded { recno: u64 },
    Read(Datum),
}

#[derive(Clone, Debug)]
pub enum Event {
    /// A subscribed record.
    Data {
        handle: HandleId,
        datum: Datum,
        context: Option<Context>,
    },
    /// An asynchronous request finished.
    Done {
        handle: HandleId,
        request: RequestId,
        outcome: Completed,
        context: Option<Context>,
    },
    /// A request or subscription failed.
    Error {
        handle: HandleId,
        request: Option<RequestId>,
        status: Status,
        context: Option<Context>,
    },
    /// A subscription delivered its last record.
    Eos {
        handle: HandleId,
        delivered: u64,
        context: Option<Context>,
    },
    /// The client is shutting down; no further events will arrive.
    Shutdown,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Data { .. } => EventKind::Data,
            Event::Done { .. } => EventKind::Done,
            Event::Error { .. } => EventKind::Error,
            Event::Eos { .. } => EventKind::Eos,
            Event::Shutdown => EventKind::Shutdown,
        }
    }

    pub fn handle(&self) -> Option<HandleId> {
        match self {
            Event::Data { handle, .. }
            | Event::Done { handle, .. }
            | Event::Error { handle, .. }
            | Event::Eos { handle, .. } => Some(*handle),
            Event::Shutdown => None,
        }
    }

    pub fn datum(&self) -> Option<&Datum> {
        match self {
            Event::Data { datum, .. } => Some(datum),
            Event::Done {
                outcome: Completed::Read(datum),
                ..
            } => Some(datum),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<&Status> {
        match self {
            Event::Error { status, .. } => Some(status),
            _ => None,
        }
    }

    pub fn context(&self) -> Option<&Context> {
        match self {
            Event::Data { context, .. }
            | Event::Done { context, .. }
            | Event::Error { context, .. }
            | Event::Eos { context, .. } => context.as_ref(),
            Event::Shutdown => None,
        }
    }

    /// Record number this event refers to, when it has one.
    pub fn recno(&self) -> Option<u64> {
        match self {
            Event::Data { datum, .. } => Some(datum.recno),
            Event::Done { outcome, .. } => Some(match outcome {
                Completed::Appended { recno } | Completed::Forwarded { recno } => *recno,
                Completed::Read(datum) => datum.recno,
            }),
            _ => None,
        }
    }

    fn matches(&self, filter: Option<HandleId>) -> bool {
        match filter {
            None => true,
            Some(handle) => self.handle() == Some(handle),
        }
    }
}

/// Release an event. Dropping it does the same.
pub fn free_event(event: Event) {
    drop(event);
}

#[derive(Default)]
struct QueueState {
    events: VecDeque<Event>,
    /// Closed handles; their late completions are dropped on push.
    retired: HashSet<HandleId>,
    shut_down: bool,
}

#[derive(Default)]
struct QueueInner {
    state: Mutex<QueueState>,
    ready: Condvar,
}

#[derive(Clone, Default)]
pub struct EventQueue {
    inner: Arc<QueueInner>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>, ClientError> {
        self.inner
            .state
            .lock()
            .map_err(|_| ClientError::LockPoisoned("event queue"))
    }

    pub fn push(&self, event: Event) -> Result<(), ClientError> {
        let mut state = self.lock()?;
        if state.shut_down || event.handle().is_some_and(|h| state.retired.contains(&h)) {
            return Ok(());
        }
        state.events.push_back(event);
        drop(state);
        self.inner.ready.notify_all();
        Ok(())
    }

    /// Wait for the oldest event matching `filter`.
    ///
    /// `timeout` of `None` waits forever; `Some(Duration::ZERO)` polls.
    /// After shutdown, returns `Event::Shutdown` once matching events drain.
    pub fn next_event(
        &self,
        filter: Option<HandleId>,
        timeout: Option<Duration>,
    ) -> Result<Event, ClientError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock()?;
        loop {
            if let Some(index) = state.events.iter().position(|e| e.matches(filter))
                && let Some(event) = state.events.remove(index)
            {
                return Ok(event);
            }
            if state.shut_down {
                return Ok(Event::Shutdown);
            }
            state = match deadline {
                None => self
                    .inner
                    .ready
                    .wait(state)
                    .map_err(|_| ClientError::LockPoisoned("event queue"))?,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ClientError::Timeout(timeout.unwrap_or_default()));
                    }
                    self.inner
                        .ready
                        .wait_timeout(state, deadline - now)
                        .map_err(|_| ClientError::LockPoisoned("event queue"))?
                        .0
                }
            };
        }
    }

    /// Drop every queued event for `handle`; returns how many were dropped.
    pub fn free_all(&self, handle: HandleId) -> usize {
        let Ok(mut state) = self.lock() else {
            return 0;
        };
        let before = state.events.len();
        state.events.retain(|e| e.handle() != Some(handle));
        before - state.events.len()
    }

    /// Free `handle`'s events and refuse any that arrive later.
    pub fn retire(&self, handle: HandleId) -> usize {
        let Ok(mut state) = self.lock() else {
            return 0;
        };
        state.retired.insert(handle);
        let before = state.events.len();
        state.events.retain(|e| e.handle() != Some(handle));
        before - state.events.len()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|state| state.events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wake every consumer; later waits return `Event::Shutdown`.
    pub fn shutdown(&self) {
        if let Ok(mut state) = self.lock() {
            state.shut_down = true;
        }
        self.inner.ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn data(handle: u64, recno: u64) -> Event {
        let mut datum = Datum::new(format!("r{recno}").into_bytes());
        datum.recno = recno;
        Event::Data {
            handle: HandleId(handle),
            datum,
            context: None,
        }
    }

    #[test]
    fn poll_on_empty_queue_times_out() {
        let queue = EventQueue::new();
        let err = queue.next_event(None, Some(Duration::ZERO)).unwrap_err();
        assert_eq!(err.kind(), crate::core::ErrorKind::Timeout);
    }

    #[test]
    fn filter_skips_other_handles_without_reordering() {
        let queue = EventQueue::new();
        queue.push(data(1, 1)).unwrap();
        queue.push(data(2, 1)).unwrap();
        queue.push(data(1, 2)).unwrap();

        let e = queue.next_event(Some(HandleId(2)), Some(Duration::ZERO)).unwrap();
        assert_eq!(e.handle(), Some(HandleId(2)));
        let first = queue.next_event(None, Some(Duration::ZERO)).unwrap();
        let second = queue.next_event(None, Some(Duration::ZERO)).unwrap();
        assert_eq!(first.recno(), Some(1));
        assert_eq!(second.recno(), Some(2));
    }

    #[test]
    fn filtered_waiters_each_get_their_own_events() {
        let queue = EventQueue::new();
        let mut waiters = Vec::new();
        for handle in [1u64, 2] {
            let queue = queue.clone();
            waiters.push(thread::spawn(move || {
                (1..=50)
                    .map(|_| {
                        queue
                            .next_event(Some(HandleId(handle)), Some(Duration::from_secs(5)))
                            .unwrap()
                            .recno()
                            .unwrap()
                    })
                    .collect::<Vec<_>>()
            }));
        }
        for recno in 1..=50 {
            queue.push(data(1, recno)).unwrap();
            queue.push(data(2, recno)).unwrap();
        }
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), (1..=50).collect::<Vec<_>>());
        }
    }

    #[test]
    fn free_all_drops_only_that_handle() {
        let queue = EventQueue::new();
        queue.push(data(1, 1)).unwrap();
        queue.push(data(2, 1)).unwrap();
        queue.push(data(1, 2)).unwrap();
        assert_eq!(queue.free_all(HandleId(1)), 2);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn retired_handle_refuses_late_events() {
        let queue = EventQueue::new();
        queue.push(data(1, 1)).unwrap();
        assert_eq!(queue.retire(HandleId(1)), 1);
        queue.push(data(1, 2)).unwrap();
        queue.push(data(2, 1)).unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(
            queue.next_event(None, Some(Duration::ZERO)).unwrap().handle(),
            Some(HandleId(2))
        );
    }

    #[test]
    fn shutdown_wakes_blocked_consumer() {
        let queue = EventQueue::new();
        let waiter = {
            let queue = queue.clone();
            thread::spawn(move || queue.next_event(None, None).unwrap())
        };
        thread::sleep(Duration::from_millis(20));
        queue.shutdown();
        assert_eq!(waiter.join().unwrap().kind(), EventKind::Shutdown);
    }

    #[test]
    fn context_round_trips_through_event() {
        let queue = EventQueue::new();
        queue
            .push(Event::Eos {
                handle: HandleId(7),
                delivered: 3,
                context: Some(Context::new("tag")),
            })
            .unwrap();
        let event = queue.next_event(None, Some(Duration::ZERO)).unwrap();
        assert_eq!(event.context().and_then(|c| c.downcast_ref::<&str>()), Some(&"tag"));
    }
}
