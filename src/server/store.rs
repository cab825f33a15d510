//! In-memory log storage.
//!
//! All mutation happens under one lock, so recno assignment, chain checks
//! and subscriber fan-out see a single order of commits.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crossbeam::channel::Sender;

use super::ServerError;
use super::subscription::{ConnKey, Subscriber, SubscriberSet};
use crate::core::{
    Datum, ErrorKind, InternalName, Limits, LogInfo, LogMetadata, PublicKey, RecordHash, Status,
};
use crate::proto::Message;

struct StoredLog {
    metadata: LogMetadata,
    writer: Option<PublicKey>,
    records: Vec<Datum>,
    last_hash: Option<RecordHash>,
    subscribers: SubscriberSet,
}

impl StoredLog {
    fn highest(&self) -> u64 {
        self.records.len() as u64
    }

    fn info(&self) -> LogInfo {
        LogInfo {
            highest_recno: self.highest(),
            last_hash: self.last_hash,
        }
    }

    fn check_signature(&self, datum: &Datum) -> Result<(), ServerError> {
        if let Some(writer) = &self.writer {
            datum.verify(writer).map_err(|err| {
                Status::new(ErrorKind::PermissionDenied, format!("record rejected: {err}"))
            })?;
        }
        Ok(())
    }

    fn check_chain(&self, datum: &Datum) -> Result<(), ServerError> {
        let Some(prev) = datum.prevhash else {
            return Ok(());
        };
        let expected = self.highest() + 1;
        if datum.recno != expected {
            return Err(conflict(format!(
                "chained record names recno {}, next is {expected}",
                datum.recno
            )));
        }
        if Some(prev) != self.last_hash {
            return Err(conflict(format!(
                "chained record {} does not follow the current head",
                datum.recno
            )));
        }
        Ok(())
    }

    fn commit(&mut self, name: &InternalName, datum: Datum) -> (u64, RecordHash) {
        let hash = datum.record_hash();
        let recno = datum.recno;
        self.subscribers.publish(name, &datum);
        self.records.push(datum);
        self.last_hash = Some(hash);
        (recno, hash)
    }
}

fn conflict(message: String) -> ServerError {
    Status::new(ErrorKind::SequenceConflict, message).into()
}

fn missing(name: &InternalName) -> ServerError {
    Status::not_found(format!("no log {name}")).into()
}

pub struct LogStore {
    logs: Mutex<HashMap<InternalName, StoredLog>>,
    limits: Limits,
}

impl LogStore {
    pub fn new(limits: Limits) -> Self {
        Self {
            logs: Mutex::new(HashMap::new()),
            limits,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<InternalName, StoredLog>>, ServerError> {
        self.logs
            .lock()
            .map_err(|_| ServerError::LockPoisoned("log store"))
    }

    /// Create `name`. Re-creating with identical metadata is a no-op.
    pub fn create(&self, name: &InternalName, metadata: LogMetadata) -> Result<LogInfo, ServerError> {
        if metadata.len() > self.limits.max_metadata_entries {
            return Err(Status::new(ErrorKind::Protocol, "too many metadata entries").into());
        }
        let writer = metadata
            .writer_key()
            .map_err(|err| Status::new(ErrorKind::Protocol, format!("bad writer key: {err}")))?;
        let mut logs = self.lock()?;
        if let Some(existing) = logs.get(name) {
            if existing.metadata == metadata {
                return Ok(existing.info());
            }
            return Err(Status::new(
                ErrorKind::PermissionDenied,
                format!("{name} exists with different metadata"),
            )
            .into());
        }
        logs.insert(
            *name,
            StoredLog {
                metadata,
                writer,
                records: Vec::new(),
                last_hash: None,
                subscribers: SubscriberSet::default(),
            },
        );
        tracing::info!(log = %name, "log created");
        Ok(LogInfo::default())
    }

    pub fn open(&self, name: &InternalName) -> Result<(LogInfo, LogMetadata), ServerError> {
        let logs = self.lock()?;
        let log = logs.get(name).ok_or_else(|| missing(name))?;
        Ok((log.info(), log.metadata.clone()))
    }

    pub fn stat(&self, name: &InternalName) -> Result<LogInfo, ServerError> {
        let logs = self.lock()?;
        Ok(logs.get(name).ok_or_else(|| missing(name))?.info())
    }

    pub fn contains(&self, name: &InternalName) -> bool {
        self.lock().map(|logs| logs.contains_key(name)).unwrap_or(false)
    }

    /// Append a client record. Unchained records get the next recno.
    pub fn append(&self, name: &InternalName, mut datum: Datum) -> Result<(u64, RecordHash), ServerError> {
        self.check_payload(&datum)?;
        let mut logs = self.lock()?;
        let log = logs.get_mut(name).ok_or_else(|| missing(name))?;
        log.check_signature(&datum)?;
        log.check_chain(&datum)?;
        if !datum.is_chained() {
            datum.recno = log.highest() + 1;
        }
        Ok(log.commit(name, datum))
    }

    /// Commit a forwarded record at the recno it carries.
    pub fn append_forwarded(
        &self,
        name: &InternalName,
        datum: Datum,
    ) -> Result<(u64, RecordHash), ServerError> {
        self.check_payload(&datum)?;
        let mut logs = self.lock()?;
        let log = logs.get_mut(name).ok_or_else(|| missing(name))?;
        log.check_signature(&datum)?;
        let expected = log.highest() + 1;
        if datum.recno != expected {
            return Err(conflict(format!(
                "forwarded record {} out of order, next is {expected}",
                datum.recno
            )));
        }
        log.check_chain(&datum)?;
        Ok(log.commit(name, datum))
    }

    fn check_payload(&self, datum: &Datum) -> Result<(), ServerError> {
        if datum.payload.len() > self.limits.max_payload_bytes {
            return Err(Status::new(
                ErrorKind::Protocol,
                format!(
                    "payload of {} bytes exceeds {}",
                    datum.payload.len(),
                    self.limits.max_payload_bytes
                ),
            )
            .into());
        }
        Ok(())
    }

    pub fn read(&self, name: &InternalName, recno: u64) -> Result<Datum, ServerError> {
        let logs = self.lock()?;
        let log = logs.get(name).ok_or_else(|| missing(name))?;
        if recno == 0 || recno > log.highest() {
            return Err(Status::new(
                ErrorKind::OutOfRange,
                format!("recno {recno} out of range 1..={}", log.highest()),
            )
            .into());
        }
        Ok(log.records[(recno - 1) as usize].clone())
    }

    /// Register a subscriber, replaying history first when `start >= 1`.
    ///
    /// `start == 0` sees only records committed after this call. Returns the
    /// log head at registration so the caller knows where delivery begins.
    pub fn subscribe(
        &self,
        name: &InternalName,
        conn: ConnKey,
        sub_id: u64,
        start: u64,
        max: u64,
        outbound: Sender<Message>,
    ) -> Result<LogInfo, ServerError> {
        let mut logs = self.lock()?;
        let log = logs.get_mut(name).ok_or_else(|| missing(name))?;
        let info = log.info();
        if log.subscribers.len() >= self.limits.max_subscriptions_per_log {
            return Err(Status::unavailable(format!("{name} has too many subscribers")).into());
        }
        let mut subscriber = Subscriber {
            conn,
            sub_id,
            next_recno: if start == 0 { log.highest() + 1 } else { start },
            remaining: (max > 0).then_some(max),
            delivered: 0,
            outbound,
        };
        if start >= 1 {
            let backlog = log.highest().saturating_sub(start - 1) as usize;
            if backlog > self.limits.max_subscription_replay {
                return Err(Status::new(
                    ErrorKind::OutOfRange,
                    format!("replay of {backlog} records exceeds limit"),
                )
                .into());
            }
            let first = (start - 1) as usize;
            for datum in log.records.iter().skip(first) {
                if !subscriber.deliver(name, datum) {
                    // Quota met during replay, or the peer went away.
                    return Ok(info);
                }
            }
        }
        tracing::debug!(log = %name, conn, sub_id, start, max, "subscriber added");
        log.subscribers.add(subscriber);
        Ok(info)
    }

    pub fn unsubscribe(&self, name: &InternalName, conn: ConnKey, sub_id: u64) -> Result<(), ServerError> {
        let mut logs = self.lock()?;
        let log = logs.get_mut(name).ok_or_else(|| missing(name))?;
        if log.subscribers.remove(conn, sub_id) {
            Ok(())
        } else {
            Err(Status::not_found(format!("no subscription {sub_id}")).into())
        }
    }

    pub fn delete(&self, name: &InternalName) -> Result<(), ServerError> {
        let mut logs = self.lock()?;
        let mut log = logs.remove(name).ok_or_else(|| missing(name))?;
        log.subscribers.end_all(name);
        tracing::info!(log = %name, records = log.records.len(), "log deleted");
        Ok(())
    }

    /// Drop all subscriptions held by a departed connection.
    pub fn drop_connection(&self, conn: ConnKey) {
        let Ok(mut logs) = self.lock() else {
            return;
        };
        let dropped: usize = logs
            .values_mut()
            .map(|log| log.subscribers.remove_conn(conn))
            .sum();
        if dropped > 0 {
            tracing::debug!(conn, dropped, "subscriptions dropped with connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MetadataId, SigningKeyPair};
    use bytes::Bytes;

    fn store_with_log() -> (LogStore, InternalName) {
        let store = LogStore::new(Limits::default());
        let name = InternalName::from_bytes([7; 32]);
        store.create(&name, LogMetadata::new()).unwrap();
        (store, name)
    }

    fn append_n(store: &LogStore, name: &InternalName, n: u64) {
        for i in 0..n {
            store.append(name, Datum::new(format!("r{}", i + 1).into_bytes())).unwrap();
        }
    }

    #[test]
    fn appends_get_consecutive_recnos() {
        let (store, name) = store_with_log();
        let (r1, _) = store.append(&name, Datum::new(&b"a"[..])).unwrap();
        let (r2, h2) = store.append(&name, Datum::new(&b"b"[..])).unwrap();
        assert_eq!((r1, r2), (1, 2));
        assert_eq!(store.stat(&name).unwrap().last_hash, Some(h2));
        assert_eq!(store.read(&name, 2).unwrap().payload, Bytes::from_static(b"b"));
    }

    #[test]
    fn read_outside_bounds_is_out_of_range() {
        let (store, name) = store_with_log();
        append_n(&store, &name, 1);
        assert_eq!(store.read(&name, 0).unwrap_err().kind(), ErrorKind::OutOfRange);
        assert_eq!(store.read(&name, 2).unwrap_err().kind(), ErrorKind::OutOfRange);
        let other = InternalName::from_bytes([8; 32]);
        assert_eq!(store.read(&other, 1).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn forwarded_append_must_be_next_in_sequence() {
        let (store, name) = store_with_log();
        append_n(&store, &name, 10);
        let mut early = Datum::new(&b"twelve"[..]);
        early.recno = 12;
        let err = store.append_forwarded(&name, early).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SequenceConflict);

        let mut next = Datum::new(&b"eleven"[..]);
        next.recno = 11;
        assert_eq!(store.append_forwarded(&name, next).unwrap().0, 11);
    }

    #[test]
    fn chained_append_checks_head() {
        let (store, name) = store_with_log();
        let (_, h1) = store.append(&name, Datum::new(&b"a"[..])).unwrap();
        let stale = Datum::new(&b"x"[..]).chained(2, RecordHash([0; 32]));
        assert_eq!(
            store.append(&name, stale).unwrap_err().kind(),
            ErrorKind::SequenceConflict
        );
        let good = Datum::new(&b"b"[..]).chained(2, h1);
        assert_eq!(store.append(&name, good).unwrap().0, 2);
    }

    #[test]
    fn writer_key_requires_valid_signature() {
        let key = SigningKeyPair::generate();
        let store = LogStore::new(Limits::default());
        let name = InternalName::from_bytes([9; 32]);
        let mut metadata = LogMetadata::new();
        metadata.insert(
            MetadataId::WRITER_PUBKEY,
            Bytes::from(key.public_key().to_metadata_bytes()),
        );
        store.create(&name, metadata).unwrap();

        let unsigned = Datum::new(&b"a"[..]);
        assert_eq!(
            store.append(&name, unsigned).unwrap_err().kind(),
            ErrorKind::PermissionDenied
        );
        let mut signed = Datum::new(&b"a"[..]);
        signed.sign(&key);
        assert_eq!(store.append(&name, signed).unwrap().0, 1);
    }

    #[test]
    fn subscribe_replays_then_goes_live() {
        let (store, name) = store_with_log();
        append_n(&store, &name, 3);
        let (tx, rx) = crossbeam::channel::unbounded();
        store.subscribe(&name, 1, 5, 2, 0, tx).unwrap();
        append_n(&store, &name, 1);
        let recnos: Vec<u64> = rx
            .try_iter()
            .filter_map(|m| match m {
                Message::Data(push) => Some(push.datum.recno),
                _ => None,
            })
            .collect();
        assert_eq!(recnos, vec![2, 3, 4]);
    }

    #[test]
    fn subscribe_from_zero_skips_history() {
        let (store, name) = store_with_log();
        append_n(&store, &name, 3);
        let (tx, rx) = crossbeam::channel::unbounded();
        let head = store.subscribe(&name, 1, 5, 0, 0, tx).unwrap();
        assert_eq!(head.highest_recno, 3);
        assert!(rx.try_recv().is_err());
        append_n(&store, &name, 1);
        match rx.try_recv().unwrap() {
            Message::Data(push) => assert_eq!(push.datum.recno, 4),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn delete_ends_subscriptions() {
        let (store, name) = store_with_log();
        let (tx, rx) = crossbeam::channel::unbounded();
        store.subscribe(&name, 1, 5, 0, 0, tx).unwrap();
        store.delete(&name).unwrap();
        assert!(matches!(rx.try_recv().unwrap(), Message::Eos(_)));
        assert_eq!(store.stat(&name).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn recreate_with_same_metadata_is_idempotent() {
        let (store, name) = store_with_log();
        append_n(&store, &name, 2);
        let info = store.create(&name, LogMetadata::new()).unwrap();
        assert_eq!(info.highest_recno, 2);
    }
}
