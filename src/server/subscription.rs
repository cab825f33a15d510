//! Server-side subscriber bookkeeping for one log.

use crossbeam::channel::Sender;

use crate::core::{Datum, InternalName};
use crate::proto::{DataPush, EosPush, Message};

/// Identifies one accepted connection.
pub type ConnKey = u64;

pub struct Subscriber {
    pub conn: ConnKey,
    pub sub_id: u64,
    /// Lowest recno this subscriber still wants.
    pub next_recno: u64,
    pub remaining: Option<u64>,
    pub delivered: u64,
    pub outbound: Sender<Message>,
}

impl Subscriber {
    /// Send one record. Returns false when the subscriber is finished,
    /// either because its quota ran out (EOS sent) or its connection is gone.
    pub fn deliver(&mut self, log: &InternalName, datum: &Datum) -> bool {
        if datum.recno < self.next_recno {
            return true;
        }
        let push = Message::Data(DataPush {
            sub_id: self.sub_id,
            log: *log,
            datum: datum.clone(),
        });
        if self.outbound.send(push).is_err() {
            return false;
        }
        self.next_recno = datum.recno + 1;
        self.delivered += 1;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                self.end(log);
                return false;
            }
        }
        true
    }

    pub fn end(&self, log: &InternalName) {
        let _ = self.outbound.send(Message::Eos(EosPush {
            sub_id: self.sub_id,
            log: *log,
            delivered: self.delivered,
        }));
    }
}

#[derive(Default)]
pub struct SubscriberSet {
    subscribers: Vec<Subscriber>,
}

impl SubscriberSet {
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn add(&mut self, subscriber: Subscriber) {
        self.subscribers.push(subscriber);
    }

    /// Push a committed record to every subscriber, dropping finished ones.
    pub fn publish(&mut self, log: &InternalName, datum: &Datum) {
        let before = self.subscribers.len();
        self.subscribers.retain_mut(|sub| sub.deliver(log, datum));
        let dropped = before - self.subscribers.len();
        if dropped > 0 {
            tracing::debug!(log = %log, dropped, "subscribers finished");
        }
    }

    pub fn remove(&mut self, conn: ConnKey, sub_id: u64) -> bool {
        let before = self.subscribers.len();
        self.subscribers
            .retain(|sub| !(sub.conn == conn && sub.sub_id == sub_id));
        before != self.subscribers.len()
    }

    pub fn remove_conn(&mut self, conn: ConnKey) -> usize {
        let before = self.subscribers.len();
        self.subscribers.retain(|sub| sub.conn != conn);
        before - self.subscribers.len()
    }

    /// End every subscription with EOS.
    pub fn end_all(&mut self, log: &InternalName) {
        for sub in self.subscribers.drain(..) {
            sub.end(log);
        }
    }
}
