//! Request dispatch for one log server.

use std::sync::{Arc, Mutex};

use crossbeam::channel::Sender;

use super::ServerError;
use super::directory::Directory;
use super::store::LogStore;
use super::subscription::ConnKey;
use crate::client::{ClientConfig, GdpClient};
use crate::core::{Datum, ErrorKind, InternalName, ServerAddr, Status};
use crate::proto::{Ack, Message, Nak, Op, Reply, Request};

/// Client used to reach other servers: the directory when it is remote,
/// and peers that forwarded appends are relayed to.
pub(crate) struct Relay {
    config: ClientConfig,
    client: Mutex<Option<GdpClient>>,
}

impl Relay {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
        }
    }

    fn client(&self) -> Result<GdpClient, ServerError> {
        let mut slot = self
            .client
            .lock()
            .map_err(|_| ServerError::LockPoisoned("relay client"))?;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = GdpClient::new(self.config.clone())?;
        *slot = Some(client.clone());
        Ok(client)
    }

    /// Hand `datum` to the server registered as `target`.
    fn forward(
        &self,
        log: &InternalName,
        target: &InternalName,
        datum: Datum,
    ) -> Result<Reply, ServerError> {
        let client = self.client()?;
        let addr = client.resolve(target)?;
        tracing::debug!(log = %log, target = %target, %addr, recno = datum.recno, "relaying forwarded record");
        let op = Op::ForwardAppend {
            log: *log,
            target: *target,
            datum,
        };
        let reply = client.with_retry("relay", || {
            let lease = client.pool().acquire(&addr)?;
            client.call(&lease, None, op.clone())
        })?;
        Ok(reply)
    }

    pub fn shutdown(&self) {
        if let Ok(mut slot) = self.client.lock()
            && let Some(client) = slot.take()
        {
            client.shutdown();
        }
    }
}

pub(crate) struct Handler {
    pub store: Arc<LogStore>,
    pub directory: Option<Arc<Directory>>,
    pub name: InternalName,
    pub advertise: ServerAddr,
    pub relay: Relay,
}

impl Handler {
    pub fn handle(&self, conn: ConnKey, request: Request, outbound: &Sender<Message>) -> Message {
        let rid = request.rid;
        let op = request.op.as_str();
        match self.dispatch(conn, request.op, outbound) {
            Ok(reply) => Message::Ack(Ack { rid, reply }),
            Err(err) => {
                let status = err.to_status();
                match status.kind {
                    ErrorKind::Internal | ErrorKind::Unavailable | ErrorKind::Protocol => {
                        tracing::warn!(conn, rid, op, "request failed: {status}");
                    }
                    _ => tracing::debug!(conn, rid, op, "request refused: {status}"),
                }
                Message::Nak(Nak { rid, status })
            }
        }
    }

    fn dispatch(
        &self,
        conn: ConnKey,
        op: Op,
        outbound: &Sender<Message>,
    ) -> Result<Reply, ServerError> {
        match op {
            Op::Open { log, mode } => {
                let (info, metadata) = self.store.open(&log)?;
                tracing::debug!(conn, log = %log, mode = mode.as_str(), "opened");
                Ok(Reply::Opened { info, metadata })
            }
            Op::Create {
                log,
                metadata,
                human,
            } => {
                let info = self.store.create(&log, metadata)?;
                self.register(&log, human.as_deref())?;
                Ok(Reply::Info(info))
            }
            Op::Append { log, datum } => {
                let (recno, hash) = self.store.append(&log, datum)?;
                Ok(Reply::Appended { recno, hash })
            }
            Op::Read { log, recno } => Ok(Reply::Datum(self.store.read(&log, recno)?)),
            Op::Subscribe {
                log,
                sub_id,
                start,
                max,
            } => {
                let head = self
                    .store
                    .subscribe(&log, conn, sub_id, start, max, outbound.clone())?;
                Ok(Reply::Info(head))
            }
            Op::Unsubscribe { log, sub_id } => {
                self.store.unsubscribe(&log, conn, sub_id)?;
                Ok(Reply::Done)
            }
            Op::ForwardAppend { log, target, datum } => {
                if target == self.name {
                    let (recno, hash) = self.store.append_forwarded(&log, datum)?;
                    Ok(Reply::Appended { recno, hash })
                } else {
                    self.relay.forward(&log, &target, datum)
                }
            }
            Op::Close { log } => {
                // Subscriptions end by UNSUBSCRIBE or with the connection.
                tracing::debug!(conn, log = %log, "closed");
                Ok(Reply::Done)
            }
            Op::Delete { log } => {
                self.store.delete(&log)?;
                if let Err(err) = self.unregister(&log) {
                    tracing::warn!(log = %log, "unregister after delete failed: {err}");
                }
                Ok(Reply::Done)
            }
            Op::Stat { log } => Ok(Reply::Info(self.store.stat(&log)?)),
            Op::Resolve { name } => Ok(Reply::Resolved {
                addrs: self.directory()?.resolve(&name)?,
            }),
            Op::Register { name, addr, human } => {
                self.directory()?.register(&name, &addr, human.as_deref())?;
                Ok(Reply::Done)
            }
            Op::Unregister { name, addr } => {
                self.directory()?.unregister(&name, &addr)?;
                Ok(Reply::Done)
            }
            Op::LookupName { human } => Ok(Reply::Name(self.directory()?.lookup(&human)?)),
            Op::ReverseName { name } => Ok(Reply::HumanName(self.directory()?.reverse(&name)?)),
        }
    }

    fn directory(&self) -> Result<&Directory, ServerError> {
        self.directory
            .as_deref()
            .ok_or_else(|| Status::new(ErrorKind::NotFound, "no directory on this server").into())
    }

    /// Publish `name` at this server's address.
    pub fn register(&self, name: &InternalName, human: Option<&str>) -> Result<(), ServerError> {
        match &self.directory {
            Some(directory) => directory.register(name, &self.advertise, human),
            None => Ok(self.relay.client()?.register(name, &self.advertise, human)?),
        }
    }

    fn unregister(&self, name: &InternalName) -> Result<(), ServerError> {
        match &self.directory {
            Some(directory) => directory.unregister(name, &self.advertise),
            None => Ok(self.relay.client()?.unregister(name, &self.advertise)?),
        }
    }
}
