//! GDP protocol messages and their CBOR encoding.
//!
//! Every frame body is an envelope map `{v, type, body}`. Requests carry a
//! client-chosen `rid` echoed by the ACK/NAK that answers them; DATA and EOS
//! are pushed out of band and carry the subscription id instead.

use std::convert::Infallible;

use bytes::Bytes;
use minicbor::data::Type;
use minicbor::{Decoder, Encoder};
use thiserror::Error;

use crate::core::{
    Datum, ErrorKind, InternalName, Limits, LogInfo, LogMetadata, MetadataId, OpenMode,
    RecordHash, ServerAddr, Status, Timestamp,
};

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub version: u32,
    pub message: Message,
}

impl Envelope {
    pub fn new(message: Message) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            message,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Request(Request),
    Ack(Ack),
    Nak(Nak),
    Data(DataPush),
    Eos(EosPush),
    Shutdown,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub rid: u64,
    pub op: Op,
}

/// Operations a client may ask of a log or directory server.
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    Open {
        log: InternalName,
        mode: OpenMode,
    },
    Create {
        log: InternalName,
        metadata: LogMetadata,
        human: Option<String>,
    },
    Append {
        log: InternalName,
        datum: Datum,
    },
    Read {
        log: InternalName,
        recno: u64,
    },
    Subscribe {
        log: InternalName,
        sub_id: u64,
        start: u64,
        max: u64,
    },
    Unsubscribe {
        log: InternalName,
        sub_id: u64,
    },
    ForwardAppend {
        log: InternalName,
        target: InternalName,
        datum: Datum,
    },
    Close {
        log: InternalName,
    },
    Delete {
        log: InternalName,
    },
    Stat {
        log: InternalName,
    },
    Resolve {
        name: InternalName,
    },
    Register {
        name: InternalName,
        addr: ServerAddr,
        human: Option<String>,
    },
    Unregister {
        name: InternalName,
        addr: ServerAddr,
    },
    LookupName {
        human: String,
    },
    ReverseName {
        name: InternalName,
    },
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Open { .. } => "OPEN",
            Op::Create { .. } => "CREATE",
            Op::Append { .. } => "APPEND",
            Op::Read { .. } => "READ",
            Op::Subscribe { .. } => "SUBSCRIBE",
            Op::Unsubscribe { .. } => "UNSUBSCRIBE",
            Op::ForwardAppend { .. } => "FWD_APPEND",
            Op::Close { .. } => "CLOSE",
            Op::Delete { .. } => "DELETE",
            Op::Stat { .. } => "STAT",
            Op::Resolve { .. } => "RESOLVE",
            Op::Register { .. } => "REGISTER",
            Op::Unregister { .. } => "UNREGISTER",
            Op::LookupName { .. } => "LOOKUP_NAME",
            Op::ReverseName { .. } => "REVERSE_NAME",
        }
    }

    /// The log this op targets, if any.
    pub fn log(&self) -> Option<&InternalName> {
        match self {
            Op::Open { log, .. }
            | Op::Create { log, .. }
            | Op::Append { log, .. }
            | Op::Read { log, .. }
            | Op::Subscribe { log, .. }
            | Op::Unsubscribe { log, .. }
            | Op::ForwardAppend { log, .. }
            | Op::Close { log }
            | Op::Delete { log }
            | Op::Stat { log } => Some(log),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Ack {
    pub rid: u64,
    pub reply: Reply,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Opened {
        info: LogInfo,
        metadata: LogMetadata,
    },
    Info(LogInfo),
    Appended {
        recno: u64,
        hash: RecordHash,
    },
    Datum(Datum),
    Resolved {
        addrs: Vec<ServerAddr>,
    },
    Name(Option<InternalName>),
    HumanName(Option<String>),
    Done,
}

impl Reply {
    fn as_str(&self) -> &'static str {
        match self {
            Reply::Opened { .. } => "OPENED",
            Reply::Info(_) => "INFO",
            Reply::Appended { .. } => "APPENDED",
            Reply::Datum(_) => "DATUM",
            Reply::Resolved { .. } => "RESOLVED",
            Reply::Name(_) => "NAME",
            Reply::HumanName(_) => "HUMAN",
            Reply::Done => "DONE",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Nak {
    pub rid: u64,
    pub status: Status,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DataPush {
    pub sub_id: u64,
    pub log: InternalName,
    pub datum: Datum,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EosPush {
    pub sub_id: u64,
    pub log: InternalName,
    pub delivered: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MessageType {
    Request,
    Ack,
    Nak,
    Data,
    Eos,
    Shutdown,
}

impl MessageType {
    fn as_str(self) -> &'static str {
        match self {
            MessageType::Request => "REQ",
            MessageType::Ack => "ACK",
            MessageType::Nak => "NAK",
            MessageType::Data => "DATA",
            MessageType::Eos => "EOS",
            MessageType::Shutdown => "SHUTDOWN",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "REQ" => Some(MessageType::Request),
            "ACK" => Some(MessageType::Ack),
            "NAK" => Some(MessageType::Nak),
            "DATA" => Some(MessageType::Data),
            "EOS" => Some(MessageType::Eos),
            "SHUTDOWN" => Some(MessageType::Shutdown),
            _ => None,
        }
    }
}

impl Message {
    fn message_type(&self) -> MessageType {
        match self {
            Message::Request(_) => MessageType::Request,
            Message::Ack(_) => MessageType::Ack,
            Message::Nak(_) => MessageType::Nak,
            Message::Data(_) => MessageType::Data,
            Message::Eos(_) => MessageType::Eos,
            Message::Shutdown => MessageType::Shutdown,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtoEncodeError {
    #[error("cbor encode: {0}")]
    Cbor(#[from] minicbor::encode::Error<Infallible>),
}

#[derive(Debug, Error)]
pub enum ProtoDecodeError {
    #[error("decode limit exceeded: {0}")]
    DecodeLimit(&'static str),
    #[error("indefinite-length CBOR not allowed")]
    IndefiniteLength,
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),
    #[error("unknown op: {0}")]
    UnknownOp(String),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u32),
    #[error("trailing bytes after message body")]
    TrailingBytes,
    #[error("cbor decode: {0}")]
    Cbor(#[from] minicbor::decode::Error),
}

impl ProtoDecodeError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Protocol
    }
}

pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, ProtoEncodeError> {
    let mut buf = Vec::new();
    let mut enc = Encoder::new(&mut buf);
    enc.map(3)?;
    enc.str("v")?;
    enc.u32(envelope.version)?;
    enc.str("type")?;
    enc.str(envelope.message.message_type().as_str())?;
    enc.str("body")?;
    match &envelope.message {
        Message::Request(req) => encode_request(&mut enc, req)?,
        Message::Ack(ack) => encode_ack(&mut enc, ack)?,
        Message::Nak(nak) => encode_nak(&mut enc, nak)?,
        Message::Data(push) => encode_data(&mut enc, push)?,
        Message::Eos(push) => encode_eos(&mut enc, push)?,
        Message::Shutdown => {
            enc.map(0)?;
        }
    }
    Ok(buf)
}

pub fn decode_envelope(bytes: &[u8], limits: &Limits) -> Result<Envelope, ProtoDecodeError> {
    let mut dec = Decoder::new(bytes);
    let map_len = decode_map_len(&mut dec, limits, 0)?;

    let mut version = None;
    let mut message_type = None;
    let mut body_span = None;

    for _ in 0..map_len {
        let key = decode_text(&mut dec, limits)?;
        match key {
            "v" => version = Some(decode_u32(&mut dec, "v")?),
            "type" => {
                let raw = decode_text(&mut dec, limits)?;
                message_type = Some(
                    MessageType::parse(raw)
                        .ok_or_else(|| ProtoDecodeError::UnknownMessageType(raw.to_string()))?,
                );
            }
            "body" => {
                let start = dec.position();
                dec.skip()?;
                let end = dec.position();
                body_span = Some((start, end));
            }
            _ => skip_value(&mut dec)?,
        }
    }

    if dec.datatype().is_ok() {
        return Err(ProtoDecodeError::TrailingBytes);
    }

    let version = version.ok_or(ProtoDecodeError::MissingField("v"))?;
    if version != PROTOCOL_VERSION {
        return Err(ProtoDecodeError::UnsupportedVersion(version));
    }
    let message_type = message_type.ok_or(ProtoDecodeError::MissingField("type"))?;
    let (start, end) = body_span.ok_or(ProtoDecodeError::MissingField("body"))?;

    let mut dec = Decoder::new(&bytes[start..end]);
    let message = match message_type {
        MessageType::Request => Message::Request(decode_request(&mut dec, limits)?),
        MessageType::Ack => Message::Ack(decode_ack(&mut dec, limits)?),
        MessageType::Nak => Message::Nak(decode_nak(&mut dec, limits)?),
        MessageType::Data => Message::Data(decode_data(&mut dec, limits)?),
        MessageType::Eos => Message::Eos(decode_eos(&mut dec, limits)?),
        MessageType::Shutdown => {
            let len = decode_map_len(&mut dec, limits, 1)?;
            for _ in 0..len {
                decode_text(&mut dec, limits)?;
                skip_value(&mut dec)?;
            }
            Message::Shutdown
        }
    };
    if dec.datatype().is_ok() {
        return Err(ProtoDecodeError::TrailingBytes);
    }

    Ok(Envelope { version, message })
}

type Enc<'a> = Encoder<&'a mut Vec<u8>>;

fn encode_request(enc: &mut Enc<'_>, req: &Request) -> Result<(), ProtoEncodeError> {
    let field_count: u64 = match &req.op {
        Op::Open { .. } => 2,
        Op::Create { human, .. } => 2 + u64::from(human.is_some()),
        Op::Append { .. } => 2,
        Op::Read { .. } => 2,
        Op::Subscribe { .. } => 4,
        Op::Unsubscribe { .. } => 2,
        Op::ForwardAppend { .. } => 3,
        Op::Close { .. } | Op::Delete { .. } | Op::Stat { .. } => 1,
        Op::Resolve { .. } => 1,
        Op::Register { human, .. } => 2 + u64::from(human.is_some()),
        Op::Unregister { .. } => 2,
        Op::LookupName { .. } => 1,
        Op::ReverseName { .. } => 1,
    };
    enc.map(2 + field_count)?;
    enc.str("rid")?;
    enc.u64(req.rid)?;
    enc.str("op")?;
    enc.str(req.op.as_str())?;

    match &req.op {
        Op::Open { log, mode } => {
            encode_name_field(enc, "log", log)?;
            enc.str("mode")?;
            enc.str(mode.as_str())?;
        }
        Op::Create {
            log,
            metadata,
            human,
        } => {
            encode_name_field(enc, "log", log)?;
            enc.str("metadata")?;
            encode_metadata(enc, metadata)?;
            if let Some(human) = human {
                enc.str("human")?;
                enc.str(human)?;
            }
        }
        Op::Append { log, datum } => {
            encode_name_field(enc, "log", log)?;
            enc.str("datum")?;
            encode_datum(enc, datum)?;
        }
        Op::Read { log, recno } => {
            encode_name_field(enc, "log", log)?;
            enc.str("recno")?;
            enc.u64(*recno)?;
        }
        Op::Subscribe {
            log,
            sub_id,
            start,
            max,
        } => {
            encode_name_field(enc, "log", log)?;
            enc.str("sub_id")?;
            enc.u64(*sub_id)?;
            enc.str("start")?;
            enc.u64(*start)?;
            enc.str("max")?;
            enc.u64(*max)?;
        }
        Op::Unsubscribe { log, sub_id } => {
            encode_name_field(enc, "log", log)?;
            enc.str("sub_id")?;
            enc.u64(*sub_id)?;
        }
        Op::ForwardAppend { log, target, datum } => {
            encode_name_field(enc, "log", log)?;
            encode_name_field(enc, "target", target)?;
            enc.str("datum")?;
            encode_datum(enc, datum)?;
        }
        Op::Close { log } | Op::Delete { log } | Op::Stat { log } => {
            encode_name_field(enc, "log", log)?;
        }
        Op::Resolve { name } | Op::ReverseName { name } => {
            encode_name_field(enc, "name", name)?;
        }
        Op::Register { name, addr, human } => {
            encode_name_field(enc, "name", name)?;
            enc.str("addr")?;
            enc.str(addr.as_str())?;
            if let Some(human) = human {
                enc.str("human")?;
                enc.str(human)?;
            }
        }
        Op::Unregister { name, addr } => {
            encode_name_field(enc, "name", name)?;
            enc.str("addr")?;
            enc.str(addr.as_str())?;
        }
        Op::LookupName { human } => {
            enc.str("human")?;
            enc.str(human)?;
        }
    }
    Ok(())
}

#[derive(Default)]
struct RequestFields<'a> {
    rid: Option<u64>,
    op: Option<&'a str>,
    log: Option<InternalName>,
    mode: Option<OpenMode>,
    metadata: Option<LogMetadata>,
    human: Option<String>,
    datum: Option<Datum>,
    recno: Option<u64>,
    sub_id: Option<u64>,
    start: Option<u64>,
    max: Option<u64>,
    target: Option<InternalName>,
    name: Option<InternalName>,
    addr: Option<ServerAddr>,
}

fn decode_request(dec: &mut Decoder<'_>, limits: &Limits) -> Result<Request, ProtoDecodeError> {
    let map_len = decode_map_len(dec, limits, 1)?;
    let mut f = RequestFields::default();

    for _ in 0..map_len {
        let key = decode_text(dec, limits)?;
        match key {
            "rid" => f.rid = Some(dec.u64()?),
            "op" => f.op = Some(decode_text(dec, limits)?),
            "log" => f.log = Some(decode_name(dec, limits, "log")?),
            "mode" => {
                let raw = decode_text(dec, limits)?;
                f.mode = Some(OpenMode::parse(raw).ok_or_else(|| {
                    ProtoDecodeError::InvalidField {
                        field: "mode",
                        reason: format!("unknown open mode {raw:?}"),
                    }
                })?);
            }
            "metadata" => f.metadata = Some(decode_metadata(dec, limits, 2)?),
            "human" => f.human = Some(decode_text(dec, limits)?.to_string()),
            "datum" => f.datum = Some(decode_datum(dec, limits, 2)?),
            "recno" => f.recno = Some(dec.u64()?),
            "sub_id" => f.sub_id = Some(dec.u64()?),
            "start" => f.start = Some(dec.u64()?),
            "max" => f.max = Some(dec.u64()?),
            "target" => f.target = Some(decode_name(dec, limits, "target")?),
            "name" => f.name = Some(decode_name(dec, limits, "name")?),
            "addr" => f.addr = Some(ServerAddr::new(decode_text(dec, limits)?)),
            _ => skip_value(dec)?,
        }
    }

    let rid = f.rid.ok_or(ProtoDecodeError::MissingField("rid"))?;
    let op_raw = f.op.ok_or(ProtoDecodeError::MissingField("op"))?;
    let log = f.log;
    let need_log = || log.ok_or(ProtoDecodeError::MissingField("log"));
    let need_name = || f.name.ok_or(ProtoDecodeError::MissingField("name"));

    let op = match op_raw {
        "OPEN" => Op::Open {
            log: need_log()?,
            mode: f.mode.ok_or(ProtoDecodeError::MissingField("mode"))?,
        },
        "CREATE" => Op::Create {
            log: need_log()?,
            metadata: f.metadata.ok_or(ProtoDecodeError::MissingField("metadata"))?,
            human: f.human,
        },
        "APPEND" => Op::Append {
            log: need_log()?,
            datum: f.datum.ok_or(ProtoDecodeError::MissingField("datum"))?,
        },
        "READ" => Op::Read {
            log: need_log()?,
            recno: f.recno.ok_or(ProtoDecodeError::MissingField("recno"))?,
        },
        "SUBSCRIBE" => Op::Subscribe {
            log: need_log()?,
            sub_id: f.sub_id.ok_or(ProtoDecodeError::MissingField("sub_id"))?,
            start: f.start.ok_or(ProtoDecodeError::MissingField("start"))?,
            max: f.max.ok_or(ProtoDecodeError::MissingField("max"))?,
        },
        "UNSUBSCRIBE" => Op::Unsubscribe {
            log: need_log()?,
            sub_id: f.sub_id.ok_or(ProtoDecodeError::MissingField("sub_id"))?,
        },
        "FWD_APPEND" => Op::ForwardAppend {
            log: need_log()?,
            target: f.target.ok_or(ProtoDecodeError::MissingField("target"))?,
            datum: f.datum.ok_or(ProtoDecodeError::MissingField("datum"))?,
        },
        "CLOSE" => Op::Close { log: need_log()? },
        "DELETE" => Op::Delete { log: need_log()? },
        "STAT" => Op::Stat { log: need_log()? },
        "RESOLVE" => Op::Resolve { name: need_name()? },
        "REGISTER" => Op::Register {
            name: need_name()?,
            addr: f.addr.ok_or(ProtoDecodeError::MissingField("addr"))?,
            human: f.human,
        },
        "UNREGISTER" => Op::Unregister {
            name: need_name()?,
            addr: f.addr.ok_or(ProtoDecodeError::MissingField("addr"))?,
        },
        "LOOKUP_NAME" => Op::LookupName {
            human: f.human.ok_or(ProtoDecodeError::MissingField("human"))?,
        },
        "REVERSE_NAME" => Op::ReverseName { name: need_name()? },
        other => return Err(ProtoDecodeError::UnknownOp(other.to_string())),
    };

    Ok(Request { rid, op })
}

fn encode_ack(enc: &mut Enc<'_>, ack: &Ack) -> Result<(), ProtoEncodeError> {
    let field_count: u64 = match &ack.reply {
        Reply::Opened { info, .. } => 2 + u64::from(info.last_hash.is_some()),
        Reply::Info(info) => 1 + u64::from(info.last_hash.is_some()),
        Reply::Appended { .. } => 2,
        Reply::Datum(_) => 1,
        Reply::Resolved { .. } => 1,
        Reply::Name(name) => u64::from(name.is_some()),
        Reply::HumanName(human) => u64::from(human.is_some()),
        Reply::Done => 0,
    };
    enc.map(2 + field_count)?;
    enc.str("rid")?;
    enc.u64(ack.rid)?;
    enc.str("reply")?;
    enc.str(ack.reply.as_str())?;

    match &ack.reply {
        Reply::Opened { info, metadata } => {
            encode_info_fields(enc, info)?;
            enc.str("metadata")?;
            encode_metadata(enc, metadata)?;
        }
        Reply::Info(info) => encode_info_fields(enc, info)?,
        Reply::Appended { recno, hash } => {
            enc.str("recno")?;
            enc.u64(*recno)?;
            enc.str("hash")?;
            enc.bytes(hash.as_bytes())?;
        }
        Reply::Datum(datum) => {
            enc.str("datum")?;
            encode_datum(enc, datum)?;
        }
        Reply::Resolved { addrs } => {
            enc.str("addrs")?;
            enc.array(addrs.len() as u64)?;
            for addr in addrs {
                enc.str(addr.as_str())?;
            }
        }
        Reply::Name(name) => {
            if let Some(name) = name {
                encode_name_field(enc, "name", name)?;
            }
        }
        Reply::HumanName(human) => {
            if let Some(human) = human {
                enc.str("human")?;
                enc.str(human)?;
            }
        }
        Reply::Done => {}
    }
    Ok(())
}

fn encode_info_fields(enc: &mut Enc<'_>, info: &LogInfo) -> Result<(), ProtoEncodeError> {
    enc.str("highest")?;
    enc.u64(info.highest_recno)?;
    if let Some(hash) = &info.last_hash {
        enc.str("last_hash")?;
        enc.bytes(hash.as_bytes())?;
    }
    Ok(())
}

fn decode_ack(dec: &mut Decoder<'_>, limits: &Limits) -> Result<Ack, ProtoDecodeError> {
    let map_len = decode_map_len(dec, limits, 1)?;

    let mut rid = None;
    let mut reply = None;
    let mut highest = None;
    let mut last_hash = None;
    let mut metadata = None;
    let mut recno = None;
    let mut hash = None;
    let mut datum = None;
    let mut addrs = None;
    let mut name = None;
    let mut human = None;

    for _ in 0..map_len {
        let key = decode_text(dec, limits)?;
        match key {
            "rid" => rid = Some(dec.u64()?),
            "reply" => reply = Some(decode_text(dec, limits)?),
            "highest" => highest = Some(dec.u64()?),
            "last_hash" => last_hash = Some(decode_hash(dec, limits, "last_hash")?),
            "metadata" => metadata = Some(decode_metadata(dec, limits, 2)?),
            "recno" => recno = Some(dec.u64()?),
            "hash" => hash = Some(decode_hash(dec, limits, "hash")?),
            "datum" => datum = Some(decode_datum(dec, limits, 2)?),
            "addrs" => {
                let len = decode_array_len(dec, limits, 2)?;
                let mut out = Vec::with_capacity(len);
                for _ in 0..len {
                    out.push(ServerAddr::new(decode_text(dec, limits)?));
                }
                addrs = Some(out);
            }
            "name" => name = Some(decode_name(dec, limits, "name")?),
            "human" => human = Some(decode_text(dec, limits)?.to_string()),
            _ => skip_value(dec)?,
        }
    }

    let rid = rid.ok_or(ProtoDecodeError::MissingField("rid"))?;
    let reply_raw = reply.ok_or(ProtoDecodeError::MissingField("reply"))?;
    let info = || -> Result<LogInfo, ProtoDecodeError> {
        Ok(LogInfo {
            highest_recno: highest.ok_or(ProtoDecodeError::MissingField("highest"))?,
            last_hash,
        })
    };

    let reply = match reply_raw {
        "OPENED" => Reply::Opened {
            info: info()?,
            metadata: metadata.ok_or(ProtoDecodeError::MissingField("metadata"))?,
        },
        "INFO" => Reply::Info(info()?),
        "APPENDED" => Reply::Appended {
            recno: recno.ok_or(ProtoDecodeError::MissingField("recno"))?,
            hash: hash.ok_or(ProtoDecodeError::MissingField("hash"))?,
        },
        "DATUM" => Reply::Datum(datum.ok_or(ProtoDecodeError::MissingField("datum"))?),
        "RESOLVED" => Reply::Resolved {
            addrs: addrs.ok_or(ProtoDecodeError::MissingField("addrs"))?,
        },
        "NAME" => Reply::Name(name),
        "HUMAN" => Reply::HumanName(human),
        "DONE" => Reply::Done,
        other => {
            return Err(ProtoDecodeError::InvalidField {
                field: "reply",
                reason: format!("unknown reply {other:?}"),
            });
        }
    };

    Ok(Ack { rid, reply })
}

fn encode_nak(enc: &mut Enc<'_>, nak: &Nak) -> Result<(), ProtoEncodeError> {
    enc.map(3)?;
    enc.str("rid")?;
    enc.u64(nak.rid)?;
    enc.str("kind")?;
    enc.str(nak.status.kind.as_str())?;
    enc.str("message")?;
    enc.str(&nak.status.message)?;
    Ok(())
}

fn decode_nak(dec: &mut Decoder<'_>, limits: &Limits) -> Result<Nak, ProtoDecodeError> {
    let map_len = decode_map_len(dec, limits, 1)?;
    let mut rid = None;
    let mut kind = None;
    let mut message = None;

    for _ in 0..map_len {
        let key = decode_text(dec, limits)?;
        match key {
            "rid" => rid = Some(dec.u64()?),
            "kind" => {
                let raw = decode_text(dec, limits)?;
                kind = Some(
                    ErrorKind::parse(raw).ok_or_else(|| ProtoDecodeError::InvalidField {
                        field: "kind",
                        reason: format!("unknown error kind {raw:?}"),
                    })?,
                );
            }
            "message" => message = Some(decode_text(dec, limits)?.to_string()),
            _ => skip_value(dec)?,
        }
    }

    Ok(Nak {
        rid: rid.ok_or(ProtoDecodeError::MissingField("rid"))?,
        status: Status::new(
            kind.ok_or(ProtoDecodeError::MissingField("kind"))?,
            message.unwrap_or_default(),
        ),
    })
}

fn encode_data(enc: &mut Enc<'_>, push: &DataPush) -> Result<(), ProtoEncodeError> {
    enc.map(3)?;
    enc.str("sub_id")?;
    enc.u64(push.sub_id)?;
    encode_name_field(enc, "log", &push.log)?;
    enc.str("datum")?;
    encode_datum(enc, &push.datum)?;
    Ok(())
}

fn decode_data(dec: &mut Decoder<'_>, limits: &Limits) -> Result<DataPush, ProtoDecodeError> {
    let map_len = decode_map_len(dec, limits, 1)?;
    let mut sub_id = None;
    let mut log = None;
    let mut datum = None;

    for _ in 0..map_len {
        let key = decode_text(dec, limits)?;
        match key {
            "sub_id" => sub_id = Some(dec.u64()?),
            "log" => log = Some(decode_name(dec, limits, "log")?),
            "datum" => datum = Some(decode_datum(dec, limits, 2)?),
            _ => skip_value(dec)?,
        }
    }

    Ok(DataPush {
        sub_id: sub_id.ok_or(ProtoDecodeError::MissingField("sub_id"))?,
        log: log.ok_or(ProtoDecodeError::MissingField("log"))?,
        datum: datum.ok_or(ProtoDecodeError::MissingField("datum"))?,
    })
}

fn encode_eos(enc: &mut Enc<'_>, push: &EosPush) -> Result<(), ProtoEncodeError> {
    enc.map(3)?;
    enc.str("sub_id")?;
    enc.u64(push.sub_id)?;
    encode_name_field(enc, "log", &push.log)?;
    enc.str("delivered")?;
    enc.u64(push.delivered)?;
    Ok(())
}

fn decode_eos(dec: &mut Decoder<'_>, limits: &Limits) -> Result<EosPush, ProtoDecodeError> {
    let map_len = decode_map_len(dec, limits, 1)?;
    let mut sub_id = None;
    let mut log = None;
    let mut delivered = None;

    for _ in 0..map_len {
        let key = decode_text(dec, limits)?;
        match key {
            "sub_id" => sub_id = Some(dec.u64()?),
            "log" => log = Some(decode_name(dec, limits, "log")?),
            "delivered" => delivered = Some(dec.u64()?),
            _ => skip_value(dec)?,
        }
    }

    Ok(EosPush {
        sub_id: sub_id.ok_or(ProtoDecodeError::MissingField("sub_id"))?,
        log: log.ok_or(ProtoDecodeError::MissingField("log"))?,
        delivered: delivered.unwrap_or(0),
    })
}

fn encode_name_field(
    enc: &mut Enc<'_>,
    key: &str,
    name: &InternalName,
) -> Result<(), ProtoEncodeError> {
    enc.str(key)?;
    enc.bytes(name.as_bytes())?;
    Ok(())
}

fn encode_datum(enc: &mut Enc<'_>, datum: &Datum) -> Result<(), ProtoEncodeError> {
    let len = 4 + u64::from(datum.prevhash.is_some()) + u64::from(datum.signature.is_some());
    enc.map(len)?;
    enc.str("recno")?;
    enc.u64(datum.recno)?;
    enc.str("secs")?;
    enc.i64(datum.ts.secs)?;
    enc.str("nanos")?;
    enc.u32(datum.ts.nanos)?;
    enc.str("payload")?;
    enc.bytes(&datum.payload)?;
    if let Some(prev) = &datum.prevhash {
        enc.str("prevhash")?;
        enc.bytes(prev.as_bytes())?;
    }
    if let Some(sig) = &datum.signature {
        enc.str("sig")?;
        enc.bytes(sig)?;
    }
    Ok(())
}

fn decode_datum(
    dec: &mut Decoder<'_>,
    limits: &Limits,
    depth: usize,
) -> Result<Datum, ProtoDecodeError> {
    let map_len = decode_map_len(dec, limits, depth)?;
    let mut recno = None;
    let mut secs = None;
    let mut nanos = None;
    let mut payload = None;
    let mut prevhash = None;
    let mut signature = None;

    for _ in 0..map_len {
        let key = decode_text(dec, limits)?;
        match key {
            "recno" => recno = Some(dec.u64()?),
            "secs" => secs = Some(dec.i64()?),
            "nanos" => nanos = Some(decode_u32(dec, "nanos")?),
            "payload" => {
                let raw = decode_bytes(dec, limits, "payload")?;
                if raw.len() > limits.max_payload_bytes {
                    return Err(ProtoDecodeError::DecodeLimit("max_payload_bytes"));
                }
                payload = Some(Bytes::copy_from_slice(raw));
            }
            "prevhash" => prevhash = Some(decode_hash(dec, limits, "prevhash")?),
            "sig" => {
                signature = Some(Bytes::copy_from_slice(decode_bytes(dec, limits, "sig")?));
            }
            _ => skip_value(dec)?,
        }
    }

    Ok(Datum {
        recno: recno.ok_or(ProtoDecodeError::MissingField("recno"))?,
        ts: Timestamp {
            secs: secs.ok_or(ProtoDecodeError::MissingField("secs"))?,
            nanos: nanos.unwrap_or(0),
        },
        payload: payload.ok_or(ProtoDecodeError::MissingField("payload"))?,
        prevhash,
        signature,
    })
}

fn encode_metadata(enc: &mut Enc<'_>, metadata: &LogMetadata) -> Result<(), ProtoEncodeError> {
    enc.array(metadata.len() as u64)?;
    for (id, value) in metadata.iter() {
        enc.array(2)?;
        enc.u32(id.0)?;
        enc.bytes(value)?;
    }
    Ok(())
}

fn decode_metadata(
    dec: &mut Decoder<'_>,
    limits: &Limits,
    depth: usize,
) -> Result<LogMetadata, ProtoDecodeError> {
    let len = decode_array_len(dec, limits, depth)?;
    if len > limits.max_metadata_entries {
        return Err(ProtoDecodeError::DecodeLimit("max_metadata_entries"));
    }
    let mut metadata = LogMetadata::new();
    for _ in 0..len {
        let pair = decode_array_len(dec, limits, depth + 1)?;
        if pair != 2 {
            return Err(ProtoDecodeError::InvalidField {
                field: "metadata",
                reason: format!("entry has {pair} elements, expected 2"),
            });
        }
        let id = MetadataId(decode_u32(dec, "metadata")?);
        let value = Bytes::copy_from_slice(decode_bytes(dec, limits, "metadata")?);
        if metadata.insert(id, value).is_some() {
            return Err(ProtoDecodeError::InvalidField {
                field: "metadata",
                reason: format!("duplicate entry {}", id.label()),
            });
        }
    }
    Ok(metadata)
}

fn decode_name(
    dec: &mut Decoder<'_>,
    limits: &Limits,
    field: &'static str,
) -> Result<InternalName, ProtoDecodeError> {
    let raw = decode_bytes(dec, limits, field)?;
    InternalName::from_slice(raw).ok_or_else(|| ProtoDecodeError::InvalidField {
        field,
        reason: format!("expected 32 bytes, got {}", raw.len()),
    })
}

fn decode_hash(
    dec: &mut Decoder<'_>,
    limits: &Limits,
    field: &'static str,
) -> Result<RecordHash, ProtoDecodeError> {
    let raw = decode_bytes(dec, limits, field)?;
    RecordHash::from_slice(raw).ok_or_else(|| ProtoDecodeError::InvalidField {
        field,
        reason: format!("expected 32 bytes, got {}", raw.len()),
    })
}

fn decode_map_len(
    dec: &mut Decoder,
    limits: &Limits,
    depth: usize,
) -> Result<usize, ProtoDecodeError> {
    ensure_depth(limits, depth)?;
    let len = dec.map()?;
    let Some(len) = len else {
        return Err(ProtoDecodeError::IndefiniteLength);
    };
    if len > limits.max_cbor_map_entries as u64 {
        return Err(ProtoDecodeError::DecodeLimit("max_cbor_map_entries"));
    }
    usize::try_from(len).map_err(|_| ProtoDecodeError::DecodeLimit("max_cbor_map_entries"))
}

fn decode_array_len(
    dec: &mut Decoder,
    limits: &Limits,
    depth: usize,
) -> Result<usize, ProtoDecodeError> {
    ensure_depth(limits, depth)?;
    let len = dec.array()?;
    let Some(len) = len else {
        return Err(ProtoDecodeError::IndefiniteLength);
    };
    if len > limits.max_cbor_array_entries as u64 {
        return Err(ProtoDecodeError::DecodeLimit("max_cbor_array_entries"));
    }
    usize::try_from(len).map_err(|_| ProtoDecodeError::DecodeLimit("max_cbor_array_entries"))
}

fn decode_text<'a>(dec: &mut Decoder<'a>, limits: &Limits) -> Result<&'a str, ProtoDecodeError> {
    let ty = dec.datatype()?;
    if matches!(ty, Type::StringIndef) {
        return Err(ProtoDecodeError::IndefiniteLength);
    }
    let s = dec.str()?;
    if s.len() > limits.max_cbor_text_string_len {
        return Err(ProtoDecodeError::DecodeLimit("max_cbor_text_string_len"));
    }
    Ok(s)
}

fn decode_bytes<'a>(
    dec: &mut Decoder<'a>,
    limits: &Limits,
    field: &'static str,
) -> Result<&'a [u8], ProtoDecodeError> {
    let ty = dec.datatype()?;
    if matches!(ty, Type::BytesIndef) {
        return Err(ProtoDecodeError::IndefiniteLength);
    }
    let bytes = dec.bytes()?;
    if bytes.len() > limits.max_cbor_bytes_string_len {
        return Err(ProtoDecodeError::InvalidField {
            field,
            reason: "bytes length exceeds limit".into(),
        });
    }
    Ok(bytes)
}

fn decode_u32(dec: &mut Decoder, field: &'static str) -> Result<u32, ProtoDecodeError> {
    let value = dec.u64()?;
    u32::try_from(value).map_err(|_| ProtoDecodeError::InvalidField {
        field,
        reason: format!("value {value} out of range for u32"),
    })
}

fn ensure_depth(limits: &Limits, depth: usize) -> Result<(), ProtoDecodeError> {
    if depth > limits.max_cbor_depth {
        return Err(ProtoDecodeError::DecodeLimit("max_cbor_depth"));
    }
    Ok(())
}

fn skip_value(dec: &mut Decoder) -> Result<(), ProtoDecodeError> {
    let ty = dec.datatype()?;
    if matches!(
        ty,
        Type::BytesIndef | Type::StringIndef | Type::ArrayIndef | Type::MapIndef
    ) {
        return Err(ProtoDecodeError::IndefiniteLength);
    }
    dec.skip()?;
    Ok(())
}
