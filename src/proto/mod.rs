//! Wire protocol: crc-checked frames carrying CBOR envelopes.

pub mod frame;
pub mod message;

pub use frame::{FRAME_HEADER_LEN, FrameError, FrameReader, FrameWriter, encode_frame};
pub use message::{
    Ack, DataPush, Envelope, EosPush, Message, Nak, Op, PROTOCOL_VERSION, ProtoDecodeError,
    ProtoEncodeError, Reply, Request, decode_envelope, encode_envelope,
};

use crate::core::Limits;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Encode(#[from] ProtoEncodeError),
    #[error(transparent)]
    Decode(#[from] ProtoDecodeError),
}

impl WireError {
    pub fn kind(&self) -> crate::core::ErrorKind {
        match self {
            WireError::Frame(e) => e.kind(),
            WireError::Encode(_) => crate::core::ErrorKind::Internal,
            WireError::Decode(e) => e.kind(),
        }
    }
}

/// Read and decode the next message; `None` on clean EOF.
pub fn read_message<R: std::io::Read>(
    reader: &mut FrameReader<R>,
    limits: &Limits,
) -> Result<Option<Message>, WireError> {
    let Some(bytes) = reader.read_next()? else {
        return Ok(None);
    };
    Ok(Some(decode_envelope(&bytes, limits)?.message))
}
