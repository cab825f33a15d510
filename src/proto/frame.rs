//! Connection framing.
//!
//! Every message travels as `len: u32 LE | crc32c(body): u32 LE | body`.
//! Any framing fault is fatal for the connection that produced it.

use std::io::{self, Read, Write};

use crc32c::crc32c;
use thiserror::Error;

use crate::core::ErrorKind;

pub const FRAME_HEADER_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("socket: {0}")]
    Io(#[from] io::Error),
    #[error("connection closed inside a frame {0}")]
    Truncated(&'static str),
    #[error("empty frame")]
    Empty,
    #[error("frame of {len} bytes exceeds limit {max}")]
    Oversize { len: usize, max: usize },
    #[error("checksum {computed:#010x} does not match header {declared:#010x}")]
    Checksum { declared: u32, computed: u32 },
}

impl FrameError {
    /// Socket failures are transient; anything else means a broken peer.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FrameError::Io(_) | FrameError::Truncated(_) => ErrorKind::Unavailable,
            FrameError::Empty | FrameError::Oversize { .. } | FrameError::Checksum { .. } => {
                ErrorKind::Protocol
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Header {
    len: usize,
    crc: u32,
}

impl Header {
    fn checked(len: usize, max: usize) -> Result<usize, FrameError> {
        match len {
            0 => Err(FrameError::Empty),
            len if len > max || u32::try_from(len).is_err() => {
                Err(FrameError::Oversize { len, max })
            }
            len => Ok(len),
        }
    }

    fn decode(raw: [u8; FRAME_HEADER_LEN], max: usize) -> Result<Self, FrameError> {
        let len = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
        Ok(Self {
            len: Self::checked(len, max)?,
            crc: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
        })
    }

    fn encode(self) -> [u8; FRAME_HEADER_LEN] {
        let mut raw = [0u8; FRAME_HEADER_LEN];
        raw[..4].copy_from_slice(&(self.len as u32).to_le_bytes());
        raw[4..].copy_from_slice(&self.crc.to_le_bytes());
        raw
    }
}

/// Frame `body` into a single buffer.
pub fn encode_frame(body: &[u8], max_frame_bytes: usize) -> Result<Vec<u8>, FrameError> {
    let header = Header {
        len: Header::checked(body.len(), max_frame_bytes)?,
        crc: crc32c(body),
    };
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(body);
    Ok(out)
}

pub struct FrameReader<R> {
    inner: R,
    max_frame_bytes: usize,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R, max_frame_bytes: usize) -> Self {
        Self {
            inner,
            max_frame_bytes,
        }
    }

    /// Fill `buf`; `Ok(false)` if the stream ended before the first byte.
    fn fill(&mut self, buf: &mut [u8], what: &'static str) -> Result<bool, FrameError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(false),
                Ok(0) => return Err(FrameError::Truncated(what)),
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(true)
    }

    /// Next frame body, or `None` on a clean EOF between frames.
    pub fn read_next(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let mut raw = [0u8; FRAME_HEADER_LEN];
        if !self.fill(&mut raw, "header")? {
            return Ok(None);
        }
        let header = Header::decode(raw, self.max_frame_bytes)?;

        let mut body = vec![0u8; header.len];
        if !self.fill(&mut body, "body")? {
            return Err(FrameError::Truncated("body"));
        }
        let computed = crc32c(&body);
        if computed != header.crc {
            return Err(FrameError::Checksum {
                declared: header.crc,
                computed,
            });
        }
        Ok(Some(body))
    }
}

pub struct FrameWriter<W> {
    inner: W,
    max_frame_bytes: usize,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W, max_frame_bytes: usize) -> Self {
        Self {
            inner,
            max_frame_bytes,
        }
    }

    /// Frame and flush `body`. Returns the bytes put on the wire.
    pub fn write_frame(&mut self, body: &[u8]) -> Result<usize, FrameError> {
        let frame = encode_frame(body, self.max_frame_bytes)?;
        self.inner.write_all(&frame)?;
        self.inner.flush()?;
        Ok(frame.len())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn reader(bytes: Vec<u8>, max: usize) -> FrameReader<Cursor<Vec<u8>>> {
        FrameReader::new(Cursor::new(bytes), max)
    }

    #[test]
    fn frames_read_back_until_clean_eof() {
        let mut wire = Vec::new();
        let mut writer = FrameWriter::new(&mut wire, 64);
        assert_eq!(writer.write_frame(b"one").expect("write"), FRAME_HEADER_LEN + 3);
        writer.write_frame(b"two").expect("write");

        let mut frames = reader(wire, 64);
        assert_eq!(frames.read_next().expect("read"), Some(b"one".to_vec()));
        assert_eq!(frames.read_next().expect("read"), Some(b"two".to_vec()));
        assert_eq!(frames.read_next().expect("eof"), None);
    }

    #[test]
    fn flipped_body_bit_fails_checksum() {
        let mut wire = encode_frame(b"payload", 64).expect("encode");
        *wire.last_mut().expect("body") ^= 0x01;
        let err = reader(wire, 64).read_next().expect_err("corrupt");
        assert!(matches!(err, FrameError::Checksum { .. }));
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn length_limits_apply_on_both_sides() {
        assert!(matches!(
            encode_frame(&[0u8; 10], 5),
            Err(FrameError::Oversize { len: 10, max: 5 })
        ));
        assert!(matches!(encode_frame(&[], 5), Err(FrameError::Empty)));

        let wire = encode_frame(&[0u8; 10], 64).expect("encode");
        let err = reader(wire, 5).read_next().expect_err("oversize");
        assert!(matches!(err, FrameError::Oversize { .. }));

        let mut zero = vec![0u8; FRAME_HEADER_LEN];
        zero.extend_from_slice(b"junk");
        assert!(matches!(reader(zero, 64).read_next(), Err(FrameError::Empty)));
    }

    #[test]
    fn truncation_is_a_transport_failure() {
        let wire = encode_frame(b"payload", 64).expect("encode");
        let err = reader(wire[..3].to_vec(), 64).read_next().expect_err("short header");
        assert!(matches!(err, FrameError::Truncated("header")));
        assert_eq!(err.kind(), ErrorKind::Unavailable);

        let err = reader(wire[..FRAME_HEADER_LEN + 2].to_vec(), 64)
            .read_next()
            .expect_err("short body");
        assert!(matches!(err, FrameError::Truncated("body")));
    }
}
