//! Serial link envelope around `[channel id][payload]` frames.
//!
//! On the wire a packet is
//!
//! ```text
//! [size lo][size hi][hdr][payload ...][xor] '+'
//! ```
//!
//! where `hdr` carries a 4-bit checksum of the size in its high nibble and the
//! channel id in its low nibble, and `xor` makes the XOR over every byte before
//! the delimiter zero.  Every byte except the delimiter is escaped with `ESC`
//! when it equals `ESC` or `DELIM`.
//!
//! [`LinkDecoder`] is incremental: feed it bytes as they arrive and collect
//! whole frames; a malformed packet is reported and discarded without
//! affecting the next one.

use thiserror::Error;

/// Escape byte.
pub const ESC: u8 = 17;
/// Packet delimiter.
pub const DELIM: u8 = b'+';
/// Receive buffer size; the largest payload is a 255-point path.
pub const RECV_BUFFER_SIZE: usize = 1030;

/// Reason a received link packet was dropped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    #[error("packet of {0} bytes is shorter than the envelope")]
    TooSmall(usize),
    #[error("size header checksum mismatch")]
    HeaderChecksum,
    #[error("size header says {declared} bytes, received {received}")]
    SizeMismatch { declared: usize, received: usize },
    #[error("payload checksum mismatch")]
    Checksum,
    #[error("receive buffer overflow")]
    BufferFull,
}

/// Wrap a `[channel id][payload]` frame in the link envelope.
///
/// Only the low nibble of the channel id is transmitted.
pub fn encode_link_frame(frame: &[u8]) -> Vec<u8> {
    let (id, payload) = frame.split_first().map_or((0, frame), |(id, p)| (*id, p));
    let size = payload.len() as u16;
    let mut out = Vec::with_capacity(payload.len() * 2 + 8);

    let lo = size as u8;
    let hi = (size >> 8) as u8;
    let mut chk = lo ^ hi;
    let hdr = (chk << 4) ^ (chk & 0xF0) | (id & 0x0F);
    chk ^= hdr;

    push_escaped(&mut out, lo);
    push_escaped(&mut out, hi);
    push_escaped(&mut out, hdr);
    for &b in payload {
        push_escaped(&mut out, b);
        chk ^= b;
    }
    push_escaped(&mut out, chk);
    out.push(DELIM);
    out
}

fn push_escaped(out: &mut Vec<u8>, b: u8) {
    if b == ESC || b == DELIM {
        out.push(ESC);
    }
    out.push(b);
}

/// Incremental receiver for link packets.
#[derive(Debug)]
pub struct LinkDecoder {
    buf: Vec<u8>,
    chk: u8,
    escaped: bool,
}

impl Default for LinkDecoder {
    fn default() -> Self {
        Self {
            buf: Vec::with_capacity(RECV_BUFFER_SIZE),
            chk: 0,
            escaped: false,
        }
    }
}

impl LinkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one received byte.
    ///
    /// Returns `Some` when the byte completed a packet (or overflowed the
    /// buffer); the `Ok` value is the `[channel id][payload]` frame.
    pub fn push(&mut self, byte: u8) -> Option<Result<Vec<u8>, LinkError>> {
        if self.escaped {
            self.escaped = false;
        } else if byte == ESC {
            self.escaped = true;
            return None;
        } else if byte == DELIM {
            let result = self.finish();
            self.reset();
            return Some(result);
        }

        self.buf.push(byte);
        self.chk ^= byte;
        if self.buf.len() == RECV_BUFFER_SIZE {
            self.reset();
            return Some(Err(LinkError::BufferFull));
        }
        None
    }

    /// Process a chunk of received bytes, returning every completed packet.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<Vec<u8>, LinkError>> {
        bytes.iter().filter_map(|&b| self.push(b)).collect()
    }

    fn finish(&self) -> Result<Vec<u8>, LinkError> {
        let buf = &self.buf;
        if buf.len() < 4 {
            return Err(LinkError::TooSmall(buf.len()));
        }
        let size = u16::from_le_bytes([buf[0], buf[1]]) as usize;
        let size_chk = buf[0] ^ buf[1];
        let size_chk = (size_chk >> 4) ^ (size_chk & 0x0F);
        if buf[2] >> 4 != size_chk {
            return Err(LinkError::HeaderChecksum);
        }
        if size != buf.len() - 4 {
            return Err(LinkError::SizeMismatch {
                declared: size,
                received: buf.len() - 4,
            });
        }
        if self.chk != 0 {
            return Err(LinkError::Checksum);
        }
        let mut frame = Vec::with_capacity(size + 1);
        frame.push(buf[2] & 0x0F);
        frame.extend_from_slice(&buf[3..3 + size]);
        Ok(frame)
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.chk = 0;
    }
}
