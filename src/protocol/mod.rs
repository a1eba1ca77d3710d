//! # Packet header
//!
//! ```text
//! 0       2       4   5         (BYTE)
//! +-------+-------+---+
//! |  len  |  seq  |flg|
//! +-------+-------+---+
//! ```
//!
//! # Fragment header
//!
//! ```text
//! 0       2       4   5   6   7 (BYTE)
//! +-------+-------+---+---+---+
//! |  len  |  seq  |flg|cnt|idx|
//! +-------+-------+---+---+---+
//! ```
//!
//! # Packet structure
//!
//! ```text
//! (Packet header | Fragment header)
//! (Body)
//! ```
//!
//! All integers are big-endian.
//!
//! # Invariants
//!
//! - `len` is the whole packet, header included
//! - `flg` bit 0 is `need_ack`, bit 1 selects the fragment header; other bits are zero
//! - `idx < cnt`

pub mod packet_hdr;

use thiserror::Error;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum DecodingError {
    #[error("packet truncated: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },
    #[error("invalid field `{field}`")]
    Decoding { field: &'static str },
    #[error("declared length {declared} exceeds {available} available bytes")]
    LengthMismatch { declared: usize, available: usize },
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum EncodingError {
    #[error("not enough space to encode header")]
    NotEnoughSpace,
    #[error("packet length {0} does not fit the length field")]
    LengthOverflow(usize),
    #[error("fragment index {index} out of range for {count} fragments")]
    FragIndex { count: u8, index: u8 },
}
