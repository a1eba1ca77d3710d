//! # Error types
//!
//! Decoding failures on inbound datagrams never surface here: the socket drops
//! malformed packets and counts them. What reaches the caller is I/O, pool exhaustion,
//! and outbound encoding problems.

use std::io;

use thiserror::Error;

use crate::{
    protocol::{DecodingError, EncodingError},
    utils::PoolError,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed packet: {0}")]
    Malformed(#[from] DecodingError),

    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("payload of {len} bytes needs more than {max_frags} fragments")]
    PayloadTooLarge { len: usize, max_frags: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
