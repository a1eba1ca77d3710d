//! Datagram transport with payload fragmentation, reassembly and a per-packet
//! "needs acknowledgment" flag.
//!
//! [`SmartSock`] wraps any [`RawSocket`] (a non-blocking [`std::net::UdpSocket`]
//! included). Payloads larger than the configured max payload are split into
//! fragments on send; fragments arriving in any order are merged back into one
//! packet on receive. Incomplete groups expire on [`SmartSock::tick`].

pub mod error;
pub mod layer;
pub mod protocol;
pub mod sock;
pub mod utils;

pub use error::{Error, Result};
pub use sock::{RawSocket, SmartSock, SmartSockBuilder};
