mod fragmenter;
mod reassembler;

use std::time::Duration;

pub use fragmenter::*;
pub use reassembler::*;
use thiserror::Error;

use crate::{protocol::packet_hdr::FRAG_HDR_LEN, utils::BufferPool};

pub struct Builder<P> {
    pub pool: P,
    pub max_payload: usize,
    pub fragment_timeout: Duration,
}

impl<P: BufferPool + Clone> Builder<P> {
    pub fn build(self) -> Result<(Fragmenter, Reassembler<P>), BuildError> {
        let fragmenter = FragmenterBuilder {
            max_payload: self.max_payload,
        }
        .build()?;
        let reassembler = ReassemblerBuilder {
            pool: self.pool,
            timeout: self.fragment_timeout,
        }
        .build();
        Ok((fragmenter, reassembler))
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("max payload must be between 1 and {max} bytes, got {got}")]
    MaxPayload { got: usize, max: usize },
    #[error("receive buffer of {got} bytes cannot hold a {need}-byte packet")]
    RecvBufLen { got: usize, need: usize },
}

/// Largest payload whose fragment still fits the 16-bit length field.
pub const MAX_PAYLOAD_LIMIT: usize = u16::MAX as usize - FRAG_HDR_LEN;

pub(crate) fn check_max_payload(max_payload: usize) -> Result<(), BuildError> {
    if max_payload == 0 || max_payload > MAX_PAYLOAD_LIMIT {
        return Err(BuildError::MaxPayload {
            got: max_payload,
            max: MAX_PAYLOAD_LIMIT,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, time::Instant};

    use crate::{protocol::packet_hdr::PacketHeader, utils::ByteBufferPool};

    use super::*;

    const MAX_PAYLOAD: usize = 4;

    #[test]
    fn frag_then_reassemble() {
        let now = Instant::now();
        let pool = ByteBufferPool::new();
        let (mut fragmenter, _reassembler1) = Builder {
            pool: pool.clone(),
            max_payload: MAX_PAYLOAD,
            fragment_timeout: Duration::from_secs(1),
        }
        .build()
        .unwrap();
        let (_fragmenter2, mut reassembler) = Builder {
            pool: pool.clone(),
            max_payload: MAX_PAYLOAD,
            fragment_timeout: Duration::from_secs(1),
        }
        .build()
        .unwrap();

        let from: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let to: SocketAddr = "127.0.0.1:2".parse().unwrap();
        let data: Vec<u8> = (0..10).collect();

        // 1 -> 2, back to front
        let mut inflight = Vec::new();
        let count = fragmenter
            .emit(to, &data, false, &pool, |p| {
                inflight.push(p);
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(
            inflight[0].data(),
            vec![
                0, 11, // len
                0, 0, // seq
                2, // flg (frag)
                3, 0, // cnt, idx
                0, 1, 2, 3 // data
            ]
        );

        while let Some(p) = inflight.pop() {
            let hdr = PacketHeader::from_slice(p.data()).unwrap();
            reassembler
                .input(
                    from,
                    hdr.seq(),
                    hdr.frag().unwrap(),
                    p.buf,
                    hdr.hdr_len()..hdr.len(),
                    now,
                )
                .unwrap();
        }

        assert_eq!(fragmenter.stat(), FragmenterStat { packets: 3, frags: 3 });
        assert_eq!(
            reassembler.stat(),
            ReassemblerStat {
                frags: 3,
                duplicates: 0,
                timeouts: 0,
                collisions: 0,
                assembled: 1,
                live_groups: 0,
            }
        );

        let recv = reassembler.recv().unwrap();
        assert_eq!(recv.payload(), &data[..]);
        assert_eq!(recv.from(), from);
        pool.put_back(recv.into_buf());
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn max_payload_bounds() {
        let build = |max_payload| {
            Builder {
                pool: ByteBufferPool::new(),
                max_payload,
                fragment_timeout: Duration::from_secs(1),
            }
            .build()
            .map(|_| ())
        };
        assert_eq!(
            build(0),
            Err(BuildError::MaxPayload {
                got: 0,
                max: MAX_PAYLOAD_LIMIT
            })
        );
        assert!(build(1).is_ok());
        assert!(build(MAX_PAYLOAD_LIMIT).is_ok());
        assert!(build(MAX_PAYLOAD_LIMIT + 1).is_err());
    }
}
