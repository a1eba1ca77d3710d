use std::{collections::HashMap, net::SocketAddr};

use tracing::trace;

use crate::{
    error::{Error, Result},
    protocol::packet_hdr::{PacketHeader, PacketHeaderBuilder},
    utils::{BufferPool, PooledBuf, Seq16},
};

use super::{check_max_payload, BuildError};

/// Fragments per payload, bounded by the width of the `cnt` field
pub const MAX_FRAGS: usize = u8::MAX as usize;

/// An encoded packet on its way to the raw socket.
#[derive(Debug)]
pub struct OutPacket {
    pub to: SocketAddr,
    pub hdr: PacketHeader,
    pub buf: PooledBuf,
}

impl OutPacket {
    /// Wire bytes, header included.
    #[must_use]
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.buf[..self.hdr.len()]
    }
}

pub struct Fragmenter {
    max_payload: usize,
    next_seqs: HashMap<SocketAddr, Seq16>,
    stat: LocalStat,
}

pub struct FragmenterBuilder {
    pub max_payload: usize,
}

impl FragmenterBuilder {
    pub fn build(self) -> std::result::Result<Fragmenter, BuildError> {
        check_max_payload(self.max_payload)?;
        let this = Fragmenter {
            max_payload: self.max_payload,
            next_seqs: HashMap::new(),
            stat: LocalStat {
                packets: 0,
                frags: 0,
            },
        };
        this.check_rep();
        Ok(this)
    }
}

impl Fragmenter {
    #[inline]
    fn check_rep(&self) {
        assert!(self.max_payload > 0);
    }

    #[must_use]
    pub fn stat(&self) -> FragmenterStat {
        FragmenterStat {
            packets: self.stat.packets,
            frags: self.stat.frags,
        }
    }

    #[must_use]
    #[inline]
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    pub fn set_max_payload(&mut self, max_payload: usize) -> std::result::Result<(), BuildError> {
        check_max_payload(max_payload)?;
        self.max_payload = max_payload;
        self.check_rep();
        Ok(())
    }

    /// Sequence number the next packet to `to` will carry.
    #[must_use]
    pub fn next_seq(&self, to: &SocketAddr) -> Seq16 {
        self.next_seqs.get(to).copied().unwrap_or_default()
    }

    /// Number of packets `len` bytes are sent as.
    #[must_use]
    pub fn packet_count(&self, len: usize) -> usize {
        if len <= self.max_payload {
            1
        } else {
            len.div_ceil(self.max_payload)
        }
    }

    /// Encode `data` into one plain packet or a run of fragments and hand each one to
    /// `sink` exactly once, in index order.
    ///
    /// Fragments take consecutive sequence numbers from the same per-destination
    /// counter as plain packets. The sink owns every packet it receives, including on
    /// its own error path.
    ///
    /// Returns the number of packets emitted.
    pub fn emit<P, F>(
        &mut self,
        to: SocketAddr,
        data: &[u8],
        need_ack: bool,
        pool: &P,
        mut sink: F,
    ) -> Result<usize>
    where
        P: BufferPool,
        F: FnMut(OutPacket) -> Result<()>,
    {
        let count = self.packet_count(data.len());
        if count > MAX_FRAGS {
            return Err(Error::PayloadTooLarge {
                len: data.len(),
                max_frags: MAX_FRAGS,
            });
        }

        if data.len() <= self.max_payload {
            let seq = self.next_seq(&to);
            let mut hdr = PacketHeaderBuilder { seq, need_ack }.build();
            hdr.set_payload_len(data.len())?;
            let packet = Self::fill(pool, to, hdr, data)?;
            self.advance_seq(to, seq);
            trace!(%to, %seq, len = hdr.len(), "emit packet");
            self.stat.packets += 1;
            sink(packet)?;
            return Ok(1);
        }

        for (index, chunk) in data.chunks(self.max_payload).enumerate() {
            let seq = self.next_seq(&to);
            let mut hdr = PacketHeaderBuilder { seq, need_ack }.build();
            hdr.set_frag(count as u8, index as u8, chunk.len())?;
            let packet = Self::fill(pool, to, hdr, chunk)?;
            self.advance_seq(to, seq);
            trace!(%to, %seq, index, count, len = hdr.len(), "emit fragment");
            self.stat.packets += 1;
            self.stat.frags += 1;
            sink(packet)?;
        }
        Ok(count)
    }

    fn advance_seq(&mut self, to: SocketAddr, seq: Seq16) {
        self.next_seqs.insert(to, seq.add_u16(1));
    }

    fn fill<P: BufferPool>(
        pool: &P,
        to: SocketAddr,
        hdr: PacketHeader,
        payload: &[u8],
    ) -> Result<OutPacket> {
        let mut buf = pool.rent(hdr.len())?;
        let hdr_len = match hdr.write_to(&mut buf) {
            Ok(x) => x,
            Err(e) => {
                pool.put_back(buf);
                return Err(e.into());
            }
        };
        buf[hdr_len..hdr.len()].copy_from_slice(payload);
        Ok(OutPacket { to, hdr, buf })
    }
}

struct LocalStat {
    packets: u64,
    frags: u64,
}

#[derive(Debug, PartialEq)]
pub struct FragmenterStat {
    pub packets: u64,
    pub frags: u64,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use crate::{
        protocol::packet_hdr::{FRAG_HDR_LEN, PACKET_HDR_LEN},
        utils::ByteBufferPool,
    };

    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:23452".parse().unwrap()
    }

    fn fragmenter(max_payload: usize) -> Fragmenter {
        FragmenterBuilder { max_payload }.build().unwrap()
    }

    fn emit_all(
        fragmenter: &mut Fragmenter,
        pool: &ByteBufferPool,
        data: &[u8],
        need_ack: bool,
    ) -> Vec<OutPacket> {
        let mut packets = Vec::new();
        fragmenter
            .emit(addr(), data, need_ack, pool, |p| {
                packets.push(p);
                Ok(())
            })
            .unwrap();
        packets
    }

    #[test]
    fn five_bytes_over_three() {
        let pool = ByteBufferPool::new();
        let mut fragmenter = fragmenter(3);
        let data = [0x39, 0x30, 0x4d, 0xa0, 0x5b];
        let packets = emit_all(&mut fragmenter, &pool, &data, false);

        assert_eq!(packets.len(), 2);

        let hdr = PacketHeader::from_slice(packets[0].data()).unwrap();
        assert_eq!(hdr.len(), FRAG_HDR_LEN + 3);
        assert_eq!(hdr.seq().to_u16(), 0);
        assert!(!hdr.need_ack());
        assert_eq!(
            u16::from_le_bytes([packets[0].data()[FRAG_HDR_LEN], packets[0].data()[FRAG_HDR_LEN + 1]]),
            12345
        );

        let hdr = PacketHeader::from_slice(packets[1].data()).unwrap();
        assert_eq!(hdr.len(), FRAG_HDR_LEN + 2);
        assert_eq!(hdr.seq().to_u16(), 1);
        assert!(!hdr.need_ack());
        assert_eq!(
            u16::from_le_bytes([packets[1].data()[FRAG_HDR_LEN], packets[1].data()[FRAG_HDR_LEN + 1]]),
            23456
        );

        for p in packets {
            pool.put_back(p.buf);
        }
        assert_eq!(pool.outstanding(), 0);
    }

    #[rstest]
    #[case(1, 1, &[1])]
    #[case(3, 3, &[3])]
    #[case(4, 3, &[3, 1])]
    #[case(9, 3, &[3, 3, 3])]
    #[case(10, 4, &[4, 4, 2])]
    #[case(1000, 1, &[])]
    fn split_sizes(#[case] len: usize, #[case] max_payload: usize, #[case] sizes: &[usize]) {
        let pool = ByteBufferPool::new();
        let mut fragmenter = fragmenter(max_payload);
        if len > max_payload * MAX_FRAGS {
            let err = fragmenter
                .emit(addr(), &vec![0; len], false, &pool, |_| Ok(()))
                .unwrap_err();
            assert!(matches!(err, Error::PayloadTooLarge { .. }));
            assert_eq!(pool.outstanding(), 0);
            assert_eq!(fragmenter.next_seq(&addr()).to_u16(), 0);
            return;
        }
        let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
        let packets = emit_all(&mut fragmenter, &pool, &data, true);
        assert_eq!(packets.len(), sizes.len());

        let mut joined = Vec::new();
        for (i, p) in packets.iter().enumerate() {
            let hdr = PacketHeader::from_slice(p.data()).unwrap();
            assert_eq!(hdr.payload_len(), sizes[i]);
            assert_eq!(hdr.len(), hdr.hdr_len() + sizes[i]);
            assert!(hdr.need_ack());
            if sizes.len() == 1 {
                assert_eq!(hdr.hdr_len(), PACKET_HDR_LEN);
                assert_eq!(hdr.frag(), None);
            } else {
                let frag = hdr.frag().unwrap();
                assert_eq!(frag.count() as usize, sizes.len());
                assert_eq!(frag.index() as usize, i);
            }
            joined.extend_from_slice(&p.data()[hdr.hdr_len()..]);
        }
        assert_eq!(joined, data);
        for p in packets {
            pool.put_back(p.buf);
        }
    }

    #[test]
    fn seq_shared_between_plain_and_frags() {
        let pool = ByteBufferPool::new();
        let mut fragmenter = fragmenter(2);
        let packets = emit_all(&mut fragmenter, &pool, &[1], false);
        assert_eq!(packets[0].hdr.seq().to_u16(), 0);
        let packets = emit_all(&mut fragmenter, &pool, &[1, 2, 3, 4, 5], false);
        let seqs: Vec<u16> = packets.iter().map(|p| p.hdr.seq().to_u16()).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(fragmenter.next_seq(&addr()).to_u16(), 4);
        assert_eq!(fragmenter.stat(), FragmenterStat { packets: 4, frags: 3 });

        // other destinations count on their own
        let other: SocketAddr = "127.0.0.1:1".parse().unwrap();
        assert_eq!(fragmenter.next_seq(&other).to_u16(), 0);
    }

    #[test]
    fn empty_payload() {
        let pool = ByteBufferPool::new();
        let mut fragmenter = fragmenter(3);
        let packets = emit_all(&mut fragmenter, &pool, &[], false);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].data().len(), PACKET_HDR_LEN);
    }

    #[test]
    fn pool_exhausted() {
        let pool = ByteBufferPool::with_limit(1);
        let mut fragmenter = fragmenter(2);
        let mut held = Vec::new();
        let err = fragmenter
            .emit(addr(), &[1, 2, 3], false, &pool, |p| {
                held.push(p);
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, Error::Pool(_)));
        // the first fragment went out, the second never got a sequence number
        assert_eq!(held.len(), 1);
        assert_eq!(fragmenter.next_seq(&addr()).to_u16(), 1);
    }

    #[test]
    fn bad_max_payload() {
        assert!(FragmenterBuilder { max_payload: 0 }.build().is_err());
        let mut fragmenter = fragmenter(1);
        assert!(fragmenter.set_max_payload(u16::MAX as usize).is_err());
        assert_eq!(fragmenter.max_payload(), 1);
    }
}
