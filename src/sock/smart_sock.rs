use std::{
    collections::VecDeque,
    net::SocketAddr,
    time::{Duration, Instant},
};

use tracing::debug;

use crate::{
    error::Result,
    layer::{self, BuildError, Fragmenter, OutPacket, Reassembler, ReceivedPacket},
    protocol::packet_hdr::{PacketHeader, FRAG_HDR_LEN},
    utils::{BufferPool, PooledBuf},
};

use super::RawSocket;

pub const DEFAULT_MAX_PAYLOAD: usize = 1200;
pub const DEFAULT_FRAGMENT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RECV_BUF_LEN: usize = 2048;

/// Datagram socket that fragments large payloads on send and reassembles them on
/// receive.
///
/// Calls are expected from one owning thread in a polling loop: nothing blocks, and
/// [`SmartSock::tick`] must be driven periodically for incomplete groups to expire.
pub struct SmartSock<S, P>
where
    S: RawSocket,
    P: BufferPool + Clone,
{
    raw: S,
    pool: P,
    fragmenter: Fragmenter,
    reassembler: Reassembler<P>,
    ready: VecDeque<ReceivedPacket>,
    retained: VecDeque<OutPacket>,
    recv_buf_len: usize,
    stat: LocalStat,
}

pub struct SmartSockBuilder {
    pub max_payload: usize,
    pub fragment_timeout: Duration,
    pub recv_buf_len: usize,
}

impl Default for SmartSockBuilder {
    fn default() -> Self {
        SmartSockBuilder {
            max_payload: DEFAULT_MAX_PAYLOAD,
            fragment_timeout: DEFAULT_FRAGMENT_TIMEOUT,
            recv_buf_len: DEFAULT_RECV_BUF_LEN,
        }
    }
}

impl SmartSockBuilder {
    pub fn build<S, P>(self, raw: S, pool: P) -> std::result::Result<SmartSock<S, P>, BuildError>
    where
        S: RawSocket,
        P: BufferPool + Clone,
    {
        check_recv_buf_len(self.recv_buf_len, self.max_payload)?;
        let (fragmenter, reassembler) = layer::Builder {
            pool: pool.clone(),
            max_payload: self.max_payload,
            fragment_timeout: self.fragment_timeout,
        }
        .build()?;
        Ok(SmartSock {
            raw,
            pool,
            fragmenter,
            reassembler,
            ready: VecDeque::new(),
            retained: VecDeque::new(),
            recv_buf_len: self.recv_buf_len,
            stat: LocalStat {
                datagrams: 0,
                decoding_errors: 0,
            },
        })
    }
}

fn check_recv_buf_len(recv_buf_len: usize, max_payload: usize) -> std::result::Result<(), BuildError> {
    let need = max_payload.saturating_add(FRAG_HDR_LEN);
    if recv_buf_len < need {
        return Err(BuildError::RecvBufLen {
            got: recv_buf_len,
            need,
        });
    }
    Ok(())
}

impl<S, P> SmartSock<S, P>
where
    S: RawSocket,
    P: BufferPool + Clone,
{
    #[must_use]
    pub fn stat(&self) -> Stat {
        let sent = self.fragmenter.stat();
        let reassembly = self.reassembler.stat();
        Stat {
            sent_packets: sent.packets,
            sent_frags: sent.frags,
            retained: self.retained.len(),
            datagrams: self.stat.datagrams,
            decoding_errors: self.stat.decoding_errors,
            recv_frags: reassembly.frags,
            duplicate_frags: reassembly.duplicates,
            timed_out_groups: reassembly.timeouts,
            collided_groups: reassembly.collisions,
            assembled: reassembly.assembled,
            live_groups: reassembly.live_groups,
        }
    }

    #[must_use]
    #[inline]
    pub fn max_payload(&self) -> usize {
        self.fragmenter.max_payload()
    }

    pub fn set_max_payload(&mut self, max_payload: usize) -> std::result::Result<(), BuildError> {
        check_recv_buf_len(self.recv_buf_len, max_payload)?;
        self.fragmenter.set_max_payload(max_payload)
    }

    #[must_use]
    #[inline]
    pub fn fragment_timeout(&self) -> Duration {
        self.reassembler.timeout()
    }

    pub fn set_fragment_timeout(&mut self, timeout: Duration) {
        self.reassembler.set_timeout(timeout);
    }

    #[must_use]
    #[inline]
    pub fn pool(&self) -> &P {
        &self.pool
    }

    #[must_use]
    #[inline]
    pub fn raw(&self) -> &S {
        &self.raw
    }

    #[must_use]
    #[inline]
    pub fn raw_mut(&mut self) -> &mut S {
        &mut self.raw
    }

    /// Send `data` to `to`, fragmenting it when it exceeds the max payload.
    ///
    /// Unreliable packets are back in the pool when this returns. Packets with
    /// `need_ack` set are kept for [`SmartSock::take_retained`].
    pub fn send(&mut self, to: SocketAddr, data: &[u8], need_ack: bool) -> Result<()> {
        let Self {
            raw,
            pool,
            fragmenter,
            retained,
            ..
        } = self;
        let pool = &*pool;
        fragmenter.emit(to, data, need_ack, pool, |packet| {
            let sent = raw.send_to(packet.data(), packet.to);
            if packet.hdr.need_ack() {
                retained.push_back(packet);
            } else {
                pool.put_back(packet.buf);
            }
            sent?;
            Ok(())
        })?;
        Ok(())
    }

    /// Next reliable packet handed over to the caller's retransmission logic.
    ///
    /// The caller owns the returned buffer and puts it back once it is acknowledged.
    #[must_use]
    pub fn take_retained(&mut self) -> Option<OutPacket> {
        self.retained.pop_front()
    }

    /// Poll for the next complete packet without blocking.
    ///
    /// Reads pending datagrams until a packet is ready or the raw socket has nothing
    /// left. `now` stamps fragment arrivals for the reassembly timeout.
    pub fn receive(&mut self, now: Instant) -> Result<Option<ReceivedPacket>> {
        loop {
            if let Some(packet) = self.ready.pop_front() {
                return Ok(Some(packet));
            }
            if let Some(packet) = self.reassembler.recv() {
                return Ok(Some(packet));
            }

            let mut buf = self.pool.rent(self.recv_buf_len)?;
            let (len, from) = match self.raw.recv_from(&mut buf) {
                Ok(Some(x)) => x,
                Ok(None) => {
                    self.pool.put_back(buf);
                    return Ok(None);
                }
                Err(e) => {
                    self.pool.put_back(buf);
                    return Err(e.into());
                }
            };
            self.input_datagram(from, buf, len, now)?;
        }
    }

    fn input_datagram(
        &mut self,
        from: SocketAddr,
        buf: PooledBuf,
        len: usize,
        now: Instant,
    ) -> Result<()> {
        self.stat.datagrams += 1;
        let hdr = match PacketHeader::from_slice(&buf[..len]) {
            Ok(x) => x,
            Err(e) => {
                debug!(%from, len, error = %e, "dropping malformed datagram");
                self.stat.decoding_errors += 1;
                self.pool.put_back(buf);
                return Ok(());
            }
        };
        let payload = hdr.hdr_len()..hdr.len();
        match hdr.frag() {
            None => self
                .ready
                .push_back(ReceivedPacket::new(from, hdr.seq(), buf, payload)),
            Some(frag) => self
                .reassembler
                .input(from, hdr.seq(), frag, buf, payload, now)?,
        }
        Ok(())
    }

    /// Expire fragment groups idle for longer than the fragment timeout.
    ///
    /// Returns the number of groups dropped.
    pub fn tick(&mut self, now: Instant) -> usize {
        self.reassembler.tick(now)
    }

    /// Return a received packet's buffer to the pool.
    pub fn put_back(&mut self, packet: ReceivedPacket) {
        self.pool.put_back(packet.into_buf());
    }
}

impl<S, P> Drop for SmartSock<S, P>
where
    S: RawSocket,
    P: BufferPool + Clone,
{
    fn drop(&mut self) {
        for packet in self.ready.drain(..) {
            self.pool.put_back(packet.into_buf());
        }
        for packet in self.retained.drain(..) {
            self.pool.put_back(packet.buf);
        }
    }
}

struct LocalStat {
    datagrams: u64,
    decoding_errors: u64,
}

#[derive(Debug, PartialEq)]
pub struct Stat {
    pub sent_packets: u64,
    pub sent_frags: u64,
    pub retained: usize,
    pub datagrams: u64,
    pub decoding_errors: u64,
    pub recv_frags: u64,
    pub duplicate_frags: u64,
    pub timed_out_groups: u64,
    pub collided_groups: u64,
    pub assembled: u64,
    pub live_groups: usize,
}
