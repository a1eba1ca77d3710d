use std::{
    cmp::Reverse,
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    ops::Range,
    time::{Duration, Instant},
};

use keyed_priority_queue::KeyedPriorityQueue;
use tracing::{debug, warn};

use crate::{
    protocol::packet_hdr::FragInfo,
    utils::{BufferPool, PoolError, PooledBuf, Seq16},
};

/// A payload ready for the caller, either a plain packet or a reassembled group.
///
/// The caller owns the buffer and must hand it back to the pool it came from.
#[must_use = "a received packet holds a pooled buffer"]
#[derive(Debug)]
pub struct ReceivedPacket {
    from: SocketAddr,
    seq: Seq16,
    buf: PooledBuf,
    offset: usize,
    len: usize,
}

impl ReceivedPacket {
    pub(crate) fn new(from: SocketAddr, seq: Seq16, buf: PooledBuf, payload: Range<usize>) -> Self {
        assert!(payload.end <= buf.len());
        ReceivedPacket {
            from,
            seq,
            offset: payload.start,
            len: payload.len(),
            buf,
        }
    }

    #[must_use]
    #[inline]
    pub fn from(&self) -> SocketAddr {
        self.from
    }

    /// Sequence number of the packet, or of fragment 0 for a reassembled group.
    #[must_use]
    #[inline]
    pub fn seq(&self) -> Seq16 {
        self.seq
    }

    #[must_use]
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.buf[self.offset..self.offset + self.len]
    }

    /// Whole backing buffer; the payload sits at `offset()..offset() + len()`.
    #[must_use]
    #[inline]
    pub fn buf(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_buf(self) -> PooledBuf {
        self.buf
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct GroupKey {
    origin: SocketAddr,
    base: Seq16,
}

struct Slot {
    buf: PooledBuf,
    payload: Range<usize>,
}

struct FragGroup {
    slots: Vec<Option<Slot>>,
    received: usize,
    last_activity: Instant,
}

impl FragGroup {
    fn new(count: u8, now: Instant) -> Self {
        FragGroup {
            slots: (0..count).map(|_| None).collect(),
            received: 0,
            last_activity: now,
        }
    }

    #[inline]
    fn count(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn is_complete(&self) -> bool {
        self.received == self.count()
    }

    #[inline]
    fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) > timeout
    }

    fn release(self, pool: &impl BufferPool) {
        for slot in self.slots.into_iter().flatten() {
            pool.put_back(slot.buf);
        }
    }
}

pub struct Reassembler<P: BufferPool> {
    pool: P,
    timeout: Duration,
    groups: HashMap<GroupKey, FragGroup>,
    // oldest activity pops first
    activity: KeyedPriorityQueue<GroupKey, Reverse<Instant>>,
    completed: VecDeque<ReceivedPacket>,
    stat: LocalStat,
}

pub struct ReassemblerBuilder<P> {
    pub pool: P,
    pub timeout: Duration,
}

impl<P: BufferPool> ReassemblerBuilder<P> {
    pub fn build(self) -> Reassembler<P> {
        let this = Reassembler {
            pool: self.pool,
            timeout: self.timeout,
            groups: HashMap::new(),
            activity: KeyedPriorityQueue::new(),
            completed: VecDeque::new(),
            stat: LocalStat {
                frags: 0,
                duplicates: 0,
                timeouts: 0,
                collisions: 0,
                assembled: 0,
            },
        };
        this.check_rep();
        this
    }
}

impl<P: BufferPool> Reassembler<P> {
    #[inline]
    fn check_rep(&self) {
        assert_eq!(self.groups.len(), self.activity.len());
    }

    #[must_use]
    pub fn stat(&self) -> ReassemblerStat {
        ReassemblerStat {
            frags: self.stat.frags,
            duplicates: self.stat.duplicates,
            timeouts: self.stat.timeouts,
            collisions: self.stat.collisions,
            assembled: self.stat.assembled,
            live_groups: self.groups.len(),
        }
    }

    #[must_use]
    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    #[must_use]
    pub fn recv(&mut self) -> Option<ReceivedPacket> {
        self.completed.pop_front()
    }

    /// Take ownership of one inbound fragment.
    ///
    /// `payload` is the body's range inside `buf`. The buffer is either stored in its
    /// group or put back before this returns.
    ///
    /// # Errors
    ///
    /// [`PoolError`] when the pool cannot supply the combined buffer for a completed
    /// group. The group is dropped and all its buffers are put back.
    pub fn input(
        &mut self,
        origin: SocketAddr,
        seq: Seq16,
        frag: FragInfo,
        buf: PooledBuf,
        payload: Range<usize>,
        now: Instant,
    ) -> Result<(), PoolError> {
        assert!(payload.end <= buf.len());
        self.stat.frags += 1;
        let key = GroupKey {
            origin,
            base: seq.sub_u16(u16::from(frag.index())),
        };

        if let Some(group) = self.groups.get(&key) {
            if group.is_stale(now, self.timeout) {
                debug!(%origin, base = %key.base, "group timed out before sweep");
                self.stat.timeouts += 1;
                self.discard(&key);
            } else if group.count() != usize::from(frag.count()) {
                warn!(
                    %origin,
                    base = %key.base,
                    expected = group.count(),
                    found = frag.count(),
                    "fragment count mismatch, restarting group"
                );
                self.stat.collisions += 1;
                self.discard(&key);
            }
        }

        let group = self
            .groups
            .entry(key)
            .or_insert_with(|| FragGroup::new(frag.count(), now));
        let slot = &mut group.slots[usize::from(frag.index())];
        if slot.is_some() {
            debug!(%origin, %seq, index = frag.index(), "duplicate fragment");
            self.stat.duplicates += 1;
            self.pool.put_back(buf);
            self.check_rep();
            return Ok(());
        }
        *slot = Some(Slot { buf, payload });
        group.received += 1;
        group.last_activity = now;
        let complete = group.is_complete();
        self.activity.push(key, Reverse(now));

        if complete {
            let group = self.take(&key);
            self.check_rep();
            if let Some(group) = group {
                self.assemble(key, group)?;
            }
        }
        self.check_rep();
        Ok(())
    }

    fn assemble(&mut self, key: GroupKey, group: FragGroup) -> Result<(), PoolError> {
        let len: usize = group
            .slots
            .iter()
            .flatten()
            .map(|slot| slot.payload.len())
            .sum();
        let mut buf = match self.pool.rent(len) {
            Ok(x) => x,
            Err(e) => {
                group.release(&self.pool);
                return Err(e);
            }
        };
        let mut end = 0;
        for slot in group.slots.into_iter().flatten() {
            let start = end;
            end += slot.payload.len();
            buf[start..end].copy_from_slice(&slot.buf[slot.payload]);
            self.pool.put_back(slot.buf);
        }
        debug!(origin = %key.origin, base = %key.base, len, "group reassembled");
        self.stat.assembled += 1;
        self.completed
            .push_back(ReceivedPacket::new(key.origin, key.base, buf, 0..len));
        Ok(())
    }

    /// Drop every group idle for longer than the timeout.
    ///
    /// Returns the number of groups dropped.
    pub fn tick(&mut self, now: Instant) -> usize {
        let mut dropped = 0;
        loop {
            let last = match self.activity.peek() {
                Some((_, Reverse(last))) => *last,
                None => break,
            };
            if now.saturating_duration_since(last) <= self.timeout {
                break;
            }
            let Some((key, _)) = self.activity.pop() else {
                break;
            };
            if let Some(group) = self.groups.remove(&key) {
                debug!(
                    origin = %key.origin,
                    base = %key.base,
                    received = group.received,
                    count = group.count(),
                    "group timed out"
                );
                group.release(&self.pool);
            }
            self.stat.timeouts += 1;
            dropped += 1;
        }
        self.check_rep();
        dropped
    }

    fn take(&mut self, key: &GroupKey) -> Option<FragGroup> {
        self.activity.remove(key);
        self.groups.remove(key)
    }

    fn discard(&mut self, key: &GroupKey) {
        if let Some(group) = self.take(key) {
            group.release(&self.pool);
        }
    }
}

impl<P: BufferPool> Drop for Reassembler<P> {
    fn drop(&mut self) {
        for (_, group) in self.groups.drain() {
            group.release(&self.pool);
        }
        for packet in self.completed.drain(..) {
            self.pool.put_back(packet.into_buf());
        }
    }
}

struct LocalStat {
    frags: u64,
    duplicates: u64,
    timeouts: u64,
    collisions: u64,
    assembled: u64,
}

#[derive(Debug, PartialEq)]
pub struct ReassemblerStat {
    pub frags: u64,
    pub duplicates: u64,
    pub timeouts: u64,
    pub collisions: u64,
    pub assembled: u64,
    pub live_groups: usize,
}
