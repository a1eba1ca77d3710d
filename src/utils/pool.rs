//! # Buffer pool
//!
//! Every packet sent or received is backed by a [`PooledBuf`] rented from a
//! [`BufferPool`]. A buffer is owned by exactly one party at a time and moves by value:
//! once handed to [`BufferPool::put_back`] it can no longer be read.
//!
//! ```rust
//! use smartsock::utils::{BufferPool, ByteBufferPool};
//!
//! let pool = ByteBufferPool::new();
//! let buf = pool.rent(64).unwrap();
//! assert!(buf.len() >= 64);
//! pool.put_back(buf);
//! assert_eq!(pool.outstanding(), 0);
//! ```

use std::{
    ops::{Deref, DerefMut},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use thiserror::Error;

/// Smallest buffer the default pool hands out
const DEFAULT_BUF_LEN: usize = 64;

/// Free buffers kept around at most; the rest are deallocated on return
const MAX_FREE_BUFS: usize = 256;

/// Fixed-size byte buffer owned by whoever holds the value.
#[must_use = "a rented buffer must be put back into its pool"]
#[derive(Debug)]
pub struct PooledBuf {
    buf: Vec<u8>,
}

impl PooledBuf {
    fn new(buf: Vec<u8>) -> Self {
        PooledBuf { buf }
    }
}

impl Deref for PooledBuf {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("buffer pool exhausted: {outstanding} of {limit} buffers rented")]
    Exhausted { outstanding: usize, limit: usize },
}

/// Rent/return contract the transport relies on.
pub trait BufferPool {
    /// Rent a buffer of at least `min_len` bytes.
    fn rent(&self, min_len: usize) -> Result<PooledBuf, PoolError>;

    /// Hand a buffer back; the caller gives up all access to it.
    fn put_back(&self, buf: PooledBuf);
}

#[derive(Debug)]
struct Inner {
    free: Vec<Vec<u8>>,
    outstanding: usize,
    limit: Option<usize>,
}

/// Default [`BufferPool`]: a free list behind one mutex, cheap to clone and share.
#[derive(Debug, Clone)]
pub struct ByteBufferPool {
    inner: Arc<Mutex<Inner>>,
}

impl ByteBufferPool {
    #[must_use]
    pub fn new() -> Self {
        Self::from_inner(None)
    }

    /// Pool that refuses to have more than `limit` buffers rented at once.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self::from_inner(Some(limit))
    }

    fn from_inner(limit: Option<usize>) -> Self {
        ByteBufferPool {
            inner: Arc::new(Mutex::new(Inner {
                free: Vec::new(),
                outstanding: 0,
                limit,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Buffers currently rented and not yet put back.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding
    }

    /// Buffers sitting in the free list.
    #[must_use]
    pub fn available(&self) -> usize {
        self.lock().free.len()
    }
}

impl Default for ByteBufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferPool for ByteBufferPool {
    fn rent(&self, min_len: usize) -> Result<PooledBuf, PoolError> {
        let mut inner = self.lock();
        if let Some(limit) = inner.limit {
            if inner.outstanding >= limit {
                return Err(PoolError::Exhausted {
                    outstanding: inner.outstanding,
                    limit,
                });
            }
        }
        // best fit, so small rents leave the receive-sized buffers alone
        let best = inner
            .free
            .iter()
            .enumerate()
            .filter(|(_, b)| b.len() >= min_len)
            .min_by_key(|(_, b)| b.len())
            .map(|(i, _)| i);
        let buf = match best {
            Some(i) => inner.free.swap_remove(i),
            None => vec![0; usize::max(min_len, DEFAULT_BUF_LEN)],
        };
        inner.outstanding += 1;
        Ok(PooledBuf::new(buf))
    }

    fn put_back(&self, buf: PooledBuf) {
        let mut inner = self.lock();
        inner.outstanding = inner.outstanding.saturating_sub(1);
        if inner.free.len() < MAX_FREE_BUFS {
            inner.free.push(buf.buf);
            return;
        }
        // full: evict the smallest free buffer if this one is larger
        let smallest = inner
            .free
            .iter()
            .enumerate()
            .min_by_key(|(_, b)| b.len())
            .map(|(i, b)| (i, b.len()));
        if let Some((i, len)) = smallest {
            if len < buf.len() {
                inner.free[i] = buf.buf;
            }
        }
    }
}
