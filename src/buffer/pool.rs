//! Receive-buffer pool.
//!
//! Buffers are handed out as [`PooledBuffer`] values that own their storage
//! exclusively. Dropping (or [`BufferPool::release`]-ing) a buffer returns the
//! storage to the pool's free list, so the next receive on any connection
//! reuses it instead of allocating.
//!
//! # Sizing
//!
//! The pool has one nominal capacity. Requests up to that capacity are served
//! from the free list; larger requests get a one-off allocation that is
//! dropped on release rather than pooled.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::trace;

// ============================================================================
// PoolInner
// ============================================================================

/// Shared state behind a [`BufferPool`].
struct PoolInner {
    /// Nominal buffer capacity.
    buffer_size: usize,
    /// Maximum idle buffers kept.
    max_pooled: usize,
    /// Idle buffers.
    free: Mutex<Vec<Vec<u8>>>,
    /// Acquisitions served from the free list.
    hits: AtomicU64,
    /// Acquisitions that allocated.
    misses: AtomicU64,
}

impl PoolInner {
    /// Returns storage to the free list.
    fn give_back(&self, mut storage: Vec<u8>) {
        storage.clear();

        let mut free = self.free.lock();
        if free.len() < self.max_pooled {
            free.push(storage);
        }
    }
}

// ============================================================================
// BufferPool
// ============================================================================

/// Thread-safe pool of receive buffers.
///
/// Cheap to clone; clones share the same free list.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Acquisitions served from the free list.
    pub hits: u64,
    /// Acquisitions that allocated.
    pub misses: u64,
    /// Buffers currently idle in the pool.
    pub pooled: usize,
}

impl BufferPool {
    /// Creates a pool of `buffer_size`-byte buffers keeping at most
    /// `max_pooled` idle buffers.
    #[must_use]
    pub fn new(buffer_size: usize, max_pooled: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                buffer_size: buffer_size.max(1),
                max_pooled,
                free: Mutex::new(Vec::new()),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the nominal buffer capacity.
    #[inline]
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Acquires a buffer with at least `min_size` bytes of capacity.
    ///
    /// A `min_size` of 0 means the nominal capacity.
    #[must_use]
    pub fn acquire(&self, min_size: usize) -> PooledBuffer {
        let wanted = if min_size == 0 {
            self.inner.buffer_size
        } else {
            min_size
        };

        let pooled = wanted <= self.inner.buffer_size;
        let storage = if pooled {
            match self.inner.free.lock().pop() {
                Some(storage) => {
                    self.inner.hits.fetch_add(1, Ordering::Relaxed);
                    storage
                }
                None => {
                    self.inner.misses.fetch_add(1, Ordering::Relaxed);
                    Vec::with_capacity(self.inner.buffer_size)
                }
            }
        } else {
            self.inner.misses.fetch_add(1, Ordering::Relaxed);
            trace!(wanted, nominal = self.inner.buffer_size, "Oversized buffer allocated");
            Vec::with_capacity(wanted)
        };

        PooledBuffer {
            storage: Some(storage),
            pooled,
            pool: Arc::clone(&self.inner),
        }
    }

    /// Returns a buffer to the pool.
    ///
    /// Equivalent to dropping it.
    #[inline]
    pub fn release(&self, buffer: PooledBuffer) {
        drop(buffer);
    }

    /// Returns current counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            pooled: self.inner.free.lock().len(),
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_size", &self.inner.buffer_size)
            .field("stats", &self.stats())
            .finish()
    }
}

// ============================================================================
// PooledBuffer
// ============================================================================

/// A buffer exclusively owned by one in-flight operation.
///
/// Dereferences to the filled bytes. Returned to its pool on drop.
pub struct PooledBuffer {
    storage: Option<Vec<u8>>,
    /// Whether the storage goes back to the free list.
    pooled: bool,
    pool: Arc<PoolInner>,
}

impl PooledBuffer {
    /// Returns the total capacity.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.storage.as_ref().map_or(0, Vec::capacity)
    }

    /// Returns the underlying vector for filling.
    #[inline]
    pub fn as_mut_vec(&mut self) -> &mut Vec<u8> {
        self.storage.get_or_insert_with(Vec::new)
    }

    /// Copies `data` into the buffer, replacing its contents.
    pub fn fill_from(&mut self, data: &[u8]) {
        let storage = self.as_mut_vec();
        storage.clear();
        storage.extend_from_slice(data);
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.storage.as_deref().unwrap_or_default()
    }
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(storage) = self.storage.take()
            && self.pooled
        {
            self.pool.give_back(storage);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
