//! Buffer management.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`BufferPool`] | Shared free list of receive buffers |
//! | [`PooledBuffer`] | Exclusively owned buffer, returned on drop |
//! | [`Payload`] | Bytes carried by a receive event |

// ============================================================================
// Submodules
// ============================================================================

/// Receive-buffer pool.
pub mod pool;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::ops::Deref;

use bytes::Bytes;

// ============================================================================
// Re-exports
// ============================================================================

pub use pool::{BufferPool, PoolStats, PooledBuffer};

// ============================================================================
// Payload
// ============================================================================

/// Bytes delivered by one receive.
///
/// Stream layers fill a pooled buffer; message layers hand over the frame
/// they decoded. Either way the payload dereferences to the received bytes
/// and any pooled storage goes back to the pool when the payload is dropped.
pub enum Payload {
    /// Bytes read into a pool buffer.
    Pooled(PooledBuffer),
    /// Bytes of a decoded message.
    Shared(Bytes),
}

impl Payload {
    /// Copies the payload into a [`Bytes`] value.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Self::Pooled(buffer) => Bytes::copy_from_slice(buffer),
            Self::Shared(bytes) => bytes.clone(),
        }
    }
}

impl Deref for Payload {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Pooled(buffer) => buffer,
            Self::Shared(bytes) => bytes,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pooled(buffer) => f.debug_tuple("Pooled").field(&buffer.len()).finish(),
            Self::Shared(bytes) => f.debug_tuple("Shared").field(&bytes.len()).finish(),
        }
    }
}
