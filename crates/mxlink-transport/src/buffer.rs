use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{Result, TransportError};

/// Network buffer moved between the link, the correlator and event handlers.
///
/// Owns a contiguous payload with a mutable logical length. The front can be
/// hidden without copying once a protocol header has been consumed. Dropping
/// the buffer frees it.
pub struct NetBuffer {
    data: BytesMut,
    lease: Option<Lease>,
}

impl NetBuffer {
    /// Zero-filled buffer whose payload initially spans its whole capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::zeroed(capacity),
            lease: None,
        }
    }

    /// Buffer holding a copy of `payload`.
    pub fn from_slice(payload: &[u8]) -> Self {
        Self {
            data: BytesMut::from(payload),
            lease: None,
        }
    }

    fn leased(capacity: usize, lease: Lease) -> Self {
        Self {
            data: BytesMut::zeroed(capacity),
            lease: Some(lease),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.data
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Set the logical payload length. Growing zero-fills the new tail.
    pub fn set_payload_len(&mut self, len: usize) {
        if len <= self.data.len() {
            self.data.truncate(len);
        } else {
            self.data.resize(len, 0);
        }
    }

    /// Strip `len` consumed bytes from the front of the payload.
    pub fn hide_header(&mut self, len: usize) -> Result<()> {
        if len > self.data.len() {
            return Err(TransportError::HeaderUnderrun {
                hide: len,
                len: self.data.len(),
            });
        }
        self.data.advance(len);
        Ok(())
    }

    /// Release the buffer and keep only its payload bytes.
    pub fn freeze(self) -> Bytes {
        let Self { data, lease } = self;
        drop(lease);
        data.freeze()
    }
}

impl fmt::Debug for NetBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetBuffer")
            .field("len", &self.data.len())
            .field("leased", &self.lease.is_some())
            .finish()
    }
}

/// Decrements the owning allocator's outstanding count when dropped.
struct Lease {
    outstanding: Arc<AtomicUsize>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Source of receive buffers for the link.
pub trait BufferAllocator: Send + Sync {
    /// Allocate a buffer of `capacity` bytes, or `None` when exhausted.
    fn allocate(&self, capacity: usize) -> Option<NetBuffer>;
}

/// Unbounded heap allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl BufferAllocator for HeapAllocator {
    fn allocate(&self, capacity: usize) -> Option<NetBuffer> {
        Some(NetBuffer::with_capacity(capacity))
    }
}

/// Allocator with a fixed number of live buffers, like a network packet pool.
#[derive(Debug, Clone)]
pub struct BoundedAllocator {
    limit: usize,
    outstanding: Arc<AtomicUsize>,
}

impl BoundedAllocator {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Buffers allocated and not yet dropped.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl BufferAllocator for BoundedAllocator {
    fn allocate(&self, capacity: usize) -> Option<NetBuffer> {
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < self.limit).then_some(live + 1)
            })
            .ok()?;
        Some(NetBuffer::leased(
            capacity,
            Lease {
                outstanding: Arc::clone(&self.outstanding),
            },
        ))
    }
}

impl<T: BufferAllocator + ?Sized> BufferAllocator for Arc<T> {
    fn allocate(&self, capacity: usize) -> Option<NetBuffer> {
        (**self).allocate(capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_buffer_spans_capacity() {
        let buf = NetBuffer::with_capacity(16);
        assert_eq!(buf.len(), 16);
        assert!(buf.payload().iter().all(|b| *b == 0));
    }

    #[test]
    fn set_payload_len_shrinks_and_grows() {
        let mut buf = NetBuffer::from_slice(b"abcdef");
        buf.set_payload_len(3);
        assert_eq!(buf.payload(), b"abc");
        buf.set_payload_len(5);
        assert_eq!(buf.payload(), b"abc\0\0");
    }

    #[test]
    fn hide_header_strips_prefix() {
        let mut buf = NetBuffer::from_slice(b"HDRpayload");
        buf.hide_header(3).unwrap();
        assert_eq!(buf.payload(), b"payload");
        assert_eq!(buf.len(), 7);
    }

    #[test]
    fn hide_header_rejects_underrun() {
        let mut buf = NetBuffer::from_slice(b"ab");
        let err = buf.hide_header(3).unwrap_err();
        assert!(matches!(err, TransportError::HeaderUnderrun { hide: 3, len: 2 }));
        assert_eq!(buf.payload(), b"ab");
    }

    #[test]
    fn bounded_allocator_enforces_limit_and_releases_on_drop() {
        let alloc = BoundedAllocator::new(2);
        let a = alloc.allocate(8).unwrap();
        let b = alloc.allocate(8).unwrap();
        assert_eq!(alloc.outstanding(), 2);
        assert!(alloc.allocate(8).is_none());

        drop(a);
        assert_eq!(alloc.outstanding(), 1);
        let frozen = b.freeze();
        assert_eq!(frozen.len(), 8);
        assert_eq!(alloc.outstanding(), 0);
    }

    #[test]
    fn heap_allocator_always_succeeds() {
        let alloc = HeapAllocator;
        for _ in 0..4 {
            assert!(alloc.allocate(32).is_some());
        }
    }
}
