//! Reusable payload buffers.
//!
//! Heap reassembly allocates one payload buffer per live heap. At line rate
//! that is thousands of multi-megabyte allocations per second, which is
//! exactly the allocator pressure a [`MemoryPool`] removes: buffers handed
//! out by the pool find their way back to its free list when the consumer
//! drops the heap, so steady-state operation recycles the same few
//! allocations.
//!
//! The pool is shared: clone it into as many streams as needed. Requests
//! larger than the pool's buffer size, or arriving while the free list is
//! empty, fall back to the system allocator.

use std::sync::{Arc, Mutex, Weak};

use log::{debug, trace};

struct PoolInner {
    buffer_size: usize,
    max_free: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

/// A bounded free-list of fixed-size payload buffers.
#[derive(Clone)]
pub struct MemoryPool {
    inner: Arc<PoolInner>,
}

impl MemoryPool {
    /// Create a pool retaining up to `max_free` buffers of `buffer_size`
    /// bytes each.
    pub fn new(max_free: usize, buffer_size: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                buffer_size,
                max_free,
                free: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Pre-fill the free list with `n` buffers so the first heaps do not
    /// pay the allocation either.
    pub fn warm(self, n: usize) -> Self {
        let n = n.min(self.inner.max_free);
        let mut free = self.inner.free.lock().unwrap();
        while free.len() < n {
            free.push(Vec::with_capacity(self.inner.buffer_size));
        }
        drop(free);
        self
    }

    /// Number of bytes in each pooled buffer.
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Buffers currently sitting on the free list.
    pub fn free_buffers(&self) -> usize {
        self.inner.free.lock().unwrap().len()
    }

    /// Get a buffer able to hold at least `size` bytes.
    ///
    /// Oversized requests bypass the pool entirely; their buffers are
    /// system-allocated and never return to the free list.
    pub fn allocate(&self, size: usize) -> PayloadBuffer {
        if size > self.inner.buffer_size {
            debug!(
                "request for {size} bytes exceeds pool buffer size {}, using system allocation",
                self.inner.buffer_size
            );
            return PayloadBuffer::system();
        }
        let recycled = self.inner.free.lock().unwrap().pop();
        let buf = match recycled {
            Some(mut buf) => {
                buf.clear();
                buf
            }
            None => {
                trace!("pool free list empty, allocating a fresh buffer");
                Vec::with_capacity(self.inner.buffer_size)
            }
        };
        PayloadBuffer {
            buf,
            pool: Some(Arc::downgrade(&self.inner)),
        }
    }
}

/// A heap payload buffer; pooled buffers return to their pool on drop.
///
/// The `len` of the underlying storage tracks the *reserved* payload size:
/// growth zero-fills, so unreceived regions of a partially assembled heap
/// read as zeroes.
#[derive(Debug)]
pub struct PayloadBuffer {
    buf: Vec<u8>,
    pool: Option<Weak<PoolInner>>,
}

impl PayloadBuffer {
    /// A plain system-allocated buffer, used when no pool is configured.
    pub(crate) fn system() -> Self {
        Self {
            buf: Vec::new(),
            pool: None,
        }
    }

    /// Grow the reserved size to at least `size` bytes.
    ///
    /// When `exact` is false, growth doubles the current reservation to
    /// amortize repeated extension by per-packet increments; when the final
    /// size is known (`exact`), the reservation matches it exactly.
    pub(crate) fn reserve(&mut self, size: usize, exact: bool) {
        if size > self.buf.len() {
            let mut target = size;
            if !exact && target < self.buf.len() * 2 {
                target = self.buf.len() * 2;
            }
            self.buf.resize(target, 0);
        }
    }

    /// Shrink the reserved size; used when freezing a heap to the length
    /// that was actually determined.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }
}

impl Drop for PayloadBuffer {
    fn drop(&mut self) {
        let Some(pool) = self.pool.take().and_then(|w| w.upgrade()) else {
            return;
        };
        // Buffers that can still serve a full-size request go back on the
        // free list, up to the retention bound.
        if self.buf.capacity() >= pool.buffer_size {
            let mut free = pool.free.lock().unwrap();
            if free.len() < pool.max_free {
                free.push(std::mem::take(&mut self.buf));
            }
        }
    }
}
