use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, LazyLock};

use crossbeam_queue::ArrayQueue;

const POOL_CAPACITY: usize = 128;

pub static GLOBAL_BUFFER_POOL: LazyLock<Arc<BufferPool>> =
    LazyLock::new(|| Arc::new(BufferPool::default()));

/// A pooled frame buffer that returns itself to the pool on drop.
pub struct PooledBuffer {
    pool: Arc<BufferPool>,
    inner: ManuallyDrop<Vec<u8>>,
}

impl PooledBuffer {
    fn new(pool: Arc<BufferPool>, buf: Vec<u8>) -> Self {
        Self {
            pool,
            inner: ManuallyDrop::new(buf),
        }
    }
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        // SAFETY: inner is never accessed after this
        let buf = unsafe { ManuallyDrop::take(&mut self.inner) };
        self.pool.return_buffer(buf);
    }
}

/// Pools the `Vec<u8>` frame buffers used by both ends of the wire so a
/// busy client/server pair doesn't reallocate one per request.
#[derive(Debug)]
pub struct BufferPool {
    buffers: ArrayQueue<Vec<u8>>,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: ArrayQueue::new(capacity),
        }
    }

    pub fn get(self: &Arc<Self>) -> PooledBuffer {
        let buf = self.buffers.pop().unwrap_or_default();
        PooledBuffer::new(Arc::clone(self), buf)
    }

    pub fn return_buffer(&self, mut buf: Vec<u8>) {
        buf.clear();
        let _ = self.buffers.push(buf);
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(POOL_CAPACITY)
    }
}
