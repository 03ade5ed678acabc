//! Buffer pooling for chunk read/encrypt round trips, avoiding one
//! allocation per chunk on the hot path.

use bytes::Bytes;
use std::sync::{Arc, Mutex};

pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    buffer_capacity: usize,
}

impl BufferPool {
    pub fn new(pool_size: usize, buffer_capacity: usize) -> Arc<Self> {
        let buffers = (0..pool_size)
            .map(|_| Vec::with_capacity(buffer_capacity))
            .collect();
        Arc::new(Self {
            buffers: Mutex::new(buffers),
            buffer_capacity,
        })
    }

    pub fn take(&self) -> Vec<u8> {
        self.buffers
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.buffer_capacity))
    }

    pub fn wrap(self: &Arc<Self>, buf: Vec<u8>) -> Bytes {
        Bytes::from_owner(PooledVec {
            data: buf,
            pool: Arc::clone(self),
        })
    }

    fn return_buf(&self, mut buf: Vec<u8>) {
        buf.clear();
        if buf.capacity() >= self.buffer_capacity {
            self.buffers.lock().unwrap().push(buf);
        }
    }
}

struct PooledVec {
    data: Vec<u8>,
    pool: Arc<BufferPool>,
}

impl AsRef<[u8]> for PooledVec {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for PooledVec {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.data);
        self.pool.return_buf(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::BufferPool;

    #[test]
    fn returned_buffer_is_cleared_and_reused() {
        let pool = BufferPool::new(1, 8);
        let mut buf = pool.take();
        buf.extend_from_slice(b"abcd");
        let bytes = pool.wrap(buf);
        assert_eq!(bytes.len(), 4);
        drop(bytes);
        let reused = pool.take();
        assert_eq!(reused.len(), 0);
        assert!(reused.capacity() >= 8);
    }

    #[test]
    fn undersized_buffer_is_not_reclaimed() {
        let pool = BufferPool::new(1, 8);
        let small = Vec::with_capacity(2);
        drop(pool.wrap(small));
        let first = pool.take();
        assert!(first.capacity() >= 8);
    }
}
