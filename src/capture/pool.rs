//! Fixed-size pool of capture buffers.
//!
//! A sensor rotates through a finite set of buffers. Each [`PooledBuffer`]
//! returns itself to the pool when dropped, so a frame that is released on
//! every path (success or failure) can never exhaust the pool.

use std::ops::{Deref, DerefMut};

use flume::{Receiver, Sender};

/// Recycling pool of equally sized byte buffers
#[derive(Clone)]
pub struct BufferPool {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    capacity: usize,
    buffer_size: usize,
}

impl BufferPool {
    /// Pre-allocate `capacity` buffers of `buffer_size` bytes each
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        let (tx, rx) = flume::bounded(capacity);
        for _ in 0..capacity {
            // Cannot fail: the channel holds exactly `capacity` items
            let _ = tx.try_send(vec![0u8; buffer_size]);
        }

        Self {
            tx,
            rx,
            capacity,
            buffer_size,
        }
    }

    /// Take a free buffer, or `None` if every buffer is still held by a frame
    pub fn acquire(&self) -> Option<PooledBuffer> {
        let mut data = self.rx.try_recv().ok()?;
        data.resize(self.buffer_size, 0);

        Some(PooledBuffer {
            data,
            home: Some(self.tx.clone()),
        })
    }

    /// Number of buffers currently free
    pub fn available(&self) -> usize {
        self.rx.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .field("buffer_size", &self.buffer_size)
            .finish()
    }
}

/// Buffer leased from a [`BufferPool`], released on drop
pub struct PooledBuffer {
    data: Vec<u8>,
    home: Option<Sender<Vec<u8>>>,
}

impl PooledBuffer {
    /// Wrap a buffer that does not belong to any pool
    pub fn unpooled(data: Vec<u8>) -> Self {
        Self { data, home: None }
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(home) = self.home.take() {
            // Pool already gone during shutdown is fine
            let _ = home.try_send(std::mem::take(&mut self.data));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_until_exhausted() {
        let pool = BufferPool::new(2, 16);

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(a.len(), 16);
        assert_eq!(pool.available(), 0);
        assert!(pool.acquire().is_none());

        drop(a);
        assert_eq!(pool.available(), 1);
        drop(b);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_recycled_buffer_keeps_size() {
        let pool = BufferPool::new(1, 8);
        {
            let mut buf = pool.acquire().unwrap();
            buf[0] = 42;
        }
        let buf = pool.acquire().unwrap();
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn test_unpooled_drop_is_noop() {
        let buf = PooledBuffer::unpooled(vec![1, 2, 3]);
        assert_eq!(&buf[..], &[1, 2, 3]);
        drop(buf);
    }
}
