//! Fixed-capacity cyclic byte buffer sitting between file reads and socket sends.
//!
//! One byte of capacity is always kept free so that equal cursors can only
//! mean "empty". The buffer never reallocates after construction, which bounds
//! the memory of a session regardless of the size of the file being served.

/// Ring buffer with independent read and write cursors.
#[derive(Debug)]
pub struct CyclicBuffer {
    buffer: Box<[u8]>,
    read: usize,
    write: usize,
}

impl CyclicBuffer {
    /// Allocates a buffer of `capacity` bytes, of which `capacity - 1` are usable.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is smaller than two.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 2, "cyclic buffer capacity must be at least two bytes");
        CyclicBuffer {
            buffer: vec![0u8; capacity].into_boxed_slice(),
            read: 0,
            write: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Number of bytes waiting to be consumed.
    pub fn bytes_to_read(&self) -> usize {
        if self.read <= self.write {
            self.write - self.read
        } else {
            self.capacity() - self.read + self.write
        }
    }

    /// Number of bytes that can be produced without overrunning the read cursor.
    pub fn bytes_to_write(&self) -> usize {
        self.capacity() - 1 - self.bytes_to_read()
    }

    /// The contiguous run of unread bytes starting at the read cursor.
    ///
    /// May be shorter than [`bytes_to_read`](Self::bytes_to_read) when the
    /// data wraps around the end of the storage.
    pub fn readable(&self) -> &[u8] {
        if self.read <= self.write {
            &self.buffer[self.read..self.write]
        } else {
            &self.buffer[self.read..]
        }
    }

    /// The contiguous free run starting at the write cursor.
    pub fn writable(&mut self) -> &mut [u8] {
        let capacity = self.capacity();
        let end = if self.read > self.write {
            self.read - 1
        } else if self.read == 0 {
            capacity - 1
        } else {
            capacity
        };
        &mut self.buffer[self.write..end]
    }

    /// Marks `count` bytes at the write cursor as filled.
    pub fn submit_write(&mut self, count: usize) {
        debug_assert!(count <= self.bytes_to_write(), "write of {count} overruns the read cursor");
        self.write = (self.write + count) % self.capacity();
    }

    /// Marks `count` bytes at the read cursor as consumed.
    pub fn submit_read(&mut self, count: usize) {
        debug_assert!(count <= self.bytes_to_read(), "read of {count} overruns the write cursor");
        self.read = (self.read + count) % self.capacity();
    }

    pub fn empty(&self) -> bool {
        self.read == self.write
    }

    pub fn full(&self) -> bool {
        self.bytes_to_write() == 0
    }
}
