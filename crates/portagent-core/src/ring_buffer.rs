//! Fixed-capacity byte ring buffer used to stage raw socket data.
//!
//! The buffer sits between a channel's non-blocking reads and the framing
//! step. It never grows: writes are clamped to the free space and report how
//! many bytes were actually taken, so callers that need lossless behaviour
//! must compare the returned count against what they offered.
//!
//! Besides the usual read and write cursors the buffer keeps a look-ahead
//! (peek) cursor. Framing scans ahead with [`RingBuffer::peek_next_byte`]
//! looking for a delimiter and only commits with [`RingBuffer::read`] once a
//! whole frame is present; [`RingBuffer::reset_peek`] restarts the scan.
//!
//! # Example
//!
//! ```
//! use portagent_core::RingBuffer;
//!
//! let mut buffer = RingBuffer::with_capacity(8).unwrap();
//! assert_eq!(buffer.write(b"ABCDEFGH"), 8);
//! assert_eq!(buffer.write(b"XY"), 0);
//!
//! let mut out = [0u8; 3];
//! assert_eq!(buffer.read(&mut out), 3);
//! assert_eq!(&out, b"ABC");
//!
//! assert_eq!(buffer.write(b"XY"), 2);
//! assert_eq!(buffer.read_vec(7), b"DEFGHXY".to_vec());
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All copies go through bounds-checked `get`/`split_at` access; cursor
//! arithmetic is kept below `2 * capacity` before wrapping.

use crate::error::{CoreError, CoreResult};

/// Fixed-capacity circular byte buffer with an independent peek cursor.
///
/// The peek cursor is stored as a distance from the read cursor, so it can
/// never fall behind the read cursor or run past the write cursor, whatever
/// mix of reads, discards and peeks the caller performs.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    /// Backing storage, `capacity` bytes long
    data: Box<[u8]>,

    /// Offset of the first unread byte
    head: usize,

    /// Offset one past the last written byte
    tail: usize,

    /// Number of unread bytes
    size: usize,

    /// Distance of the peek cursor from `head` (0..=size)
    peeked: usize,
}

impl RingBuffer {
    /// Creates an empty buffer holding at most `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidCapacity` for a zero capacity.
    pub fn with_capacity(capacity: usize) -> CoreResult<Self> {
        if capacity == 0 {
            return Err(CoreError::InvalidCapacity { capacity });
        }

        Ok(Self {
            data: vec![0; capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
            size: 0,
            peeked: 0,
        })
    }

    /// Total number of bytes the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of unread bytes currently held.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_full(&self) -> bool {
        self.size == self.capacity()
    }

    /// Free space left for writes.
    pub fn available(&self) -> usize {
        self.capacity() - self.size
    }

    /// Bytes between the peek cursor and the write cursor.
    pub fn peek_remaining(&self) -> usize {
        self.size - self.peeked
    }

    /// Offset of the read cursor within the backing storage.
    pub fn read_cursor(&self) -> usize {
        self.head
    }

    /// Offset of the write cursor within the backing storage.
    pub fn write_cursor(&self) -> usize {
        self.tail
    }

    /// Offset of the peek cursor within the backing storage.
    pub fn peek_cursor(&self) -> usize {
        self.wrap(self.head + self.peeked)
    }

    /// Copies as much of `bytes` as fits, wrapping at the end of storage.
    ///
    /// Returns the number of bytes copied, which is
    /// `min(bytes.len(), available())`. Excess input is dropped.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let count = bytes.len().min(self.available());
        if count == 0 {
            return 0;
        }

        let (accepted, _) = bytes.split_at(count);
        let first = count.min(self.capacity() - self.tail);
        let (front, back) = accepted.split_at(first);

        if let Some(dst) = self.data.get_mut(self.tail..self.tail + first) {
            dst.copy_from_slice(front);
        }
        if let Some(dst) = self.data.get_mut(..back.len()) {
            dst.copy_from_slice(back);
        }

        self.tail = self.wrap(self.tail + count);
        self.size += count;
        count
    }

    /// Copies up to `out.len()` unread bytes out and consumes them.
    ///
    /// Returns the number of bytes copied.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let count = out.len().min(self.size);
        if count == 0 {
            return 0;
        }

        let (dst, _) = out.split_at_mut(count);
        self.copy_out(self.head, dst);
        self.consume(count);
        count
    }

    /// Reads up to `max_bytes` into a freshly allocated vector.
    pub fn read_vec(&mut self, max_bytes: usize) -> Vec<u8> {
        let mut out = vec![0; max_bytes.min(self.size)];
        let count = self.read(&mut out);
        out.truncate(count);
        out
    }

    /// Drops up to `max_bytes` unread bytes without copying them.
    ///
    /// Returns the number of bytes dropped.
    pub fn discard(&mut self, max_bytes: usize) -> usize {
        let count = max_bytes.min(self.size);
        self.consume(count);
        count
    }

    /// Copies up to `out.len()` bytes starting at the peek cursor.
    ///
    /// Only the peek cursor moves; the unread data stays in place.
    pub fn peek(&mut self, out: &mut [u8]) -> usize {
        let count = out.len().min(self.peek_remaining());
        if count == 0 {
            return 0;
        }

        let (dst, _) = out.split_at_mut(count);
        self.copy_out(self.peek_cursor(), dst);
        self.peeked += count;
        count
    }

    /// Returns the byte under the peek cursor and advances it.
    ///
    /// Returns `None` once the peek cursor has caught up with the write
    /// cursor.
    pub fn peek_next_byte(&mut self) -> Option<u8> {
        if self.peeked == self.size {
            return None;
        }

        let byte = self.data.get(self.peek_cursor()).copied()?;
        self.peeked += 1;
        Some(byte)
    }

    /// Rewinds the peek cursor to the read cursor.
    pub fn reset_peek(&mut self) {
        self.peeked = 0;
    }

    /// Drops all unread bytes. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        self.discard(self.size)
    }

    /// Advances the read cursor by `count` (<= size), dragging the peek
    /// cursor along when it would otherwise fall behind.
    fn consume(&mut self, count: usize) {
        self.head = self.wrap(self.head + count);
        self.size -= count;
        self.peeked = self.peeked.saturating_sub(count);
    }

    /// Copies `out.len()` bytes starting at storage offset `start`.
    fn copy_out(&self, start: usize, out: &mut [u8]) {
        let first = out.len().min(self.capacity() - start);
        let (front, back) = out.split_at_mut(first);

        if let Some(src) = self.data.get(start..start + first) {
            front.copy_from_slice(src);
        }
        if let Some(src) = self.data.get(..back.len()) {
            back.copy_from_slice(src);
        }
    }

    fn wrap(&self, offset: usize) -> usize {
        offset % self.capacity()
    }
}
