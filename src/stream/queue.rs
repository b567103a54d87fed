use std::collections::VecDeque;
use std::sync::Arc;

use crate::chronology::Timer;
use crate::data::{Blob, Data};
use crate::stream::{ReceiveCallback, SendCallback};
use crate::token::CancelToken;

/// One queued send: a data reference consumed from the front as bytes
/// reach the OS send buffer.
pub(crate) struct SendEntry {
    pub(crate) id: u64,
    pub(crate) data: Data,
    pub(crate) initial: usize,
    pub(crate) remaining: usize,
    pub(crate) token: Option<CancelToken>,
    pub(crate) deadline: Option<Arc<Timer>>,
    pub(crate) callback: Option<SendCallback>,
    /// Entries produced by the engine itself (handshake or downgrade
    /// bytes); they carry no user callback and mark handshake progress.
    pub(crate) handshake: bool,
}

impl SendEntry {
    pub(crate) fn progressed(&self) -> bool {
        self.remaining < self.initial
    }

    pub(crate) fn copied(&self) -> usize {
        self.initial - self.remaining
    }
}

/// The outcome of a cancellation probe against a queue.
pub(crate) enum Cancelled<T> {
    /// The entry was removed before any byte moved.
    Removed(T),
    /// The entry is past the point of no return.
    TooLate,
    /// No entry carries the token.
    NotFound,
}

/// The ordered, atomic write queue: entries are serviced strictly from
/// the head, so the bytes of one send are never interleaved with
/// another's.
///
/// Watermark events alternate: a `high` is announced once when an append
/// crosses above the high watermark, and the next `low` once a drain
/// brings the size down to the low watermark.
pub(crate) struct WriteQueue {
    entries: VecDeque<SendEntry>,
    size: usize,
    low_watermark: usize,
    high_watermark: usize,
    high_announced: bool,
}

impl WriteQueue {
    pub(crate) fn new(low_watermark: usize, high_watermark: usize) -> WriteQueue {
        WriteQueue {
            entries: VecDeque::new(),
            size: 0,
            low_watermark,
            high_watermark,
            high_announced: false,
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn set_watermarks(&mut self, low: usize, high: usize) {
        self.low_watermark = low;
        self.high_watermark = high;
    }

    pub(crate) fn high_watermark(&self) -> usize {
        self.high_watermark
    }

    pub(crate) fn low_watermark(&self) -> usize {
        self.low_watermark
    }

    /// True if a new send must be refused: the pre-send size already
    /// exceeds the high watermark.
    pub(crate) fn would_block(&self) -> bool {
        self.size > self.high_watermark
    }

    /// Appends an entry. Returns true if the append crossed above the
    /// high watermark and a `high-watermark` announcement is due.
    pub(crate) fn push(&mut self, entry: SendEntry) -> bool {
        self.size += entry.remaining;
        self.entries.push_back(entry);
        if !self.high_announced && self.size > self.high_watermark {
            self.high_announced = true;
            return true;
        }
        false
    }

    pub(crate) fn front_mut(&mut self) -> Option<&mut SendEntry> {
        self.entries.front_mut()
    }

    /// Records `n` bytes copied from the head entry to the OS.
    pub(crate) fn record_progress(&mut self, n: usize) {
        debug_assert!(self.size >= n);
        self.size -= n;
    }

    /// Removes the head entry once fully copied.
    pub(crate) fn pop_front(&mut self) -> Option<SendEntry> {
        self.entries.pop_front()
    }

    /// True if a drain has brought the size down to the low watermark and
    /// a `low-watermark` announcement is due.
    pub(crate) fn drained_to_low(&mut self) -> bool {
        if self.high_announced && self.size <= self.low_watermark {
            self.high_announced = false;
            return true;
        }
        false
    }

    /// Removes every entry, for discard or failure paths.
    pub(crate) fn take_all(&mut self) -> VecDeque<SendEntry> {
        self.size = 0;
        self.high_announced = false;
        std::mem::take(&mut self.entries)
    }

    /// Attempts to cancel the entry carrying `token`. An entry may be
    /// cancelled only while entirely un-copied.
    pub(crate) fn cancel(&mut self, token: CancelToken) -> Cancelled<SendEntry> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.token == Some(token));
        match index {
            None => Cancelled::NotFound,
            Some(index) => {
                if self.entries[index].progressed() {
                    return Cancelled::TooLate;
                }
                let entry = self.entries.remove(index).expect("index in range");
                self.size -= entry.remaining;
                Cancelled::Removed(entry)
            }
        }
    }

    /// Removes the entry with the given identity if it has not
    /// progressed, for deadline expiry.
    pub(crate) fn remove_unprogressed(&mut self, id: u64) -> Option<SendEntry> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        if self.entries[index].progressed() {
            return None;
        }
        let entry = self.entries.remove(index).expect("index in range");
        self.size -= entry.remaining;
        Some(entry)
    }
}

/// One pending receive: satisfied once the read queue holds `min_size`
/// bytes, delivering at most `max_size`.
pub(crate) struct ReceiveEntry {
    pub(crate) id: u64,
    pub(crate) min_size: usize,
    pub(crate) max_size: usize,
    pub(crate) token: Option<CancelToken>,
    pub(crate) deadline: Option<Arc<Timer>>,
    pub(crate) callback: Option<ReceiveCallback>,
}

/// The prefix-match read queue: a byte buffer extending the OS receive
/// buffer plus the ordered pending receives matched against its head.
pub(crate) struct ReadQueue {
    buffer: Blob,
    entries: VecDeque<ReceiveEntry>,
    low_watermark: usize,
    high_watermark: usize,
    high_announced: bool,
}

impl ReadQueue {
    pub(crate) fn new(low_watermark: usize, high_watermark: usize) -> ReadQueue {
        ReadQueue {
            buffer: Blob::new(),
            entries: VecDeque::new(),
            low_watermark,
            high_watermark,
            high_announced: false,
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.buffer.length()
    }

    pub(crate) fn set_watermarks(&mut self, low: usize, high: usize) {
        self.low_watermark = low;
        self.high_watermark = high;
    }

    pub(crate) fn high_watermark(&self) -> usize {
        self.high_watermark
    }

    pub(crate) fn low_watermark(&self) -> usize {
        self.low_watermark
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut Blob {
        &mut self.buffer
    }

    /// True after an arrival pushed the buffer above the high watermark
    /// and a `high-watermark` announcement is due.
    pub(crate) fn crossed_high(&mut self) -> bool {
        if !self.high_announced && self.buffer.length() > self.high_watermark {
            self.high_announced = true;
            return true;
        }
        false
    }

    /// True after a delivery drained the buffer to the low watermark and
    /// a `low-watermark` announcement is due.
    pub(crate) fn drained_to_low(&mut self) -> bool {
        if self.high_announced && self.buffer.length() <= self.low_watermark {
            self.high_announced = false;
            return true;
        }
        false
    }

    pub(crate) fn push_entry(&mut self, entry: ReceiveEntry) {
        self.entries.push_back(entry);
    }

    pub(crate) fn has_entries(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Dequeues the head receive if the buffer satisfies it, together
    /// with its delivery.
    pub(crate) fn satisfy_head(&mut self) -> Option<(ReceiveEntry, Blob)> {
        let head = self.entries.front()?;
        if self.buffer.length() < head.min_size {
            return None;
        }
        let take = self.buffer.length().min(head.max_size);
        let delivery = self.buffer.split_to(take);
        let entry = self.entries.pop_front().expect("head present");
        Some((entry, delivery))
    }

    /// Removes every pending receive, for end-of-stream and failure
    /// paths.
    pub(crate) fn take_entries(&mut self) -> VecDeque<ReceiveEntry> {
        std::mem::take(&mut self.entries)
    }

    /// Discards buffered bytes, returning how many were dropped.
    pub(crate) fn discard_buffer(&mut self) -> usize {
        let size = self.buffer.length();
        self.buffer = Blob::new();
        self.high_announced = false;
        size
    }

    /// Attempts to cancel the pending receive carrying `token`. Each
    /// receive entry cancels independently of bytes delivered to earlier
    /// completed receives.
    pub(crate) fn cancel(&mut self, token: CancelToken) -> Cancelled<ReceiveEntry> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.token == Some(token));
        match index {
            None => Cancelled::NotFound,
            Some(index) => {
                let entry = self.entries.remove(index).expect("index in range");
                Cancelled::Removed(entry)
            }
        }
    }

    /// Removes the pending receive with the given identity, for deadline
    /// expiry.
    pub(crate) fn remove_entry(&mut self, id: u64) -> Option<ReceiveEntry> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        self.entries.remove(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send_entry(id: u64, bytes: &[u8]) -> SendEntry {
        SendEntry {
            id,
            data: Data::from(bytes.to_vec()),
            initial: bytes.len(),
            remaining: bytes.len(),
            token: None,
            deadline: None,
            callback: None,
            handshake: false,
        }
    }

    #[test]
    fn write_watermarks_alternate() {
        let mut queue = WriteQueue::new(256, 1024);

        // Crossing above high announces once.
        assert!(!queue.push(send_entry(1, &[0u8; 512])));
        assert!(queue.push(send_entry(2, &[0u8; 1024])));
        assert!(!queue.push(send_entry(3, &[0u8; 512])));

        // Draining to low announces once, re-arming high.
        queue.record_progress(1500);
        assert!(!queue.drained_to_low());
        queue.record_progress(400);
        assert!(queue.drained_to_low());
        assert!(!queue.drained_to_low());

        assert!(queue.push(send_entry(4, &[0u8; 2048])));
    }

    #[test]
    fn would_block_is_strictly_above_high() {
        let mut queue = WriteQueue::new(0, 1024);
        queue.push(send_entry(1, &[0u8; 1024]));
        assert!(!queue.would_block());
        queue.push(send_entry(2, &[0u8; 1]));
        assert!(queue.would_block());
    }

    #[test]
    fn cancel_refuses_progressed_entries() {
        let mut queue = WriteQueue::new(0, usize::MAX);
        let token = CancelToken(7);
        let mut entry = send_entry(1, b"abcdef");
        entry.token = Some(token);
        queue.push(entry);

        queue.front_mut().unwrap().remaining -= 1;
        queue.record_progress(1);
        assert!(matches!(queue.cancel(token), Cancelled::TooLate));

        assert!(matches!(queue.cancel(CancelToken(8)), Cancelled::NotFound));
    }

    #[test]
    fn read_queue_satisfies_in_order() {
        let mut queue = ReadQueue::new(0, usize::MAX);
        queue.push_entry(ReceiveEntry {
            id: 1,
            min_size: 4,
            max_size: 4,
            token: None,
            deadline: None,
            callback: None,
        });

        queue.buffer_mut().extend_from_slice(b"ab");
        assert!(queue.satisfy_head().is_none());

        queue.buffer_mut().extend_from_slice(b"cdef");
        let (entry, delivery) = queue.satisfy_head().unwrap();
        assert_eq!(entry.id, 1);
        assert_eq!(delivery.to_vec(), b"abcd");
        assert_eq!(queue.size(), 2);
    }

    #[test]
    fn read_watermarks_alternate() {
        let mut queue = ReadQueue::new(2, 8);
        queue.buffer_mut().extend_from_slice(b"0123456789");
        assert!(queue.crossed_high());
        assert!(!queue.crossed_high());

        queue.push_entry(ReceiveEntry {
            id: 1,
            min_size: 1,
            max_size: 8,
            token: None,
            deadline: None,
            callback: None,
        });
        let (_, delivery) = queue.satisfy_head().unwrap();
        assert_eq!(delivery.to_vec(), b"01234567");
        assert!(queue.drained_to_low());
        assert!(!queue.drained_to_low());
    }
}
