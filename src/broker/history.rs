//! Per-topic history: fixed-capacity circular log with snapshot reads.

use parking_lot::RwLock;

use crate::protocol::Message;

const DEFAULT_CAPACITY: usize = 100;

struct HistoryInner {
    buf: Vec<Option<Message>>,
    head: usize,
    size: usize,
}

/// Circular log of the most recent messages on a topic. Appends overwrite
/// the oldest slot once full. A snapshot observes a self-consistent prefix:
/// it may miss appends that land after it starts, but never sees an
/// uninitialized slot or the same slot twice.
pub struct History {
    cap: usize,
    inner: RwLock<HistoryInner>,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        let cap = if capacity == 0 { DEFAULT_CAPACITY } else { capacity };
        Self {
            cap,
            inner: RwLock::new(HistoryInner {
                buf: vec![None; cap],
                head: 0,
                size: 0,
            }),
        }
    }

    /// O(1). Writes at the head slot and advances it modulo capacity.
    pub fn append(&self, msg: Message) {
        let mut inner = self.inner.write();
        let head = inner.head;
        inner.buf[head] = Some(msg);
        inner.head = (head + 1) % self.cap;
        if inner.size < self.cap {
            inner.size += 1;
        }
    }

    /// The most recent `min(n, size)` messages in chronological order
    /// (oldest first). `n <= 0` returns an empty vec.
    pub fn last_n(&self, n: i64) -> Vec<Message> {
        if n <= 0 {
            return Vec::new();
        }

        let inner = self.inner.read();
        let count = (n as usize).min(inner.size);
        if count == 0 {
            return Vec::new();
        }

        let start = (inner.head + self.cap - count) % self.cap;
        let mut result = Vec::with_capacity(count);
        for i in 0..count {
            let pos = (start + i) % self.cap;
            // Slots inside [start, start+count) are always populated.
            if let Some(msg) = &inner.buf[pos] {
                result.push(msg.clone());
            }
        }
        result
    }

    pub fn size(&self) -> usize {
        self.inner.read().size
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}
