// Bounded, thread-safe history of recent chat lines.
//
// `MessageHistory` keeps the last `capacity` formatted entries in insertion
// order, evicting strictly FIFO. It has its own mutex, independent of the
// session registry's — broadcast appends here only after the registry lock
// has been released, so the two locks are never held together.
//
// Read operations return copies: callers iterate their snapshot without
// holding the lock.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// Default number of entries retained.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Bounded append log of formatted chat lines, `"[sender]: text"` each.
pub struct MessageHistory {
    capacity: usize,
    entries: Mutex<VecDeque<String>>,
}

impl Default for MessageHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl MessageHistory {
    /// History with the default capacity.
    pub fn new() -> Self {
        Self::default()
    }

    /// History retaining at most `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Append one formatted entry, evicting the oldest if over capacity.
    pub fn append(&self, sender: &str, text: &str) {
        let entry = format!("[{sender}]: {text}");
        let mut entries = self.entries.lock();
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// Copy of the full history, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Copy of the last `min(n, len)` entries, in original order.
    pub fn last_n(&self, n: usize) -> Vec<String> {
        let entries = self.entries.lock();
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    /// Current entry count.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when no entries are retained.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Configured maximum entry count.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
