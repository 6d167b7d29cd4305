//! Fixed-capacity FIFO bucket with a monotonic received counter.

use std::collections::VecDeque;
use std::num::NonZeroUsize;

use serde::Serialize;

/// Bucket retaining the most recent entries.
///
/// `received` counts every push and is never reset by eviction, so it is
/// always at least the number of stored entries.
#[derive(Debug, Clone)]
pub struct BoundedBucket<T> {
    capacity: NonZeroUsize,
    received: u64,
    entries: VecDeque<T>,
}

impl<T> BoundedBucket<T> {
    /// Creates an empty bucket holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            received: 0,
            entries: VecDeque::with_capacity(capacity.get()),
        }
    }

    /// Appends an entry, returning the evicted oldest entry when full.
    pub fn push(&mut self, entry: T) -> Option<T> {
        self.received += 1;
        self.entries.push_back(entry);
        if self.entries.len() > self.capacity.get() {
            self.entries.pop_front()
        } else {
            None
        }
    }

    /// Returns how many entries were ever pushed.
    #[must_use]
    pub const fn received(&self) -> u64 {
        self.received
    }

    /// Returns the number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> NonZeroUsize {
        self.capacity
    }

    /// Iterates retained entries, oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.entries.iter()
    }

    /// Returns the newest retained entry.
    #[must_use]
    pub fn newest(&self) -> Option<&T> {
        self.entries.back()
    }

    /// Returns counters describing the bucket.
    #[must_use]
    pub fn stats(&self) -> BucketStats {
        BucketStats {
            received: self.received,
            stored: self.entries.len(),
            capacity: self.capacity.get(),
        }
    }
}

impl<T: Clone> BoundedBucket<T> {
    /// Returns up to `limit` of the newest entries, ordered oldest to newest.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<T> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }
}

/// Snapshot of a bucket's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BucketStats {
    /// Entries ever pushed.
    pub received: u64,
    /// Entries currently retained.
    pub stored: usize,
    /// Maximum retained entries.
    pub capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut bucket = BoundedBucket::new(NonZeroUsize::new(2).unwrap());
        assert_eq!(bucket.push("one"), None);
        assert_eq!(bucket.push("two"), None);
        assert_eq!(bucket.push("three"), Some("one"));

        assert_eq!(bucket.recent(10), vec!["two", "three"]);
        assert_eq!(bucket.recent(1), vec!["three"]);
        assert_eq!(bucket.newest(), Some(&"three"));
        assert_eq!(
            bucket.stats(),
            BucketStats {
                received: 3,
                stored: 2,
                capacity: 2
            }
        );
    }
}
