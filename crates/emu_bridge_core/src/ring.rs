use std::collections::VecDeque;

/// Fixed-capacity FIFO log. Pushing into a full ring evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct Ring<T> {
    items: VecDeque<T>,
    capacity: usize,
    pushed: u64,
}

impl<T> Ring<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            pushed: 0,
        }
    }

    pub fn push(&mut self, item: T) -> Option<T> {
        self.pushed += 1;
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries ever pushed, including evicted ones.
    pub fn total_pushed(&self) -> u64 {
        self.pushed
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    /// The most recent `n` entries, oldest to newest.
    pub fn last(&self, n: usize) -> impl Iterator<Item = &T> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_evicts_oldest() {
        let mut ring = Ring::new(3);
        for i in 0..5 {
            ring.push(i);
        }
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(ring.total_pushed(), 5);
    }

    #[test]
    fn test_push_reports_evicted_entry() {
        let mut ring = Ring::new(1);
        assert_eq!(ring.push("a"), None);
        assert_eq!(ring.push("b"), Some("a"));
    }

    #[test]
    fn test_last_is_oldest_to_newest() {
        let mut ring = Ring::new(10);
        ring.extend_from(0..6);
        assert_eq!(ring.last(2).copied().collect::<Vec<_>>(), vec![4, 5]);
        assert_eq!(ring.last(100).count(), 6);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut ring = Ring::new(0);
        assert_eq!(ring.capacity(), 1);
        ring.extend_from(0..4);
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![3]);
    }

    impl<T> Ring<T> {
        fn extend_from(&mut self, items: impl IntoIterator<Item = T>) {
            for item in items {
                self.push(item);
            }
        }
    }
}
