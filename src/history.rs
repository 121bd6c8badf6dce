//! # Circular History Buffer
//!
//! Fixed-capacity ring that keeps the most recent N items. Once full, each
//! append overwrites the oldest slot in O(1). The write cursor never leaks out:
//! every accessor speaks in oldest-to-newest positions, index 0 being the
//! oldest retained item.

use std::ops::Index;

#[derive(Debug, Clone)]
pub struct CircularBuffer<T> {
    data: Vec<T>,
    capacity: usize,
    /// Next slot to overwrite once the buffer is full
    write_pos: usize,
}

impl<T> CircularBuffer<T> {
    /// A zero capacity buffer accepts appends but never retains anything.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            write_pos: 0,
        }
    }

    pub fn append(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        if self.data.len() < self.capacity {
            self.data.push(item);
        } else {
            self.data[self.write_pos] = item;
            self.write_pos = (self.write_pos + 1) % self.capacity;
        }
    }

    pub fn extend<I: IntoIterator<Item = T>>(&mut self, items: I) {
        for item in items {
            self.append(item);
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.data.len() == self.capacity
    }

    /// Item at `index` counted from the oldest retained item
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.data.len() {
            return None;
        }
        // Until the first wrap the cursor sits at 0, so this is the identity
        self.data.get((self.write_pos + index) % self.data.len())
    }

    pub fn first(&self) -> Option<&T> {
        self.get(0)
    }

    pub fn last(&self) -> Option<&T> {
        self.len().checked_sub(1).and_then(|i| self.get(i))
    }

    /// Iterate from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let (newer, older) = self.data.split_at(self.write_pos);
        older.iter().chain(newer.iter())
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.write_pos = 0;
    }
}

impl<T: Clone> CircularBuffer<T> {
    /// Snapshot of every retained item, oldest first
    pub fn all(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }

    /// Snapshot of the newest `n` items, oldest first
    pub fn last_n(&self, n: usize) -> Vec<T> {
        let skip = self.len().saturating_sub(n);
        self.iter().skip(skip).cloned().collect()
    }
}

impl<T> Index<usize> for CircularBuffer<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        match self.get(index) {
            Some(item) => item,
            None => panic!(
                "index out of bounds: the len is {} but the index is {}",
                self.len(),
                index
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overwrites_oldest() {
        let mut buffer = CircularBuffer::new(5);
        for i in 1..=8 {
            buffer.append(i);
        }

        assert_eq!(buffer.all(), vec![4, 5, 6, 7, 8]);
        assert_eq!(buffer.len(), 5);
        assert!(buffer.is_full());
    }

    #[test]
    fn test_first_last_and_index() {
        let mut buffer = CircularBuffer::new(3);
        assert!(buffer.first().is_none());
        assert!(buffer.last().is_none());

        buffer.extend([10, 20, 30, 40]);

        assert_eq!(buffer.first(), Some(&20));
        assert_eq!(buffer.last(), Some(&40));
        assert_eq!(buffer[0], 20);
        assert_eq!(buffer[2], 40);
        assert!(buffer.get(3).is_none());
    }

    #[test]
    fn test_partial_fill_keeps_order() {
        let mut buffer = CircularBuffer::new(4);
        buffer.append('a');
        buffer.append('b');

        assert!(!buffer.is_full());
        assert_eq!(buffer.all(), vec!['a', 'b']);
        assert_eq!(buffer.iter().count(), 2);
    }

    #[test]
    fn test_order_after_many_wraps() {
        let mut buffer = CircularBuffer::new(7);
        for i in 0..1000 {
            buffer.append(i);
            let all = buffer.all();
            assert!(all.windows(2).all(|w| w[0] < w[1]));
            assert_eq!(*buffer.last().unwrap(), i);
        }
        assert_eq!(buffer.all(), (993..1000).collect::<Vec<_>>());
    }

    #[test]
    fn test_last_n() {
        let mut buffer = CircularBuffer::new(5);
        buffer.extend(1..=7);

        assert_eq!(buffer.last_n(2), vec![6, 7]);
        assert_eq!(buffer.last_n(10), vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_clear_resets_cursor() {
        let mut buffer = CircularBuffer::new(3);
        buffer.extend(1..=5);
        buffer.clear();

        assert!(buffer.is_empty());
        buffer.append(9);
        assert_eq!(buffer.all(), vec![9]);
    }

    #[test]
    fn test_zero_capacity() {
        let mut buffer = CircularBuffer::new(0);
        buffer.append(1);
        assert!(buffer.is_empty());
        assert!(!buffer.is_full());
    }

    #[test]
    #[should_panic]
    fn test_index_out_of_bounds_panics() {
        let buffer: CircularBuffer<u8> = CircularBuffer::new(2);
        let _ = buffer[0];
    }
}
