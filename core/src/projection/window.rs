use std::collections::VecDeque;

/// Fixed-capacity FIFO that evicts its oldest entry when full.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingWindow<T> {
    values: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> RollingWindow<T> {
    /// A capacity of zero is raised to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: T) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    /// Swaps in a buffer of the new capacity holding the most recent
    /// `min(len, capacity)` values in their original order.
    pub fn resize(&mut self, capacity: usize) {
        let capacity = capacity.max(1);
        let skip = self.values.len().saturating_sub(capacity);
        let mut next = VecDeque::with_capacity(capacity);
        next.extend(self.values.iter().skip(skip).cloned());
        self.values = next;
        self.capacity = capacity;
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<&T> {
        self.values.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.values.iter()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.values.iter().cloned().collect()
    }
}
