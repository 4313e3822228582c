use std::collections::BTreeMap;

use crate::foundation::error::VideoError;

/// Holds out-of-order results until the next expected sequence number arrives.
///
/// Capacity bounds the items parked ahead of a gap; the awaited item itself is always accepted.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next: u64,
    capacity: usize,
    pending: BTreeMap<u64, T>,
}

impl<T> ReorderBuffer<T> {
    pub fn new(start: u64, capacity: usize) -> Self {
        Self {
            next: start,
            capacity: capacity.max(1),
            pending: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, seq: u64, item: T) -> Result<(), VideoError> {
        if seq < self.next || self.pending.contains_key(&seq) {
            return Err(VideoError::encode(format!(
                "duplicate frame sequence {seq} (next expected {})",
                self.next
            )));
        }
        if seq != self.next && self.pending.len() >= self.capacity {
            return Err(VideoError::encode(format!(
                "reorder buffer overflow: {} frames pending while waiting for {}",
                self.pending.len(),
                self.next
            )));
        }
        self.pending.insert(seq, item);
        Ok(())
    }

    /// Next in-order item, if it has arrived.
    pub fn pop_ready(&mut self) -> Option<T> {
        let item = self.pending.remove(&self.next)?;
        self.next += 1;
        Some(item)
    }

    pub fn next_seq(&self) -> u64 {
        self.next
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/video/reorder.rs"]
mod tests;
