use std::collections::BTreeMap;

use physync::{InputBatch, MAX_INPUT_BUFFER};

/// Per-client queue of input batches keyed by the tick they should be
/// applied at. Entries older than `MAX_INPUT_BUFFER` ticks are pruned
/// on insert so a silent client cannot grow the map without bound.
#[derive(Debug, Default)]
pub struct InputBuffer {
    batches: BTreeMap<u32, Vec<InputBatch>>,
}

impl InputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, tick: u32, batch: InputBatch) {
        self.batches.entry(tick).or_default().push(batch);

        let cutoff = tick.saturating_sub(MAX_INPUT_BUFFER);
        self.batches.retain(|&t, _| t >= cutoff);
    }

    /// Remove and return every batch targeted at `tick`.
    pub fn take(&mut self, tick: u32) -> Vec<InputBatch> {
        self.batches.remove(&tick).unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.batches.clear();
    }

    pub fn len(&self) -> usize {
        self.batches.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(tick: u32, sequence: u32) -> InputBatch {
        InputBatch::new(tick, sequence)
    }

    #[test]
    fn take_drains_exactly_one_tick() {
        let mut buffer = InputBuffer::new();
        buffer.add(5, batch(5, 0));
        buffer.add(5, batch(5, 1));
        buffer.add(6, batch(6, 2));

        let drained = buffer.take(5);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].sequence, 0);
        assert_eq!(drained[1].sequence, 1);

        assert!(buffer.take(5).is_empty());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn old_entries_are_pruned() {
        let mut buffer = InputBuffer::new();
        buffer.add(0, batch(0, 0));
        buffer.add(1, batch(1, 1));

        buffer.add(MAX_INPUT_BUFFER + 1, batch(MAX_INPUT_BUFFER + 1, 2));

        assert!(buffer.take(0).is_empty());
        assert_eq!(buffer.take(1).len(), 1);
        assert_eq!(buffer.take(MAX_INPUT_BUFFER + 1).len(), 1);
    }

    #[test]
    fn clear_discards_everything() {
        let mut buffer = InputBuffer::new();
        buffer.add(3, batch(3, 0));
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
