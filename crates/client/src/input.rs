use std::collections::VecDeque;

use physync::{InputAction, InputBatch, MAX_INPUT_BUFFER};

/// Collects queued actions between flushes. The flush cadence lives
/// with the facade's timer task; this type only owns the batching and
/// the bounded send history.
#[derive(Debug, Default)]
pub struct InputManager {
    queue: Vec<InputAction>,
    history: VecDeque<InputBatch>,
    next_sequence: u32,
}

impl InputManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_action(&mut self, action: InputAction) {
        self.queue.push(action);
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Build a batch from the queued actions, or `None` when there is
    /// nothing to send.
    pub fn flush(&mut self, server_tick: u32) -> Option<InputBatch> {
        if self.queue.is_empty() {
            return None;
        }

        let batch = InputBatch {
            tick: server_tick,
            sequence: self.next_sequence,
            actions: std::mem::take(&mut self.queue),
        };
        self.next_sequence = self.next_sequence.wrapping_add(1);

        if self.history.len() >= MAX_INPUT_BUFFER as usize {
            self.history.pop_front();
        }
        self.history.push_back(batch.clone());

        Some(batch)
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impulse(x: f32) -> InputAction {
        InputAction::ApplyImpulse {
            body_id: "b".into(),
            impulse: [x, 0.0, 0.0],
        }
    }

    #[test]
    fn empty_queue_produces_no_batch() {
        let mut manager = InputManager::new();
        assert!(manager.flush(10).is_none());
    }

    #[test]
    fn sequences_are_monotonic() {
        let mut manager = InputManager::new();

        manager.queue_action(impulse(1.0));
        let first = manager.flush(10).unwrap();
        manager.queue_action(impulse(2.0));
        let second = manager.flush(11).unwrap();

        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert_eq!(first.tick, 10);
        assert_eq!(second.actions.len(), 1);
        assert_eq!(manager.queued_len(), 0);
    }

    #[test]
    fn history_is_bounded() {
        let mut manager = InputManager::new();
        for i in 0..(MAX_INPUT_BUFFER + 20) {
            manager.queue_action(impulse(i as f32));
            manager.flush(i).unwrap();
        }
        assert_eq!(manager.history_len(), MAX_INPUT_BUFFER as usize);
    }
}
