//! Splits authoritative frames into locally predicted bodies (to be
//! blended by the caller) and remote bodies (fed through the
//! interpolation buffers), and retires acknowledged inputs.

use std::collections::{HashMap, HashSet, VecDeque};

use physync::{
    BodyState, InputBatch, DEFAULT_RENDER_DELAY_MS, MAX_INPUT_BUFFER, POSITION_LERP_SPEED,
    RECONCILIATION_THRESHOLD, ROTATION_SLERP_SPEED,
};

use crate::interpolation::{slerp_shortest, InterpolationBuffer};

#[derive(Debug, Default)]
pub struct FrameResult {
    /// Authoritative states for bodies this client predicts itself.
    pub local_corrections: Vec<(String, BodyState)>,
    /// Interpolated render states for everything else.
    pub remote_states: Vec<(String, BodyState)>,
}

#[derive(Debug)]
pub struct Reconciler {
    local_bodies: HashSet<String>,
    pending_inputs: VecDeque<InputBatch>,
    buffers: HashMap<String, InterpolationBuffer>,
    render_delay_ms: f64,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            local_bodies: HashSet::new(),
            pending_inputs: VecDeque::new(),
            buffers: HashMap::new(),
            render_delay_ms: DEFAULT_RENDER_DELAY_MS,
        }
    }

    pub fn set_render_delay_ms(&mut self, delay_ms: f64) {
        self.render_delay_ms = delay_ms;
    }

    pub fn mark_local(&mut self, body_id: impl Into<String>) {
        self.local_bodies.insert(body_id.into());
    }

    pub fn unmark_local(&mut self, body_id: &str) {
        self.local_bodies.remove(body_id);
    }

    pub fn is_local(&self, body_id: &str) -> bool {
        self.local_bodies.contains(body_id)
    }

    /// Remember an input until the authority has observed its tick.
    pub fn record_input(&mut self, batch: InputBatch) {
        if self.pending_inputs.len() >= MAX_INPUT_BUFFER as usize {
            self.pending_inputs.pop_front();
        }
        self.pending_inputs.push_back(batch);
    }

    pub fn pending_input_count(&self) -> usize {
        self.pending_inputs.len()
    }

    pub fn process_frame(
        &mut self,
        server_tick: u32,
        timestamp_ms: f64,
        bodies: &[(String, BodyState)],
        now_ms: f64,
    ) -> FrameResult {
        // Inputs at or before the authoritative tick have been seen.
        self.pending_inputs.retain(|batch| batch.tick > server_tick);

        let mut result = FrameResult::default();
        let render_time = now_ms - self.render_delay_ms;

        for (id, state) in bodies {
            if self.local_bodies.contains(id) {
                result.local_corrections.push((id.clone(), *state));
                continue;
            }

            let buffer = self.buffers.entry(id.clone()).or_default();
            buffer.push(timestamp_ms, *state);
            let sampled = buffer.sample(render_time).unwrap_or(*state);
            result.remote_states.push((id.clone(), sampled));
        }

        result
    }

    /// Re-sample every remote buffer; the per-render-frame path.
    pub fn sampled_states(&self, now_ms: f64) -> Vec<(String, BodyState)> {
        let render_time = now_ms - self.render_delay_ms;
        self.buffers
            .iter()
            .filter_map(|(id, buffer)| {
                buffer.sample(render_time).map(|state| (id.clone(), state))
            })
            .collect()
    }

    pub fn remove_body(&mut self, body_id: &str) {
        self.buffers.remove(body_id);
        self.local_bodies.remove(body_id);
    }

    /// Drop every buffer and pending input; local markings survive a
    /// reset since the same avatar stays ours.
    pub fn reset(&mut self) {
        self.pending_inputs.clear();
        self.buffers.clear();
    }
}

/// True when the prediction has drifted far enough from authority
/// that blending should kick in.
pub fn needs_correction(predicted: &BodyState, authoritative: &BodyState) -> bool {
    let delta = predicted.position_vec() - authoritative.position_vec();
    delta.length_squared() > RECONCILIATION_THRESHOLD * RECONCILIATION_THRESHOLD
}

/// One blend step toward the authoritative state: position lerp,
/// orientation slerp, velocities snapped.
pub fn blend_body_state(current: &BodyState, target: &BodyState) -> BodyState {
    let mut out = BodyState::default();
    out.set_position(
        current
            .position_vec()
            .lerp(target.position_vec(), POSITION_LERP_SPEED),
    );
    out.set_orientation(slerp_shortest(
        current.orientation_quat(),
        target.orientation_quat(),
        ROTATION_SLERP_SPEED,
    ));
    out.linear_velocity = target.linear_velocity;
    out.angular_velocity = target.angular_velocity;
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_at(x: f32) -> BodyState {
        BodyState {
            position: [x, 0.0, 0.0],
            ..BodyState::default()
        }
    }

    fn batch(tick: u32, sequence: u32) -> InputBatch {
        InputBatch::new(tick, sequence)
    }

    #[test]
    fn acknowledged_inputs_are_discarded() {
        let mut reconciler = Reconciler::new();
        for tick in 10..20 {
            reconciler.record_input(batch(tick, tick));
        }

        reconciler.process_frame(14, 0.0, &[], 0.0);

        assert_eq!(reconciler.pending_input_count(), 5);
        // Everything left is strictly newer than the server tick.
        assert!(reconciler.pending_inputs.iter().all(|b| b.tick > 14));
    }

    #[test]
    fn local_bodies_bypass_interpolation() {
        let mut reconciler = Reconciler::new();
        reconciler.mark_local("avatar");

        let bodies = vec![
            ("avatar".to_owned(), state_at(1.0)),
            ("crate".to_owned(), state_at(2.0)),
        ];
        let result = reconciler.process_frame(0, 1000.0, &bodies, 1000.0);

        assert_eq!(result.local_corrections.len(), 1);
        assert_eq!(result.local_corrections[0].0, "avatar");
        assert_eq!(result.remote_states.len(), 1);
        assert_eq!(result.remote_states[0].0, "crate");
    }

    #[test]
    fn correction_threshold_is_squared_distance() {
        let predicted = state_at(0.0);
        assert!(!needs_correction(&predicted, &state_at(0.05)));
        assert!(needs_correction(&predicted, &state_at(0.2)));
    }

    #[test]
    fn blend_moves_position_partially_and_snaps_velocity() {
        let current = BodyState {
            position: [0.0, 0.0, 0.0],
            linear_velocity: [1.0, 0.0, 0.0],
            ..BodyState::default()
        };
        let target = BodyState {
            position: [1.0, 0.0, 0.0],
            linear_velocity: [5.0, 0.0, 0.0],
            ..BodyState::default()
        };

        let blended = blend_body_state(&current, &target);
        assert!((blended.position[0] - POSITION_LERP_SPEED).abs() < 1e-6);
        assert_eq!(blended.linear_velocity, [5.0, 0.0, 0.0]);
    }

    #[test]
    fn removing_a_body_drops_its_buffer() {
        let mut reconciler = Reconciler::new();
        let bodies = vec![("crate".to_owned(), state_at(2.0))];
        reconciler.process_frame(0, 1000.0, &bodies, 1000.0);
        assert_eq!(reconciler.sampled_states(1000.0).len(), 1);

        reconciler.remove_body("crate");
        assert!(reconciler.sampled_states(1000.0).is_empty());
    }
}
