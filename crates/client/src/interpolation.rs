//! Per-body render smoothing: a short timestamped ring sampled at
//! `now - renderDelay`, with cubic Hermite position, shortest-arc
//! slerp orientation and a decaying extrapolation tail.

use std::collections::VecDeque;

use glam::{Quat, Vec3};

use physync::{BodyState, INTERPOLATION_BUFFER_SIZE};

/// Extrapolated velocity fades to zero over roughly half a second.
const EXTRAPOLATION_FADE: f32 = 2.0;

#[derive(Debug)]
pub struct InterpolationBuffer {
    entries: VecDeque<(f64, BodyState)>,
    capacity: usize,
}

impl Default for InterpolationBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl InterpolationBuffer {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(INTERPOLATION_BUFFER_SIZE + 1),
            capacity: INTERPOLATION_BUFFER_SIZE + 1,
        }
    }

    /// Insert keeping timestamps ordered; a duplicate timestamp
    /// replaces the earlier entry.
    pub fn push(&mut self, timestamp_ms: f64, state: BodyState) {
        if let Some(slot) = self
            .entries
            .iter_mut()
            .find(|(ts, _)| (*ts - timestamp_ms).abs() < f64::EPSILON)
        {
            slot.1 = state;
            return;
        }

        let position = self
            .entries
            .iter()
            .position(|(ts, _)| *ts > timestamp_ms)
            .unwrap_or(self.entries.len());
        self.entries.insert(position, (timestamp_ms, state));

        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn sample(&self, render_time_ms: f64) -> Option<BodyState> {
        let (oldest_ts, oldest) = self.entries.front()?;
        let (newest_ts, newest) = self.entries.back()?;

        if render_time_ms <= *oldest_ts {
            return Some(*oldest);
        }

        if render_time_ms >= *newest_ts {
            let dt = ((render_time_ms - newest_ts) / 1000.0) as f32;
            return Some(extrapolate(newest, dt));
        }

        for (older, newer) in self.entries.iter().zip(self.entries.iter().skip(1)) {
            if let Some(state) = try_interpolate(older, newer, render_time_ms) {
                return Some(state);
            }
        }

        Some(*newest)
    }
}

fn try_interpolate(
    older: &(f64, BodyState),
    newer: &(f64, BodyState),
    render_time_ms: f64,
) -> Option<BodyState> {
    let (older_ts, older_state) = older;
    let (newer_ts, newer_state) = newer;

    if render_time_ms < *older_ts || render_time_ms > *newer_ts {
        return None;
    }

    let span = newer_ts - older_ts;
    let t = if span > 0.0 {
        ((render_time_ms - older_ts) / span) as f32
    } else {
        0.0
    };

    Some(interpolate_states(
        older_state,
        newer_state,
        (span / 1000.0) as f32,
        t,
    ))
}

fn interpolate_states(from: &BodyState, to: &BodyState, span_secs: f32, t: f32) -> BodyState {
    let position = hermite(
        from.position_vec(),
        from.linear_velocity_vec(),
        to.position_vec(),
        to.linear_velocity_vec(),
        span_secs,
        t,
    );
    let orientation = slerp_shortest(from.orientation_quat(), to.orientation_quat(), t);
    let linear = from.linear_velocity_vec().lerp(to.linear_velocity_vec(), t);
    let angular = from
        .angular_velocity_vec()
        .lerp(to.angular_velocity_vec(), t);

    let mut state = BodyState::default();
    state.set_position(position);
    state.set_orientation(orientation);
    state.set_linear_velocity(linear);
    state.set_angular_velocity(angular);
    state
}

fn extrapolate(state: &BodyState, dt_secs: f32) -> BodyState {
    let decay = (1.0 - EXTRAPOLATION_FADE * dt_secs).max(0.0);

    let mut out = *state;
    out.set_position(state.position_vec() + state.linear_velocity_vec() * dt_secs * decay);
    out.set_angular_velocity(state.angular_velocity_vec() * decay);
    // Orientation is held; spinning a stale body looks worse than
    // freezing it.
    out
}

/// Cubic Hermite between two samples using their velocities as
/// tangents, scaled by the sample spacing.
pub fn hermite(p0: Vec3, v0: Vec3, p1: Vec3, v1: Vec3, span_secs: f32, t: f32) -> Vec3 {
    let t2 = t * t;
    let t3 = t2 * t;

    let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let h10 = t3 - 2.0 * t2 + t;
    let h01 = -2.0 * t3 + 3.0 * t2;
    let h11 = t3 - t2;

    p0 * h00 + v0 * span_secs * h10 + p1 * h01 + v1 * span_secs * h11
}

/// Shortest-arc spherical interpolation; near-collinear inputs fall
/// back to a normalized linear blend.
pub fn slerp_shortest(a: Quat, b: Quat, t: f32) -> Quat {
    let mut dot = a.dot(b);
    let b = if dot < 0.0 {
        dot = -dot;
        -b
    } else {
        b
    };

    if dot > 0.9995 {
        return (a + (b - a) * t).normalize();
    }

    let theta0 = dot.clamp(-1.0, 1.0).acos();
    let sin_theta0 = theta0.sin();
    let s0 = ((1.0 - t) * theta0).sin() / sin_theta0;
    let s1 = (t * theta0).sin() / sin_theta0;
    a * s0 + b * s1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_at(x: f32, vx: f32) -> BodyState {
        BodyState {
            position: [x, 0.0, 0.0],
            linear_velocity: [vx, 0.0, 0.0],
            ..BodyState::default()
        }
    }

    #[test]
    fn midpoint_with_zero_velocity_is_the_midpoint() {
        let mut buffer = InterpolationBuffer::new();
        buffer.push(0.0, state_at(0.0, 0.0));
        buffer.push(100.0, state_at(10.0, 0.0));

        let sampled = buffer.sample(50.0).unwrap();
        assert!((sampled.position[0] - 5.0).abs() < 1e-5);
    }

    #[test]
    fn before_the_oldest_entry_returns_it_verbatim() {
        let mut buffer = InterpolationBuffer::new();
        buffer.push(100.0, state_at(3.0, 1.0));
        buffer.push(200.0, state_at(4.0, 1.0));

        let sampled = buffer.sample(10.0).unwrap();
        assert_eq!(sampled.position[0], 3.0);
    }

    #[test]
    fn extrapolation_decays_velocity() {
        let mut buffer = InterpolationBuffer::new();
        buffer.push(0.0, state_at(0.0, 10.0));

        // 100 ms past the newest entry: decay = 1 - 2*0.1 = 0.8,
        // so position = 10 * 0.1 * 0.8 = 0.8.
        let sampled = buffer.sample(100.0).unwrap();
        assert!((sampled.position[0] - 0.8).abs() < 1e-4);

        // Far past the fade window the body stops moving entirely.
        let far = buffer.sample(2000.0).unwrap();
        assert_eq!(far.position[0], 0.0);
    }

    #[test]
    fn ring_is_bounded() {
        let mut buffer = InterpolationBuffer::new();
        for i in 0..20 {
            buffer.push(i as f64 * 50.0, state_at(i as f32, 0.0));
        }
        assert_eq!(buffer.len(), INTERPOLATION_BUFFER_SIZE + 1);

        // The oldest surviving entry is the one dropped last.
        let oldest = buffer.sample(0.0).unwrap();
        assert_eq!(oldest.position[0], (20 - (INTERPOLATION_BUFFER_SIZE + 1)) as f32);
    }

    #[test]
    fn slerp_keeps_unit_norm() {
        let a = Quat::from_rotation_y(0.3);
        let b = Quat::from_rotation_x(2.4) * Quat::from_rotation_y(-1.1);

        for i in 0..=10 {
            let t = i as f32 / 10.0;
            let q = slerp_shortest(a, b, t);
            assert!((q.length() - 1.0).abs() < 1e-2);
        }
    }

    #[test]
    fn slerp_takes_the_short_way_around() {
        let a = Quat::from_rotation_y(0.1);
        let b = -Quat::from_rotation_y(0.2);

        let mid = slerp_shortest(a, b, 0.5);
        let expected = Quat::from_rotation_y(0.15);
        assert!(mid.dot(expected).abs() > 0.9999);
    }

    #[test]
    fn hermite_respects_tangents() {
        let p0 = Vec3::ZERO;
        let p1 = Vec3::new(1.0, 0.0, 0.0);
        let v = Vec3::new(10.0, 0.0, 0.0);

        // Matching velocity at both ends of a 0.1 s span means the
        // curve is a straight constant-speed segment.
        let quarter = hermite(p0, v, p1, v, 0.1, 0.25);
        assert!((quarter.x - 0.25).abs() < 1e-5);
    }
}
