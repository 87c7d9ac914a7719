use std::time::Instant;

use physync::{MAX_CATCHUP_TICKS, TICK_DT};

/// Wall-clock driven fixed-timestep accumulator. Elapsed time is
/// clamped so a stalled process never tries to simulate more than
/// `MAX_CATCHUP_TICKS` worth of catch-up in one burst.
pub struct SimulationClock {
    dt: f32,
    accumulator: f32,
    last_wake: Instant,
}

impl Default for SimulationClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulationClock {
    pub fn new() -> Self {
        Self {
            dt: TICK_DT,
            accumulator: 0.0,
            last_wake: Instant::now(),
        }
    }

    pub fn dt(&self) -> f32 {
        self.dt
    }

    /// Fold wall-clock time elapsed since the previous wake-up into
    /// the accumulator.
    pub fn advance(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_wake).as_secs_f32();
        self.last_wake = now;
        self.accumulate(elapsed);
    }

    pub fn accumulate(&mut self, elapsed: f32) {
        self.accumulator += elapsed.min(self.dt * MAX_CATCHUP_TICKS as f32);
    }

    pub fn consume_tick(&mut self) -> bool {
        if self.accumulator >= self.dt {
            self.accumulator -= self.dt;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
        self.last_wake = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulation_yields_ticks() {
        let mut clock = SimulationClock::new();

        clock.accumulate(2.5 * TICK_DT);
        assert!(clock.consume_tick());
        assert!(clock.consume_tick());
        assert!(!clock.consume_tick());

        // The half-tick remainder carries over.
        clock.accumulate(0.6 * TICK_DT);
        assert!(clock.consume_tick());
    }

    #[test]
    fn catch_up_is_capped() {
        let mut clock = SimulationClock::new();

        // A multi-second stall folds into at most MAX_CATCHUP_TICKS;
        // the extra fraction keeps the count off the rounding edge.
        clock.accumulate(5.0);
        clock.accumulate(0.6 * TICK_DT);

        let mut ticks = 0;
        while clock.consume_tick() {
            ticks += 1;
        }
        assert_eq!(ticks, MAX_CATCHUP_TICKS);
    }

    #[test]
    fn reset_discards_backlog() {
        let mut clock = SimulationClock::new();
        clock.accumulate(3.0 * TICK_DT);
        clock.reset();
        assert!(!clock.consume_tick());
    }
}
