//! Tuning constants shared by server and client. All of these are
//! observable on the wire one way or another, so changing them is a
//! protocol change.

pub const DEFAULT_PORT: u16 = 8080;

/// Fixed simulation rate.
pub const TICK_RATE: u32 = 60;
pub const TICK_DT: f32 = 1.0 / TICK_RATE as f32;
pub const TICK_DT_MS: f64 = 1000.0 / TICK_RATE as f64;

/// State broadcast rate; one delta frame every `BROADCAST_INTERVAL_TICKS`.
pub const BROADCAST_RATE: u32 = 20;
pub const BROADCAST_INTERVAL_TICKS: u32 = TICK_RATE / BROADCAST_RATE;

/// Rate at which the client flushes queued input actions.
pub const INPUT_SEND_RATE: u32 = 60;

/// Input batches older than this many ticks are pruned.
pub const MAX_INPUT_BUFFER: u32 = 120;

/// Squared-distance gate for snapping a predicted body to authority.
pub const RECONCILIATION_THRESHOLD: f32 = 0.1;
pub const POSITION_LERP_SPEED: f32 = 0.3;
pub const ROTATION_SLERP_SPEED: f32 = 0.3;

/// Snapshots retained per body for render interpolation.
pub const INTERPOLATION_BUFFER_SIZE: usize = 3;

/// Render sampling lags real time by three broadcast periods.
pub const DEFAULT_RENDER_DELAY_MS: f64 = 3.0 * (1000.0 / BROADCAST_RATE as f64);

pub const CLOCK_SYNC_INTERVAL_SECS: u64 = 3;
pub const CLOCK_SYNC_WINDOW: usize = 10;
pub const MIN_CLOCK_SAMPLES: usize = 3;

/// Per-component threshold below which a field counts as unchanged.
pub const DELTA_EPSILON: f32 = 1e-4;

/// Spiral-of-death guard: never simulate more than this many ticks
/// worth of wall-clock time in one catch-up burst.
pub const MAX_CATCHUP_TICKS: u32 = 10;
