pub mod client;
pub mod input;
pub mod interpolation;
pub mod reconcile;

pub use client::{ClientError, JoinInfo, SyncClient, SyncEvent, TrafficStats};
pub use input::InputManager;
pub use interpolation::{hermite, slerp_shortest, InterpolationBuffer};
pub use reconcile::{blend_body_state, needs_correction, FrameResult, Reconciler};
