pub mod body;
pub mod clock;
pub mod codec;
pub mod constraint;
pub mod input;
pub mod message;
pub mod protocol;

pub use body::{BodyDescriptor, BodyState, MotionType, Shape};
pub use clock::ClockStats;
pub use codec::{decode, encode, BodyEntry, BodyRef, CodecError, FieldMask, Frame, StateFrame};
pub use constraint::{AxisLimit, ConstraintDescriptor};
pub use input::{InputAction, InputBatch};
pub use message::{BodySnapshot, CollisionEvent, CollisionKind, Message, RoomSnapshot};
pub use protocol::*;

/// Milliseconds since the unix epoch, as used in frame timestamps.
pub fn wall_clock_ms() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
        * 1000.0
}
