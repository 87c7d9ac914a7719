//! Opcode-tagged framing. `room_state` gets a hand-packed layout for
//! compactness; every other message rides a self-describing
//! MessagePack payload. Raw JSON (no opcode) still decodes so older
//! peers keep working.

pub mod quat;
mod state;

pub use state::{BodyEntry, BodyRef, FieldMask, StateFrame, FLAG_DELTA, FLAG_NUMERIC_IDS};

use crate::message::Message;

pub const OPCODE_ROOM_STATE: u8 = 0x01;
pub const OPCODE_MESSAGE: u8 = 0x02;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("empty frame")]
    Empty,
    #[error("truncated frame: needed {needed} bytes, had {available}")]
    Truncated { needed: usize, available: usize },
    #[error("invalid quaternion component index {0}")]
    InvalidQuaternionIndex(u8),
    #[error("body id is not valid utf-8")]
    InvalidBodyId,
    #[error("body id of {0} bytes exceeds the u8 length prefix")]
    BodyIdTooLong(usize),
    #[error("state frame mixes numeric and string body ids")]
    MixedBodyIds,
    #[error("state frame with {0} bodies exceeds the u16 body count")]
    TooManyBodies(usize),
    #[error("messagepack encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("messagepack decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("json fallback decode failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// One frame on the wire: either a binary state broadcast or a
/// structured message.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    State(StateFrame),
    Message(Message),
}

pub fn encode(frame: &Frame) -> Result<Vec<u8>, CodecError> {
    match frame {
        Frame::State(state) => {
            let mut out = Vec::with_capacity(16 + state.bodies.len() * 48);
            out.push(OPCODE_ROOM_STATE);
            state::encode_into(state, &mut out)?;
            Ok(out)
        }
        Frame::Message(message) => {
            let payload = rmp_serde::to_vec_named(message)?;
            let mut out = Vec::with_capacity(1 + payload.len());
            out.push(OPCODE_MESSAGE);
            out.extend_from_slice(&payload);
            Ok(out)
        }
    }
}

pub fn encode_message(message: &Message) -> Result<Vec<u8>, CodecError> {
    encode(&Frame::Message(message.clone()))
}

pub fn decode(bytes: &[u8]) -> Result<Frame, CodecError> {
    let (&opcode, payload) = bytes.split_first().ok_or(CodecError::Empty)?;

    match opcode {
        OPCODE_ROOM_STATE => Ok(Frame::State(state::decode_body(payload)?)),
        OPCODE_MESSAGE => Ok(Frame::Message(rmp_serde::from_slice(payload)?)),
        // No opcode prefix: treat the whole frame as legacy JSON.
        _ => Ok(Frame::Message(serde_json::from_slice(bytes)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BodyState;
    use crate::message::Message;

    fn sample_state() -> BodyState {
        BodyState {
            position: [1.5, -2.0, 3.25],
            orientation: {
                let q = glam::Quat::from_rotation_y(std::f32::consts::FRAC_PI_3);
                [q.x, q.y, q.z, q.w]
            },
            linear_velocity: [0.5, 0.0, -4.0],
            angular_velocity: [0.0, 2.0, 0.0],
        }
    }

    #[test]
    fn message_roundtrip() {
        let msg = Message::ClockSyncResponse {
            client_timestamp: 1000.5,
            server_timestamp: 1017.25,
        };

        let bytes = encode_message(&msg).unwrap();
        assert_eq!(bytes[0], OPCODE_MESSAGE);
        assert_eq!(decode(&bytes).unwrap(), Frame::Message(msg));
    }

    #[test]
    fn descriptor_rich_message_roundtrip() {
        use crate::body::{BodyDescriptor, MotionType, Shape};
        use crate::constraint::ConstraintDescriptor;

        let msg = Message::CreateRoom {
            room_id: "arena".into(),
            initial_bodies: vec![
                BodyDescriptor::new(
                    "floor",
                    Shape::Box {
                        half_extents: [50.0, 0.5, 50.0],
                    },
                )
                .with_motion_type(MotionType::Static)
                .at([0.0, -0.5, 0.0]),
                BodyDescriptor::new("ball", Shape::Sphere { radius: 0.25 }).at([0.0, 5.0, 0.0]),
            ],
            gravity: Some([0.0, -9.81, 0.0]),
            initial_constraints: vec![ConstraintDescriptor::Spring {
                id: "tether".into(),
                body_a: "floor".into(),
                body_b: "ball".into(),
                pivot_a: [0.0, 0.5, 0.0],
                pivot_b: [0.0; 3],
                max_distance: 6.0,
                stiffness: 40.0,
                damping: 2.0,
                collision: false,
            }],
        };

        let bytes = encode_message(&msg).unwrap();
        assert_eq!(decode(&bytes).unwrap(), Frame::Message(msg));
    }

    #[test]
    fn raw_json_decodes_without_opcode() {
        let json = br#"{"type":"join_room","room_id":"arena"}"#;
        let frame = decode(json).unwrap();
        assert_eq!(
            frame,
            Frame::Message(Message::JoinRoom {
                room_id: "arena".into()
            })
        );
    }

    #[test]
    fn state_frame_roundtrip_numeric_ids() {
        let frame = StateFrame {
            tick: 1234,
            timestamp_ms: 9_999_999.5,
            is_delta: true,
            bodies: vec![
                BodyEntry::full(0, sample_state()),
                BodyEntry {
                    body: BodyRef::Index(7),
                    mask: FieldMask::POSITION,
                    state: BodyState {
                        position: [10.0, 20.0, 30.0],
                        ..BodyState::default()
                    },
                },
            ],
        };

        let bytes = encode(&Frame::State(frame.clone())).unwrap();
        assert_eq!(bytes[0], OPCODE_ROOM_STATE);

        let Frame::State(decoded) = decode(&bytes).unwrap() else {
            panic!("expected state frame");
        };

        assert_eq!(decoded.tick, frame.tick);
        assert!(decoded.is_delta);
        assert_eq!(decoded.bodies.len(), 2);

        let full = &decoded.bodies[0];
        let expected = sample_state();
        for i in 0..3 {
            assert!((full.state.position[i] - expected.position[i]).abs() < 1e-6);
            assert!((full.state.linear_velocity[i] - expected.linear_velocity[i]).abs() < 1e-6);
        }
        for i in 0..4 {
            assert!((full.state.orientation[i] - expected.orientation[i]).abs() < 3e-5);
        }
    }

    #[test]
    fn unmasked_fields_decode_to_defaults() {
        let frame = StateFrame {
            tick: 1,
            timestamp_ms: 0.0,
            is_delta: true,
            bodies: vec![BodyEntry {
                body: BodyRef::Index(3),
                mask: FieldMask::POSITION,
                state: BodyState {
                    position: [4.0, 5.0, 6.0],
                    linear_velocity: [99.0, 99.0, 99.0],
                    ..BodyState::default()
                },
            }],
        };

        let bytes = encode(&Frame::State(frame)).unwrap();
        let Frame::State(decoded) = decode(&bytes).unwrap() else {
            panic!("expected state frame");
        };

        let body = &decoded.bodies[0];
        assert_eq!(body.state.position, [4.0, 5.0, 6.0]);
        assert_eq!(body.state.linear_velocity, [0.0; 3]);
        assert_eq!(body.state.angular_velocity, [0.0; 3]);
        assert_eq!(body.state.orientation, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn string_id_frame_roundtrips() {
        let frame = StateFrame {
            tick: 7,
            timestamp_ms: 42.0,
            is_delta: false,
            bodies: vec![BodyEntry {
                body: BodyRef::Name("crate-17".into()),
                mask: FieldMask::ALL,
                state: sample_state(),
            }],
        };

        let bytes = encode(&Frame::State(frame)).unwrap();
        let Frame::State(decoded) = decode(&bytes).unwrap() else {
            panic!("expected state frame");
        };
        assert_eq!(decoded.bodies[0].body, BodyRef::Name("crate-17".into()));
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let frame = StateFrame {
            tick: 7,
            timestamp_ms: 42.0,
            is_delta: false,
            bodies: vec![BodyEntry::full(0, sample_state())],
        };
        let bytes = encode(&Frame::State(frame)).unwrap();

        assert!(matches!(
            decode(&bytes[..bytes.len() - 5]),
            Err(CodecError::Truncated { .. })
        ));
        assert!(matches!(decode(&[]), Err(CodecError::Empty)));
    }

    #[test]
    fn garbage_is_an_error_not_a_panic() {
        assert!(decode(&[0xF7, 0x12, 0x00]).is_err());
    }
}
