use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::body::{BodyDescriptor, BodyState};
use crate::constraint::ConstraintDescriptor;
use crate::input::InputBatch;

/// Full-state listing of every live body, sent on join and reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub tick: u32,
    pub timestamp_ms: f64,
    pub bodies: Vec<BodySnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodySnapshot {
    pub id: String,
    pub index: u16,
    pub state: BodyState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionKind {
    CollisionStarted,
    CollisionFinished,
    TriggerEntered,
    TriggerExited,
}

/// Contact data is only present for a newly started non-sensor
/// contact; point and normal are in body A's local frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollisionEvent {
    pub kind: CollisionKind,
    pub body_a: String,
    pub body_b: String,
    #[serde(default)]
    pub point: Option<[f32; 3]>,
    #[serde(default)]
    pub normal: Option<[f32; 3]>,
    #[serde(default)]
    pub impulse: Option<f32>,
}

/// Every structured message on the wire; `room_state` frames bypass
/// this enum and use the binary layout in `codec::state`. The `type`
/// discriminator is part of the protocol and unknown verbs are a
/// decode error, never silently ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    ClockSyncRequest {
        client_timestamp: f64,
    },
    ClockSyncResponse {
        client_timestamp: f64,
        server_timestamp: f64,
    },
    CreateRoom {
        room_id: String,
        initial_bodies: Vec<BodyDescriptor>,
        #[serde(default)]
        gravity: Option<[f32; 3]>,
        #[serde(default)]
        initial_constraints: Vec<ConstraintDescriptor>,
    },
    RoomCreated {
        room_id: String,
    },
    JoinRoom {
        room_id: String,
    },
    RoomJoined {
        room_id: String,
        snapshot: RoomSnapshot,
        client_id: String,
        simulation_running: bool,
        body_id_map: HashMap<String, u16>,
    },
    LeaveRoom,
    ClientInput {
        input: InputBatch,
    },
    /// Client request and server broadcast share this variant; the
    /// broadcast direction fills in the assigned numeric index.
    AddBody {
        body: BodyDescriptor,
        #[serde(default)]
        body_index: Option<u16>,
    },
    RemoveBody {
        body_id: String,
    },
    StartSimulation,
    SimulationStarted {
        snapshot: RoomSnapshot,
        body_id_map: HashMap<String, u16>,
    },
    /// Application-level event relayed untouched to the other clients
    /// in the sender's room.
    BodyEvent {
        body_id: String,
        event_type: String,
        #[serde(default)]
        data: Option<serde_json::Value>,
    },
    CollisionEvents {
        tick: u32,
        events: Vec<CollisionEvent>,
    },
    Error {
        message: String,
    },
}

impl Message {
    pub fn error(message: impl Into<String>) -> Self {
        Message::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Shape;

    #[test]
    fn discriminator_field_is_type() {
        let msg = Message::JoinRoom {
            room_id: "lobby".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "join_room");
        assert_eq!(json["room_id"], "lobby");
    }

    #[test]
    fn unknown_verb_is_rejected() {
        let err = serde_json::from_str::<Message>(r#"{"type":"warp_body"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn create_room_defaults() {
        let json = r#"{
            "type": "create_room",
            "room_id": "r",
            "initial_bodies": [
                {"id": "floor", "shape": {"type": "box", "half_extents": [50.0, 0.5, 50.0]},
                 "motion_type": "static", "position": [0.0, -0.5, 0.0]}
            ]
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        match msg {
            Message::CreateRoom {
                initial_bodies,
                gravity,
                initial_constraints,
                ..
            } => {
                assert_eq!(initial_bodies.len(), 1);
                assert!(matches!(initial_bodies[0].shape, Shape::Box { .. }));
                assert!(gravity.is_none());
                assert!(initial_constraints.is_empty());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
