use serde::{Deserialize, Serialize};

/// One action a client asks the authority to apply to a body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputAction {
    ApplyImpulse {
        body_id: String,
        impulse: [f32; 3],
    },
    ApplyForce {
        body_id: String,
        force: [f32; 3],
    },
    SetVelocity {
        body_id: String,
        #[serde(default)]
        linear: Option<[f32; 3]>,
        #[serde(default)]
        angular: Option<[f32; 3]>,
    },
    SetPose {
        body_id: String,
        #[serde(default)]
        position: Option<[f32; 3]>,
        #[serde(default)]
        orientation: Option<[f32; 4]>,
    },
}

impl InputAction {
    pub fn body_id(&self) -> &str {
        match self {
            InputAction::ApplyImpulse { body_id, .. }
            | InputAction::ApplyForce { body_id, .. }
            | InputAction::SetVelocity { body_id, .. }
            | InputAction::SetPose { body_id, .. } => body_id,
        }
    }
}

/// A group of actions flushed together, tagged with the client's
/// server-tick estimate and a monotonic sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputBatch {
    pub tick: u32,
    pub sequence: u32,
    pub actions: Vec<InputAction>,
}

impl InputBatch {
    pub fn new(tick: u32, sequence: u32) -> Self {
        Self {
            tick,
            sequence,
            actions: Vec::new(),
        }
    }
}
