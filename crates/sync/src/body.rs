use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Shape {
    Box { half_extents: [f32; 3] },
    Sphere { radius: f32 },
    Capsule { half_height: f32, radius: f32 },
    Trimesh { vertices: Vec<[f32; 3]>, indices: Vec<[u32; 3]> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionType {
    #[default]
    Dynamic,
    Static,
    KinematicPosition,
}

/// Caller-supplied description of a body. Shape geometry only travels
/// here (`add_body`, room creation); state frames never carry it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyDescriptor {
    pub id: String,
    pub shape: Shape,
    #[serde(default)]
    pub motion_type: MotionType,
    #[serde(default)]
    pub position: [f32; 3],
    #[serde(default = "identity_quat")]
    pub orientation: [f32; 4],
    #[serde(default = "default_mass")]
    pub mass: f32,
    #[serde(default)]
    pub center_of_mass: Option<[f32; 3]>,
    #[serde(default = "default_restitution")]
    pub restitution: f32,
    #[serde(default = "default_friction")]
    pub friction: f32,
    #[serde(default)]
    pub is_trigger: bool,
}

impl BodyDescriptor {
    pub fn new(id: impl Into<String>, shape: Shape) -> Self {
        Self {
            id: id.into(),
            shape,
            motion_type: MotionType::Dynamic,
            position: [0.0; 3],
            orientation: identity_quat(),
            mass: default_mass(),
            center_of_mass: None,
            restitution: default_restitution(),
            friction: default_friction(),
            is_trigger: false,
        }
    }

    pub fn with_motion_type(mut self, motion_type: MotionType) -> Self {
        self.motion_type = motion_type;
        self
    }

    pub fn at(mut self, position: [f32; 3]) -> Self {
        self.position = position;
        self
    }

    pub fn oriented(mut self, orientation: [f32; 4]) -> Self {
        self.orientation = orientation;
        self
    }

    /// Pose the body would have right after spawning.
    pub fn initial_state(&self) -> BodyState {
        BodyState {
            position: self.position,
            orientation: self.orientation,
            ..BodyState::default()
        }
    }
}

fn identity_quat() -> [f32; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

fn default_mass() -> f32 {
    1.0
}

fn default_restitution() -> f32 {
    0.3
}

fn default_friction() -> f32 {
    0.5
}

/// Runtime pose and velocities of one body as sampled from the
/// simulation. Plain arrays on the wire, glam accessors in memory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BodyState {
    pub position: [f32; 3],
    pub orientation: [f32; 4],
    pub linear_velocity: [f32; 3],
    pub angular_velocity: [f32; 3],
}

impl Default for BodyState {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            orientation: identity_quat(),
            linear_velocity: [0.0; 3],
            angular_velocity: [0.0; 3],
        }
    }
}

impl BodyState {
    pub fn position_vec(&self) -> Vec3 {
        Vec3::from(self.position)
    }

    pub fn orientation_quat(&self) -> Quat {
        Quat::from_xyzw(
            self.orientation[0],
            self.orientation[1],
            self.orientation[2],
            self.orientation[3],
        )
        .normalize()
    }

    pub fn linear_velocity_vec(&self) -> Vec3 {
        Vec3::from(self.linear_velocity)
    }

    pub fn angular_velocity_vec(&self) -> Vec3 {
        Vec3::from(self.angular_velocity)
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position.into();
    }

    pub fn set_orientation(&mut self, orientation: Quat) {
        self.orientation = [orientation.x, orientation.y, orientation.z, orientation.w];
    }

    pub fn set_linear_velocity(&mut self, velocity: Vec3) {
        self.linear_velocity = velocity.into();
    }

    pub fn set_angular_velocity(&mut self, velocity: Vec3) {
        self.angular_velocity = velocity.into();
    }
}
