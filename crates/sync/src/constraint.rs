use serde::{Deserialize, Serialize};

/// Joint between two bodies. The `type` discriminator and the
/// variant-dependent fields sit at the top level of the wire object,
/// next to the ids, so each variant carries the common fields itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConstraintDescriptor {
    BallAndSocket {
        id: String,
        body_a: String,
        body_b: String,
        #[serde(default)]
        pivot_a: [f32; 3],
        #[serde(default)]
        pivot_b: [f32; 3],
        #[serde(default = "default_true")]
        collision: bool,
    },
    Hinge {
        id: String,
        body_a: String,
        body_b: String,
        #[serde(default)]
        pivot_a: [f32; 3],
        #[serde(default)]
        pivot_b: [f32; 3],
        axis: [f32; 3],
        #[serde(default = "default_true")]
        collision: bool,
    },
    Distance {
        id: String,
        body_a: String,
        body_b: String,
        #[serde(default)]
        pivot_a: [f32; 3],
        #[serde(default)]
        pivot_b: [f32; 3],
        max_distance: f32,
        #[serde(default = "default_true")]
        collision: bool,
    },
    Prismatic {
        id: String,
        body_a: String,
        body_b: String,
        #[serde(default)]
        pivot_a: [f32; 3],
        #[serde(default)]
        pivot_b: [f32; 3],
        axis: [f32; 3],
        #[serde(default = "default_true")]
        collision: bool,
    },
    /// Wire alias of `Prismatic`; kept as its own discriminator so
    /// peer frames re-encode unchanged, collapsed when built.
    Slider {
        id: String,
        body_a: String,
        body_b: String,
        #[serde(default)]
        pivot_a: [f32; 3],
        #[serde(default)]
        pivot_b: [f32; 3],
        axis: [f32; 3],
        #[serde(default = "default_true")]
        collision: bool,
    },
    Lock {
        id: String,
        body_a: String,
        body_b: String,
        #[serde(default)]
        pivot_a: [f32; 3],
        #[serde(default)]
        pivot_b: [f32; 3],
        #[serde(default)]
        axis: Option<[f32; 3]>,
        #[serde(default)]
        perp_axis: Option<[f32; 3]>,
        #[serde(default = "default_true")]
        collision: bool,
    },
    Spring {
        id: String,
        body_a: String,
        body_b: String,
        #[serde(default)]
        pivot_a: [f32; 3],
        #[serde(default)]
        pivot_b: [f32; 3],
        max_distance: f32,
        stiffness: f32,
        damping: f32,
        #[serde(default = "default_true")]
        collision: bool,
    },
    SixDof {
        id: String,
        body_a: String,
        body_b: String,
        #[serde(default)]
        pivot_a: [f32; 3],
        #[serde(default)]
        pivot_b: [f32; 3],
        #[serde(default)]
        axis: Option<[f32; 3]>,
        /// Axes 0..2 are linear X/Y/Z, 3..5 angular X/Y/Z. An axis
        /// with no entry is locked; an entry with both limits absent
        /// leaves the axis free.
        #[serde(default)]
        limits: Vec<AxisLimit>,
        #[serde(default = "default_true")]
        collision: bool,
    },
}

fn default_true() -> bool {
    true
}

impl ConstraintDescriptor {
    pub fn id(&self) -> &str {
        match self {
            Self::BallAndSocket { id, .. }
            | Self::Hinge { id, .. }
            | Self::Distance { id, .. }
            | Self::Prismatic { id, .. }
            | Self::Slider { id, .. }
            | Self::Lock { id, .. }
            | Self::Spring { id, .. }
            | Self::SixDof { id, .. } => id,
        }
    }

    pub fn body_a(&self) -> &str {
        match self {
            Self::BallAndSocket { body_a, .. }
            | Self::Hinge { body_a, .. }
            | Self::Distance { body_a, .. }
            | Self::Prismatic { body_a, .. }
            | Self::Slider { body_a, .. }
            | Self::Lock { body_a, .. }
            | Self::Spring { body_a, .. }
            | Self::SixDof { body_a, .. } => body_a,
        }
    }

    pub fn body_b(&self) -> &str {
        match self {
            Self::BallAndSocket { body_b, .. }
            | Self::Hinge { body_b, .. }
            | Self::Distance { body_b, .. }
            | Self::Prismatic { body_b, .. }
            | Self::Slider { body_b, .. }
            | Self::Lock { body_b, .. }
            | Self::Spring { body_b, .. }
            | Self::SixDof { body_b, .. } => body_b,
        }
    }

    /// Whether contacts between the joined pair stay enabled.
    pub fn contacts_enabled(&self) -> bool {
        match self {
            Self::BallAndSocket { collision, .. }
            | Self::Hinge { collision, .. }
            | Self::Distance { collision, .. }
            | Self::Prismatic { collision, .. }
            | Self::Slider { collision, .. }
            | Self::Lock { collision, .. }
            | Self::Spring { collision, .. }
            | Self::SixDof { collision, .. } => *collision,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisLimit {
    pub axis: u8,
    #[serde(default)]
    pub min_limit: Option<f32>,
    #[serde(default)]
    pub max_limit: Option<f32>,
}
