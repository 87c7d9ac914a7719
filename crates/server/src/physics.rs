//! Facade over the rapier pipeline. The rest of the server only ever
//! talks in terms of string body ids and wire-level descriptors; the
//! handle bookkeeping and rapier types stay behind this wall.

use std::collections::HashMap;

use crossbeam_channel::{unbounded, Receiver};
use glam::Vec3;
use rapier3d::prelude::*;

use physync::{
    BodyDescriptor, BodyState, CollisionEvent, CollisionKind, ConstraintDescriptor, InputAction,
    MotionType, Shape, TICK_DT,
};

#[derive(Debug, thiserror::Error)]
pub enum PhysicsError {
    #[error("body '{0}' already exists")]
    DuplicateBody(String),
    #[error("unknown body '{0}'")]
    UnknownBody(String),
    #[error("constraint '{0}' already exists")]
    DuplicateConstraint(String),
    #[error("invalid shape for body '{id}': {reason}")]
    InvalidShape { id: String, reason: String },
}

pub struct PhysicsWorld {
    pipeline: PhysicsPipeline,
    integration_parameters: IntegrationParameters,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    gravity: Vector,
    event_collector: ChannelEventCollector,
    collision_events: Receiver<rapier3d::geometry::CollisionEvent>,
    handles: HashMap<String, RigidBodyHandle>,
    collider_owners: HashMap<ColliderHandle, String>,
    joints: HashMap<String, ImpulseJointHandle>,
    /// Insertion order, so snapshots list bodies deterministically.
    order: Vec<String>,
}

impl PhysicsWorld {
    pub fn new(gravity: Vec3) -> Self {
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = TICK_DT;
        integration_parameters.min_ccd_dt = TICK_DT / 100.0;

        let (collision_send, collision_recv) = unbounded();
        let (contact_force_send, _contact_force_recv) = unbounded();

        Self {
            pipeline: PhysicsPipeline::new(),
            integration_parameters,
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            gravity: Vector::new(gravity.x, gravity.y, gravity.z),
            event_collector: ChannelEventCollector::new(collision_send, contact_force_send),
            collision_events: collision_recv,
            handles: HashMap::new(),
            collider_owners: HashMap::new(),
            joints: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Advance the world by exactly one fixed step.
    pub fn step(&mut self) {
        self.pipeline.step(
            self.gravity,
            &self.integration_parameters,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            &(),
            &self.event_collector,
        );

        // Forces are one-tick inputs, not persistent actuators.
        for (_, body) in self.bodies.iter_mut() {
            body.reset_forces(false);
            body.reset_torques(false);
        }
    }

    pub fn spawn_body(&mut self, desc: &BodyDescriptor) -> Result<(), PhysicsError> {
        if self.handles.contains_key(&desc.id) {
            return Err(PhysicsError::DuplicateBody(desc.id.clone()));
        }

        let builder = match desc.motion_type {
            MotionType::Dynamic => RigidBodyBuilder::dynamic().ccd_enabled(true),
            MotionType::Static => RigidBodyBuilder::fixed(),
            MotionType::KinematicPosition => RigidBodyBuilder::kinematic_position_based(),
        };

        let rot = Rotation::from_xyzw(
            desc.orientation[0],
            desc.orientation[1],
            desc.orientation[2],
            desc.orientation[3],
        )
        .normalize();
        let pose = Pose::from_parts(
            Vector::new(desc.position[0], desc.position[1], desc.position[2]),
            rot,
        );

        let shape = self.build_shape(desc)?;
        let body = builder.position(pose).build();
        let handle = self.bodies.insert(body);

        let mut collider = ColliderBuilder::new(shape.clone())
            .friction(desc.friction)
            .restitution(desc.restitution)
            .sensor(desc.is_trigger)
            .active_events(ActiveEvents::COLLISION_EVENTS);

        collider = match desc.center_of_mass {
            Some(com) => {
                let mut props = shape.mass_properties(1.0);
                props.set_mass(desc.mass, true);
                props.local_com = Point::new(com[0], com[1], com[2]);
                collider.mass_properties(props)
            }
            None => collider.mass(desc.mass),
        };

        let collider_handle =
            self.colliders
                .insert_with_parent(collider, handle, &mut self.bodies);

        self.handles.insert(desc.id.clone(), handle);
        self.collider_owners.insert(collider_handle, desc.id.clone());
        self.order.push(desc.id.clone());

        Ok(())
    }

    fn build_shape(&self, desc: &BodyDescriptor) -> Result<SharedShape, PhysicsError> {
        let shape = match &desc.shape {
            Shape::Box { half_extents } => {
                SharedShape::cuboid(half_extents[0], half_extents[1], half_extents[2])
            }
            Shape::Sphere { radius } => SharedShape::ball(*radius),
            Shape::Capsule {
                half_height,
                radius,
            } => SharedShape::capsule_y(*half_height, *radius),
            Shape::Trimesh { vertices, indices } => {
                let points: Vec<Point> = vertices
                    .iter()
                    .map(|v| Point::new(v[0], v[1], v[2]))
                    .collect();
                SharedShape::trimesh(points, indices.clone()).map_err(|e| {
                    PhysicsError::InvalidShape {
                        id: desc.id.clone(),
                        reason: e.to_string(),
                    }
                })?
            }
        };
        Ok(shape)
    }

    pub fn remove_body(&mut self, id: &str) -> Result<(), PhysicsError> {
        let handle = self
            .handles
            .remove(id)
            .ok_or_else(|| PhysicsError::UnknownBody(id.to_owned()))?;

        self.collider_owners.retain(|_, owner| owner != id);
        self.joints.retain(|_, joint_handle| {
            let attached = self
                .impulse_joints
                .get(*joint_handle)
                .is_some_and(|j| j.body1 == handle || j.body2 == handle);
            !attached
        });
        self.order.retain(|existing| existing != id);

        self.bodies.remove(
            handle,
            &mut self.islands,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );

        Ok(())
    }

    pub fn add_constraint(&mut self, desc: &ConstraintDescriptor) -> Result<(), PhysicsError> {
        if self.joints.contains_key(desc.id()) {
            return Err(PhysicsError::DuplicateConstraint(desc.id().to_owned()));
        }
        let a = self.handle(desc.body_a())?;
        let b = self.handle(desc.body_b())?;

        let joint = build_joint(desc);
        let joint_handle = self.impulse_joints.insert(a, b, joint, true);
        self.joints.insert(desc.id().to_owned(), joint_handle);

        Ok(())
    }

    pub fn apply_action(&mut self, action: &InputAction) -> Result<(), PhysicsError> {
        match action {
            InputAction::ApplyImpulse { body_id, impulse } => {
                let body = self.body_mut(body_id)?;
                body.apply_impulse(Vector::new(impulse[0], impulse[1], impulse[2]), true);
            }
            InputAction::ApplyForce { body_id, force } => {
                let body = self.body_mut(body_id)?;
                body.add_force(Vector::new(force[0], force[1], force[2]), true);
            }
            InputAction::SetVelocity {
                body_id,
                linear,
                angular,
            } => {
                let body = self.body_mut(body_id)?;
                if let Some(v) = linear {
                    body.set_linvel(Vector::new(v[0], v[1], v[2]), true);
                }
                if let Some(v) = angular {
                    body.set_angvel(Vector::new(v[0], v[1], v[2]), true);
                }
            }
            InputAction::SetPose {
                body_id,
                position,
                orientation,
            } => {
                let body = self.body_mut(body_id)?;
                let current = *body.position();
                let translation = match position {
                    Some(p) => Vector::new(p[0], p[1], p[2]),
                    None => current.translation,
                };
                let rotation = match orientation {
                    Some(q) => Rotation::from_xyzw(q[0], q[1], q[2], q[3]).normalize(),
                    None => current.rotation,
                };
                let pose = Pose::from_parts(translation, rotation);
                if body.is_kinematic() {
                    body.set_next_kinematic_position(pose);
                } else {
                    body.set_position(pose, true);
                }
            }
        }
        Ok(())
    }

    /// Classified collision events accumulated since the last step.
    pub fn drain_events(&mut self) -> Vec<CollisionEvent> {
        let mut events = Vec::new();

        while let Ok(event) = self.collision_events.try_recv() {
            let (c1, c2, started) = match event {
                rapier3d::geometry::CollisionEvent::Started(c1, c2, _) => (c1, c2, true),
                rapier3d::geometry::CollisionEvent::Stopped(c1, c2, _) => (c1, c2, false),
            };

            // Colliders removed mid-tick can still produce a stopped
            // event; without an owning body there is nothing to report.
            let (Some(body_a), Some(body_b)) = (
                self.collider_owners.get(&c1).cloned(),
                self.collider_owners.get(&c2).cloned(),
            ) else {
                continue;
            };

            let sensor = self.colliders.get(c1).is_some_and(|c| c.is_sensor())
                || self.colliders.get(c2).is_some_and(|c| c.is_sensor());

            let kind = match (sensor, started) {
                (true, true) => CollisionKind::TriggerEntered,
                (true, false) => CollisionKind::TriggerExited,
                (false, true) => CollisionKind::CollisionStarted,
                (false, false) => CollisionKind::CollisionFinished,
            };

            let mut point = None;
            let mut normal = None;
            let mut impulse = None;
            if started && !sensor {
                if let Some(pair) = self.narrow_phase.contact_pair(c1, c2) {
                    if let Some(manifold) = pair.manifolds.first() {
                        normal = Some([
                            manifold.local_n1.x,
                            manifold.local_n1.y,
                            manifold.local_n1.z,
                        ]);
                        if let Some(contact) = manifold.points.first() {
                            point = Some([
                                contact.local_p1.x,
                                contact.local_p1.y,
                                contact.local_p1.z,
                            ]);
                            impulse = Some(contact.data.impulse);
                        }
                    }
                }
            }

            events.push(CollisionEvent {
                kind,
                body_a,
                body_b,
                point,
                normal,
                impulse,
            });
        }

        events
    }

    pub fn body_state(&self, id: &str) -> Option<BodyState> {
        let handle = *self.handles.get(id)?;
        let body = self.bodies.get(handle)?;

        let t = body.translation();
        let r = *body.rotation();
        let lv = body.linvel();
        let av = body.angvel();

        Some(BodyState {
            position: [t.x, t.y, t.z],
            orientation: [r.x, r.y, r.z, r.w],
            linear_velocity: [lv.x, lv.y, lv.z],
            angular_velocity: [av.x, av.y, av.z],
        })
    }

    pub fn is_sleeping(&self, id: &str) -> bool {
        self.handles
            .get(id)
            .and_then(|h| self.bodies.get(*h))
            .is_some_and(|b| b.is_sleeping())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.handles.contains_key(id)
    }

    pub fn body_count(&self) -> usize {
        self.handles.len()
    }

    /// Live body ids in spawn order.
    pub fn body_ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    fn handle(&self, id: &str) -> Result<RigidBodyHandle, PhysicsError> {
        self.handles
            .get(id)
            .copied()
            .ok_or_else(|| PhysicsError::UnknownBody(id.to_owned()))
    }

    fn body_mut(&mut self, id: &str) -> Result<&mut RigidBody, PhysicsError> {
        let handle = self.handle(id)?;
        self.bodies
            .get_mut(handle)
            .ok_or_else(|| PhysicsError::UnknownBody(id.to_owned()))
    }
}

fn build_joint(desc: &ConstraintDescriptor) -> GenericJoint {
    let joint = match desc {
        ConstraintDescriptor::BallAndSocket {
            pivot_a, pivot_b, ..
        } => SphericalJointBuilder::new()
            .local_anchor1(point(*pivot_a))
            .local_anchor2(point(*pivot_b))
            .build()
            .into(),
        ConstraintDescriptor::Hinge {
            pivot_a,
            pivot_b,
            axis,
            ..
        } => RevoluteJointBuilder::new(axis_vector(*axis))
            .local_anchor1(point(*pivot_a))
            .local_anchor2(point(*pivot_b))
            .build()
            .into(),
        ConstraintDescriptor::Distance {
            pivot_a,
            pivot_b,
            max_distance,
            ..
        } => RopeJointBuilder::new(*max_distance)
            .local_anchor1(point(*pivot_a))
            .local_anchor2(point(*pivot_b))
            .build()
            .into(),
        ConstraintDescriptor::Prismatic {
            pivot_a,
            pivot_b,
            axis,
            ..
        }
        | ConstraintDescriptor::Slider {
            pivot_a,
            pivot_b,
            axis,
            ..
        } => PrismaticJointBuilder::new(axis_vector(*axis))
            .local_anchor1(point(*pivot_a))
            .local_anchor2(point(*pivot_b))
            .build()
            .into(),
        ConstraintDescriptor::Lock {
            pivot_a,
            pivot_b,
            axis,
            perp_axis,
            ..
        } => {
            let rotation = frame_rotation(*axis, *perp_axis);
            FixedJointBuilder::new()
                .local_frame1(Pose::from_parts(vector(*pivot_a), rotation))
                .local_frame2(Pose::from_parts(vector(*pivot_b), rotation))
                .build()
                .into()
        }
        ConstraintDescriptor::Spring {
            pivot_a,
            pivot_b,
            max_distance,
            stiffness,
            damping,
            ..
        } => SpringJointBuilder::new(*max_distance, *stiffness, *damping)
            .local_anchor1(point(*pivot_a))
            .local_anchor2(point(*pivot_b))
            .build()
            .into(),
        ConstraintDescriptor::SixDof {
            pivot_a,
            pivot_b,
            axis,
            limits,
            ..
        } => build_six_dof(*pivot_a, *pivot_b, *axis, limits),
    };

    let mut joint: GenericJoint = joint;
    joint.set_contacts_enabled(desc.contacts_enabled());
    joint
}

fn build_six_dof(
    pivot_a: [f32; 3],
    pivot_b: [f32; 3],
    axis: Option<[f32; 3]>,
    limits: &[physync::AxisLimit],
) -> GenericJoint {
    const AXES: [(JointAxesMask, JointAxis); 6] = [
        (JointAxesMask::LIN_X, JointAxis::LinX),
        (JointAxesMask::LIN_Y, JointAxis::LinY),
        (JointAxesMask::LIN_Z, JointAxis::LinZ),
        (JointAxesMask::ANG_X, JointAxis::AngX),
        (JointAxesMask::ANG_Y, JointAxis::AngY),
        (JointAxesMask::ANG_Z, JointAxis::AngZ),
    ];

    // An axis with no entry is locked; an entry without limits is
    // free; an entry with limits is constrained to the range.
    let mut locked = JointAxesMask::empty();
    for (index, (mask_bit, _)) in AXES.iter().enumerate() {
        if !limits.iter().any(|l| l.axis as usize == index) {
            locked |= *mask_bit;
        }
    }

    let mut builder = GenericJointBuilder::new(locked)
        .local_anchor1(point(pivot_a))
        .local_anchor2(point(pivot_b));

    if let Some(axis) = axis {
        let axis = axis_vector(axis);
        builder = builder.local_axis1(axis).local_axis2(axis);
    }

    for limit in limits {
        let Some((_, joint_axis)) = AXES.get(limit.axis as usize) else {
            continue;
        };
        if limit.min_limit.is_some() || limit.max_limit.is_some() {
            let min = limit.min_limit.unwrap_or(f32::NEG_INFINITY);
            let max = limit.max_limit.unwrap_or(f32::INFINITY);
            builder = builder.limits(*joint_axis, [min, max]);
        }
    }

    builder.build()
}

fn vector(v: [f32; 3]) -> Vector {
    Vector::new(v[0], v[1], v[2])
}

fn point(v: [f32; 3]) -> Point {
    Point::new(v[0], v[1], v[2])
}

fn axis_vector(v: [f32; 3]) -> Vector {
    vector(v).normalize()
}

fn frame_rotation(axis: Option<[f32; 3]>, perp: Option<[f32; 3]>) -> Rotation {
    let Some(axis) = axis else {
        return Rotation::IDENTITY;
    };
    let primary = Rotation::from_rotation_arc(Vector::X, axis_vector(axis));
    let Some(perp) = perp else {
        return primary;
    };
    let current_y = primary * Vector::Y;
    Rotation::from_rotation_arc(current_y, axis_vector(perp)) * primary
}

#[cfg(test)]
mod tests {
    use super::*;
    use physync::TICK_RATE;

    fn unit_cube(id: &str, y: f32) -> BodyDescriptor {
        BodyDescriptor::new(
            id,
            Shape::Box {
                half_extents: [0.5, 0.5, 0.5],
            },
        )
        .at([0.0, y, 0.0])
    }

    fn ground() -> BodyDescriptor {
        BodyDescriptor::new(
            "ground",
            Shape::Box {
                half_extents: [50.0, 0.5, 50.0],
            },
        )
        .with_motion_type(MotionType::Static)
        .at([0.0, -0.5, 0.0])
    }

    #[test]
    fn duplicate_body_is_rejected() {
        let mut world = PhysicsWorld::new(Vec3::new(0.0, -9.81, 0.0));
        world.spawn_body(&unit_cube("cube", 5.0)).unwrap();

        assert!(matches!(
            world.spawn_body(&unit_cube("cube", 5.0)),
            Err(PhysicsError::DuplicateBody(_))
        ));
        assert_eq!(world.body_count(), 1);
    }

    #[test]
    fn free_fall_reaches_the_floor() {
        let mut world = PhysicsWorld::new(Vec3::new(0.0, -9.81, 0.0));
        world.spawn_body(&unit_cube("cube", 10.0)).unwrap();
        world.spawn_body(&ground()).unwrap();

        let mut saw_contact_start = false;
        for _ in 0..TICK_RATE {
            world.step();
            for event in world.drain_events() {
                if event.kind == CollisionKind::CollisionStarted {
                    let pair = (event.body_a.as_str(), event.body_b.as_str());
                    if pair == ("cube", "ground") || pair == ("ground", "cube") {
                        saw_contact_start = true;
                        assert!(event.point.is_some());
                        assert!(event.normal.is_some());
                    }
                }
            }
        }

        let state = world.body_state("cube").unwrap();
        assert!(state.position[1] < 10.0);
        assert!(saw_contact_start);
    }

    #[test]
    fn static_bodies_hold_their_pose() {
        let mut world = PhysicsWorld::new(Vec3::new(0.0, -9.81, 0.0));
        world.spawn_body(&ground()).unwrap();

        for _ in 0..30 {
            world.step();
        }

        let state = world.body_state("ground").unwrap();
        assert_eq!(state.position, [0.0, -0.5, 0.0]);
        assert_eq!(state.linear_velocity, [0.0; 3]);
    }

    #[test]
    fn impulse_shows_up_in_velocity() {
        let mut world = PhysicsWorld::new(Vec3::ZERO);
        world.spawn_body(&unit_cube("box", 0.0)).unwrap();

        world
            .apply_action(&InputAction::ApplyImpulse {
                body_id: "box".into(),
                impulse: [20.0, 0.0, 0.0],
            })
            .unwrap();
        world.step();

        let state = world.body_state("box").unwrap();
        assert!(state.linear_velocity[0] > 0.0);
    }

    #[test]
    fn trigger_produces_sensor_events_without_contact_data() {
        let mut world = PhysicsWorld::new(Vec3::new(0.0, -9.81, 0.0));
        world.spawn_body(&unit_cube("ball", 3.0)).unwrap();

        let mut zone = BodyDescriptor::new(
            "zone",
            Shape::Box {
                half_extents: [2.0, 2.0, 2.0],
            },
        )
        .with_motion_type(MotionType::Static)
        .at([0.0, 0.0, 0.0]);
        zone.is_trigger = true;
        world.spawn_body(&zone).unwrap();

        let mut entered = false;
        for _ in 0..TICK_RATE {
            world.step();
            for event in world.drain_events() {
                if event.kind == CollisionKind::TriggerEntered {
                    entered = true;
                    assert!(event.point.is_none());
                    assert!(event.impulse.is_none());
                }
            }
        }
        assert!(entered);
    }

    #[test]
    fn constraint_requires_known_bodies() {
        let mut world = PhysicsWorld::new(Vec3::ZERO);
        world.spawn_body(&unit_cube("a", 0.0)).unwrap();

        let desc = ConstraintDescriptor::BallAndSocket {
            id: "j".into(),
            body_a: "a".into(),
            body_b: "missing".into(),
            pivot_a: [0.0; 3],
            pivot_b: [0.0; 3],
            collision: true,
        };

        assert!(matches!(
            world.add_constraint(&desc),
            Err(PhysicsError::UnknownBody(_))
        ));
    }

    #[test]
    fn distance_joint_limits_separation() {
        let mut world = PhysicsWorld::new(Vec3::new(0.0, -9.81, 0.0));
        world
            .spawn_body(&unit_cube("anchor", 10.0).with_motion_type(MotionType::Static))
            .unwrap();
        world.spawn_body(&unit_cube("weight", 9.0)).unwrap();

        world
            .add_constraint(&ConstraintDescriptor::Distance {
                id: "rope".into(),
                body_a: "anchor".into(),
                body_b: "weight".into(),
                pivot_a: [0.0; 3],
                pivot_b: [0.0; 3],
                max_distance: 2.0,
                collision: false,
            })
            .unwrap();

        for _ in 0..(TICK_RATE * 2) {
            world.step();
        }

        let anchor = world.body_state("anchor").unwrap().position_vec();
        let weight = world.body_state("weight").unwrap().position_vec();
        assert!(anchor.distance(weight) < 2.5);
    }

    #[test]
    fn removal_forgets_the_body() {
        let mut world = PhysicsWorld::new(Vec3::ZERO);
        world.spawn_body(&unit_cube("a", 0.0)).unwrap();
        world.spawn_body(&unit_cube("b", 2.0)).unwrap();

        world.remove_body("a").unwrap();

        assert!(!world.contains("a"));
        assert!(world.body_state("a").is_none());
        assert_eq!(world.body_ids().collect::<Vec<_>>(), vec!["b"]);
        assert!(matches!(
            world.remove_body("a"),
            Err(PhysicsError::UnknownBody(_))
        ));
    }
}
