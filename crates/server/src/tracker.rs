//! Field-level change detection between broadcasts, plus the stable
//! numeric index table that keeps delta frames compact.

use std::collections::HashMap;

use physync::{
    BodyEntry, BodyRef, BodySnapshot, BodyState, FieldMask, RoomSnapshot, DELTA_EPSILON,
};

use crate::physics::PhysicsWorld;

#[derive(Debug, Default)]
pub struct StateTracker {
    last_broadcast: HashMap<String, BodyState>,
    id_to_index: HashMap<String, u16>,
    index_to_id: HashMap<u16, String>,
    next_index: u16,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index for `id`, allocating on first sight. Indices are never
    /// reused, even after the body is removed, so a client that has
    /// not yet seen a removal can never misread a delta entry.
    pub fn ensure_index(&mut self, id: &str) -> u16 {
        if let Some(&index) = self.id_to_index.get(id) {
            return index;
        }
        let index = self.next_index;
        self.next_index += 1;
        self.id_to_index.insert(id.to_owned(), index);
        self.index_to_id.insert(index, id.to_owned());
        index
    }

    pub fn index_of(&self, id: &str) -> Option<u16> {
        self.id_to_index.get(id).copied()
    }

    pub fn id_map(&self) -> HashMap<String, u16> {
        self.id_to_index.clone()
    }

    /// Every live body, unconditionally. Used for join and reset.
    pub fn snapshot(&mut self, world: &PhysicsWorld, tick: u32, timestamp_ms: f64) -> RoomSnapshot {
        let ids: Vec<String> = world.body_ids().map(str::to_owned).collect();
        let mut bodies = Vec::with_capacity(ids.len());

        for id in ids {
            let Some(state) = world.body_state(&id) else {
                continue;
            };
            let index = self.ensure_index(&id);
            bodies.push(BodySnapshot { id, index, state });
        }

        RoomSnapshot {
            tick,
            timestamp_ms,
            bodies,
        }
    }

    /// Bodies whose tracked fields changed since the last broadcast,
    /// each with the mask of fields that moved. First-sight bodies
    /// come through with the full mask; sleeping bodies are elided.
    pub fn delta(&mut self, world: &PhysicsWorld) -> Vec<BodyEntry> {
        let ids: Vec<String> = world.body_ids().map(str::to_owned).collect();
        let mut entries = Vec::new();
        let mut current: HashMap<String, BodyState> = HashMap::with_capacity(ids.len());

        for id in &ids {
            let Some(state) = world.body_state(id) else {
                continue;
            };
            let index = self.ensure_index(id);

            match self.last_broadcast.get(id) {
                None => {
                    entries.push(BodyEntry {
                        body: BodyRef::Index(index),
                        mask: FieldMask::ALL,
                        state,
                    });
                }
                Some(previous) => {
                    if !world.is_sleeping(id) {
                        let mask = diff_mask(previous, &state);
                        if !mask.is_empty() {
                            entries.push(BodyEntry {
                                body: BodyRef::Index(index),
                                mask,
                                state,
                            });
                        }
                    }
                }
            }

            current.insert(id.clone(), state);
        }

        // Refresh the cache for every live body, sleepers included,
        // and forget ids that left the world. A body that wakes later
        // diffs against its latest pose, not its pre-sleep one.
        self.last_broadcast = current;

        entries
    }

    /// Drop the broadcast cache entry for a removed body. The index
    /// mapping is deliberately retained.
    pub fn forget_body(&mut self, id: &str) {
        self.last_broadcast.remove(id);
    }

    pub fn clear(&mut self) {
        self.last_broadcast.clear();
        self.id_to_index.clear();
        self.index_to_id.clear();
        self.next_index = 0;
    }
}

fn diff_mask(previous: &BodyState, current: &BodyState) -> FieldMask {
    let mut mask = FieldMask::default();
    if exceeds3(&previous.position, &current.position) {
        mask.insert(FieldMask::POSITION);
    }
    if exceeds4(&previous.orientation, &current.orientation) {
        mask.insert(FieldMask::ROTATION);
    }
    if exceeds3(&previous.linear_velocity, &current.linear_velocity) {
        mask.insert(FieldMask::LINEAR_VELOCITY);
    }
    if exceeds3(&previous.angular_velocity, &current.angular_velocity) {
        mask.insert(FieldMask::ANGULAR_VELOCITY);
    }
    mask
}

fn exceeds3(a: &[f32; 3], b: &[f32; 3]) -> bool {
    a.iter().zip(b).any(|(x, y)| (x - y).abs() > DELTA_EPSILON)
}

fn exceeds4(a: &[f32; 4], b: &[f32; 4]) -> bool {
    a.iter().zip(b).any(|(x, y)| (x - y).abs() > DELTA_EPSILON)
}
