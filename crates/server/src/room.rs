use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use glam::Vec3;
use log::{debug, error, info, warn};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;

use physync::{
    codec, wall_clock_ms, BodyDescriptor, CollisionEvent, ConstraintDescriptor, Frame, InputBatch,
    Message, RoomSnapshot, StateFrame, BROADCAST_INTERVAL_TICKS, MAX_INPUT_BUFFER, TICK_DT,
};

use crate::config::InputSchedule;
use crate::input_buffer::InputBuffer;
use crate::physics::{PhysicsError, PhysicsWorld};
use crate::sim::SimulationClock;
use crate::tracker::StateTracker;

const DEFAULT_GRAVITY: [f32; 3] = [0.0, -9.81, 0.0];

/// Bytes queued here are already encoded frames; the connection's
/// writer task owns the actual socket.
pub type Outbox = UnboundedSender<Vec<u8>>;

#[derive(Debug, Clone)]
pub struct RoomClient {
    pub id: String,
    pub outbox: Outbox,
}

/// One room: a physics world, its clients, their input buffers and
/// the delta tracker. Ticks and message handling are serialized by
/// the room mutex, so nothing in here needs further locking.
pub struct Room {
    id: String,
    physics: PhysicsWorld,
    gravity: Vec3,
    clients: Vec<RoomClient>,
    inputs: HashMap<String, InputBuffer>,
    tick: u32,
    ticks_since_broadcast: u32,
    pending_events: Vec<CollisionEvent>,
    initial_bodies: Vec<BodyDescriptor>,
    initial_constraints: Vec<ConstraintDescriptor>,
    tracker: StateTracker,
    clock: SimulationClock,
    input_schedule: InputSchedule,
    running: Arc<AtomicBool>,
}

impl Room {
    pub fn new(
        id: String,
        initial_bodies: Vec<BodyDescriptor>,
        gravity: Option<[f32; 3]>,
        initial_constraints: Vec<ConstraintDescriptor>,
        input_schedule: InputSchedule,
    ) -> Result<Self, PhysicsError> {
        let gravity = Vec3::from(gravity.unwrap_or(DEFAULT_GRAVITY));
        let physics = build_world(gravity, &initial_bodies, &initial_constraints)?;

        Ok(Self {
            id,
            physics,
            gravity,
            clients: Vec::new(),
            inputs: HashMap::new(),
            tick: 0,
            ticks_since_broadcast: 0,
            pending_events: Vec::new(),
            initial_bodies,
            initial_constraints,
            tracker: StateTracker::new(),
            clock: SimulationClock::new(),
            input_schedule,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tick_count(&self) -> u32 {
        self.tick
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Join data for `room_joined`: full snapshot, running flag and
    /// the current id to index table.
    pub fn join(&mut self, client: RoomClient) -> (RoomSnapshot, bool, HashMap<String, u16>) {
        let snapshot = self
            .tracker
            .snapshot(&self.physics, self.tick, wall_clock_ms());
        let id_map = self.tracker.id_map();
        let running = self.is_running();

        self.inputs.insert(client.id.clone(), InputBuffer::new());
        self.clients.retain(|c| c.id != client.id);
        self.clients.push(client);

        (snapshot, running, id_map)
    }

    /// Remove a client; stops the simulation loop when the room
    /// empties out.
    pub fn leave(&mut self, client_id: &str) {
        self.clients.retain(|c| c.id != client_id);
        self.inputs.remove(client_id);

        if self.clients.is_empty() && self.is_running() {
            info!("room '{}': last client left, stopping loop", self.id);
            self.stop_loop();
        }
    }

    pub fn buffer_input(&mut self, client_id: &str, batch: InputBatch) {
        let target_tick = match self.input_schedule {
            InputSchedule::Immediate => self.tick,
            // Honor the client's tick estimate, but never schedule
            // into the past or unreasonably far ahead.
            InputSchedule::ClientTick => batch
                .tick
                .clamp(self.tick, self.tick.saturating_add(MAX_INPUT_BUFFER)),
        };

        if let Some(buffer) = self.inputs.get_mut(client_id) {
            buffer.add(target_tick, batch);
        }
    }

    pub fn add_body(&mut self, desc: &BodyDescriptor) -> Result<u16, PhysicsError> {
        self.physics.spawn_body(desc)?;
        let index = self.tracker.ensure_index(&desc.id);

        self.broadcast_message(&Message::AddBody {
            body: desc.clone(),
            body_index: Some(index),
        });

        Ok(index)
    }

    pub fn remove_body(&mut self, body_id: &str) -> Result<(), PhysicsError> {
        self.physics.remove_body(body_id)?;
        self.tracker.forget_body(body_id);

        self.broadcast_message(&Message::RemoveBody {
            body_id: body_id.to_owned(),
        });

        Ok(())
    }

    /// Rebuild the world from the initial descriptors and drop every
    /// piece of accumulated per-run state. The caller restarts the
    /// loop afterwards.
    pub fn reset(&mut self) -> Result<(), PhysicsError> {
        self.physics = build_world(self.gravity, &self.initial_bodies, &self.initial_constraints)?;
        self.tick = 0;
        self.ticks_since_broadcast = 0;
        self.pending_events.clear();
        self.tracker.clear();
        for buffer in self.inputs.values_mut() {
            buffer.clear();
        }

        let snapshot = self.tracker.snapshot(&self.physics, 0, wall_clock_ms());
        let id_map = self.tracker.id_map();
        self.broadcast_message(&Message::SimulationStarted {
            snapshot,
            body_id_map: id_map,
        });

        Ok(())
    }

    /// Relay an application event to everyone but the sender.
    pub fn relay_body_event(&self, sender_id: &str, message: &Message) {
        match codec::encode_message(message) {
            Ok(bytes) => {
                for client in self.clients.iter().filter(|c| c.id != sender_id) {
                    let _ = client.outbox.send(bytes.clone());
                }
            }
            Err(e) => error!("room '{}': failed to encode relay: {e}", self.id),
        }
    }

    /// Fold elapsed wall-clock time into the accumulator and run all
    /// due ticks. Called from the loop task roughly ten times per Δ.
    pub fn pump(&mut self) {
        self.clock.advance();
        while self.clock.consume_tick() {
            self.run_tick();
        }
    }

    fn run_tick(&mut self) {
        // 1. Drain and apply inputs scheduled for this tick.
        let client_ids: Vec<String> = self.inputs.keys().cloned().collect();
        for client_id in client_ids {
            let batches = self
                .inputs
                .get_mut(&client_id)
                .map(|b| b.take(self.tick))
                .unwrap_or_default();
            for batch in batches {
                for action in &batch.actions {
                    if let Err(e) = self.physics.apply_action(action) {
                        debug!(
                            "room '{}': dropping input from {client_id}: {e}",
                            self.id
                        );
                    }
                }
            }
        }

        // 2. Step by exactly one Δ, then 3. collect collision events.
        self.physics.step();
        self.pending_events.extend(self.physics.drain_events());

        // 4. Counters.
        self.tick = self.tick.wrapping_add(1);
        self.ticks_since_broadcast += 1;

        // 5. Broadcast on cadence.
        if self.ticks_since_broadcast >= BROADCAST_INTERVAL_TICKS {
            self.broadcast_state();
            self.ticks_since_broadcast = 0;
        }
    }

    fn broadcast_state(&mut self) {
        let bodies = self.tracker.delta(&self.physics);

        if !bodies.is_empty() {
            let frame = Frame::State(StateFrame {
                tick: self.tick,
                timestamp_ms: wall_clock_ms(),
                is_delta: true,
                bodies,
            });
            match codec::encode(&frame) {
                Ok(bytes) => self.broadcast_bytes(&bytes),
                Err(e) => error!("room '{}': failed to encode state frame: {e}", self.id),
            }
        }

        if !self.pending_events.is_empty() {
            let events = std::mem::take(&mut self.pending_events);
            self.broadcast_message(&Message::CollisionEvents {
                tick: self.tick,
                events,
            });
        }
    }

    pub fn broadcast_message(&self, message: &Message) {
        match codec::encode_message(message) {
            Ok(bytes) => self.broadcast_bytes(&bytes),
            Err(e) => error!("room '{}': failed to encode message: {e}", self.id),
        }
    }

    fn broadcast_bytes(&self, bytes: &[u8]) {
        for client in &self.clients {
            // A closed outbox means the connection is going away; the
            // disconnect path cleans the client up.
            if client.outbox.send(bytes.to_vec()).is_err() {
                warn!(
                    "room '{}': dropping frame for dead client {}",
                    self.id, client.id
                );
            }
        }
    }

    /// Spawn the wall-clock loop task for this room. Idempotent: a
    /// second start while running is a no-op. Each start gets its own
    /// flag so a stopped loop's task can never be revived by a
    /// stop/start pair racing its next wake-up.
    pub fn start_loop(&mut self, room: Arc<Mutex<Room>>) {
        if self.running.load(Ordering::SeqCst) {
            return;
        }
        let running = Arc::new(AtomicBool::new(true));
        self.running = Arc::clone(&running);
        self.clock.reset();

        let room_id = self.id.clone();
        tokio::spawn(async move {
            // Waking well inside one Δ spreads catch-up work evenly.
            let mut interval = tokio::time::interval(Duration::from_secs_f64(TICK_DT as f64 / 10.0));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            debug!("room '{room_id}': simulation loop started");
            loop {
                interval.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                room.lock().await.pump();
            }
            debug!("room '{room_id}': simulation loop stopped");
        });
    }

    /// Stop the loop task. Safe to call repeatedly.
    pub fn stop_loop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for Room {
    fn drop(&mut self) {
        self.stop_loop();
    }
}

fn build_world(
    gravity: Vec3,
    bodies: &[BodyDescriptor],
    constraints: &[ConstraintDescriptor],
) -> Result<PhysicsWorld, PhysicsError> {
    let mut world = PhysicsWorld::new(gravity);
    for desc in bodies {
        world.spawn_body(desc)?;
    }
    for desc in constraints {
        world.add_constraint(desc)?;
    }
    Ok(world)
}
