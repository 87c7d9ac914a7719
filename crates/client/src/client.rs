//! The sync facade: one WebSocket connection, a reader task that
//! merges deltas into the full-state cache, timer tasks for clock
//! sync and input flushing, and async awaiters for the
//! request/response verbs.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use physync::{
    codec, wall_clock_ms, BodyDescriptor, BodyEntry, BodyRef, BodyState, ClockStats,
    CollisionEvent, ConstraintDescriptor, FieldMask, Frame, InputAction, Message, RoomSnapshot,
    CLOCK_SYNC_INTERVAL_SECS, INPUT_SEND_RATE,
};

use crate::input::InputManager;
use crate::reconcile::Reconciler;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection closed")]
    Closed,
    #[error("server rejected request: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TrafficStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

#[derive(Debug, Clone)]
pub struct JoinInfo {
    pub room_id: String,
    pub client_id: String,
    pub simulation_running: bool,
    pub snapshot: RoomSnapshot,
}

/// Everything the connection pushes at the application.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    RoomJoined {
        room_id: String,
        client_id: String,
        simulation_running: bool,
    },
    /// Merged, complete states for every body carried by the last
    /// frame, plus the authoritative corrections for local bodies.
    State {
        tick: u32,
        timestamp_ms: f64,
        bodies: Vec<(String, BodyState)>,
        local_corrections: Vec<(String, BodyState)>,
    },
    SimulationStarted {
        snapshot: RoomSnapshot,
    },
    BodyAdded {
        body: Box<BodyDescriptor>,
        body_index: Option<u16>,
    },
    BodyRemoved {
        body_id: String,
    },
    CollisionEvents {
        tick: u32,
        events: Vec<CollisionEvent>,
    },
    BodyEvent {
        body_id: String,
        event_type: String,
        data: Option<serde_json::Value>,
    },
    ServerError {
        message: String,
    },
    Disconnected,
}

enum Pending {
    Create(oneshot::Sender<Result<String, ClientError>>),
    Join(oneshot::Sender<Result<JoinInfo, ClientError>>),
}

struct Shared {
    outbox: UnboundedSender<Vec<u8>>,
    full_state: HashMap<String, BodyState>,
    id_to_index: HashMap<String, u16>,
    index_to_id: HashMap<u16, String>,
    reconciler: Reconciler,
    input: InputManager,
    clock: ClockStats,
    stats: TrafficStats,
    room_id: Option<String>,
    client_id: Option<String>,
    pending: VecDeque<Pending>,
}

impl Shared {
    fn send_message(&mut self, message: &Message) {
        match codec::encode_message(message) {
            Ok(bytes) => {
                self.stats.frames_sent += 1;
                self.stats.bytes_sent += bytes.len() as u64;
                let _ = self.outbox.send(bytes);
            }
            Err(e) => warn!("failed to encode outbound message: {e}"),
        }
    }

    fn install_id_map(&mut self, map: HashMap<String, u16>) {
        self.index_to_id = map.iter().map(|(id, &i)| (i, id.clone())).collect();
        self.id_to_index = map;
    }

    fn rebuild_full_state(&mut self, snapshot: &RoomSnapshot) {
        self.full_state = snapshot
            .bodies
            .iter()
            .map(|b| (b.id.clone(), b.state))
            .collect();
    }

    fn reject_all_pending(&mut self) {
        while let Some(pending) = self.pending.pop_front() {
            match pending {
                Pending::Create(tx) => {
                    let _ = tx.send(Err(ClientError::Closed));
                }
                Pending::Join(tx) => {
                    let _ = tx.send(Err(ClientError::Closed));
                }
            }
        }
    }
}

pub struct SyncClient {
    shared: Arc<Mutex<Shared>>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncClient {
    /// Connect and spin up the reader, clock-sync and input tasks.
    /// Returns the facade plus the event stream.
    pub async fn connect(
        url: &str,
    ) -> Result<(Self, UnboundedReceiver<SyncEvent>), ClientError> {
        let (ws, _) = connect_async(url).await?;
        let (mut sink, mut stream) = ws.split();

        let (outbox, mut outbox_rx) = unbounded_channel::<Vec<u8>>();
        let (events_tx, events_rx) = unbounded_channel::<SyncEvent>();

        let shared = Arc::new(Mutex::new(Shared {
            outbox,
            full_state: HashMap::new(),
            id_to_index: HashMap::new(),
            index_to_id: HashMap::new(),
            reconciler: Reconciler::new(),
            input: InputManager::new(),
            clock: ClockStats::new(),
            stats: TrafficStats::default(),
            room_id: None,
            client_id: None,
            pending: VecDeque::new(),
        }));

        let writer = tokio::spawn(async move {
            while let Some(bytes) = outbox_rx.recv().await {
                if sink.send(WsMessage::Binary(bytes)).await.is_err() {
                    break;
                }
            }
        });

        let reader_shared = Arc::clone(&shared);
        let reader_events = events_tx.clone();
        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let message = match message {
                    Ok(m) => m,
                    Err(e) => {
                        debug!("read failed: {e}");
                        break;
                    }
                };
                match message {
                    WsMessage::Binary(data) => {
                        handle_frame(&reader_shared, &reader_events, &data).await;
                    }
                    WsMessage::Text(text) => {
                        handle_frame(&reader_shared, &reader_events, text.as_bytes()).await;
                    }
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }

            reader_shared.lock().await.reject_all_pending();
            let _ = reader_events.send(SyncEvent::Disconnected);
        });

        let clock_shared = Arc::clone(&shared);
        let clock_task = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(CLOCK_SYNC_INTERVAL_SECS));
            loop {
                interval.tick().await;
                clock_shared.lock().await.send_message(&Message::ClockSyncRequest {
                    client_timestamp: wall_clock_ms(),
                });
            }
        });

        let input_shared = Arc::clone(&shared);
        let input_task = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs_f64(1.0 / INPUT_SEND_RATE as f64));
            loop {
                interval.tick().await;
                let mut shared = input_shared.lock().await;
                let tick = shared.clock.server_tick(wall_clock_ms());
                if let Some(batch) = shared.input.flush(tick) {
                    shared.reconciler.record_input(batch.clone());
                    shared.send_message(&Message::ClientInput { input: batch });
                }
            }
        });

        Ok((
            Self {
                shared,
                tasks: vec![writer, reader, clock_task, input_task],
            },
            events_rx,
        ))
    }

    pub async fn create_room(
        &self,
        room_id: impl Into<String>,
        initial_bodies: Vec<BodyDescriptor>,
        gravity: Option<[f32; 3]>,
        initial_constraints: Vec<ConstraintDescriptor>,
    ) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut shared = self.shared.lock().await;
            shared.pending.push_back(Pending::Create(tx));
            shared.send_message(&Message::CreateRoom {
                room_id: room_id.into(),
                initial_bodies,
                gravity,
                initial_constraints,
            });
        }
        rx.await.map_err(|_| ClientError::Closed)?.map(|_| ())
    }

    pub async fn join_room(&self, room_id: impl Into<String>) -> Result<JoinInfo, ClientError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut shared = self.shared.lock().await;
            shared.pending.push_back(Pending::Join(tx));
            shared.send_message(&Message::JoinRoom {
                room_id: room_id.into(),
            });
        }
        rx.await.map_err(|_| ClientError::Closed)?
    }

    pub async fn leave_room(&self) {
        let mut shared = self.shared.lock().await;
        shared.room_id = None;
        shared.send_message(&Message::LeaveRoom);
    }

    pub async fn start_simulation(&self) {
        self.shared
            .lock()
            .await
            .send_message(&Message::StartSimulation);
    }

    pub async fn add_body(&self, body: BodyDescriptor) {
        self.shared
            .lock()
            .await
            .send_message(&Message::AddBody {
                body,
                body_index: None,
            });
    }

    pub async fn remove_body(&self, body_id: impl Into<String>) {
        self.shared.lock().await.send_message(&Message::RemoveBody {
            body_id: body_id.into(),
        });
    }

    pub async fn send_body_event(
        &self,
        body_id: impl Into<String>,
        event_type: impl Into<String>,
        data: Option<serde_json::Value>,
    ) {
        self.shared.lock().await.send_message(&Message::BodyEvent {
            body_id: body_id.into(),
            event_type: event_type.into(),
            data,
        });
    }

    /// Queue an action; the 60 Hz input task batches and sends it.
    pub async fn queue_action(&self, action: InputAction) {
        self.shared.lock().await.input.queue_action(action);
    }

    /// Mark a body as locally predicted: its server states arrive as
    /// corrections instead of being interpolated.
    pub async fn mark_local_body(&self, body_id: impl Into<String>) {
        self.shared.lock().await.reconciler.mark_local(body_id);
    }

    pub async fn unmark_local_body(&self, body_id: &str) {
        self.shared.lock().await.reconciler.unmark_local(body_id);
    }

    /// Last known complete state for one body.
    pub async fn body_state(&self, body_id: &str) -> Option<BodyState> {
        self.shared.lock().await.full_state.get(body_id).copied()
    }

    /// The whole full-state cache.
    pub async fn body_states(&self) -> Vec<(String, BodyState)> {
        self.shared
            .lock()
            .await
            .full_state
            .iter()
            .map(|(id, state)| (id.clone(), *state))
            .collect()
    }

    /// Interpolated remote-body states for rendering right now.
    pub async fn render_states(&self) -> Vec<(String, BodyState)> {
        self.shared
            .lock()
            .await
            .reconciler
            .sampled_states(wall_clock_ms())
    }

    pub async fn client_id(&self) -> Option<String> {
        self.shared.lock().await.client_id.clone()
    }

    pub async fn room_id(&self) -> Option<String> {
        self.shared.lock().await.room_id.clone()
    }

    pub async fn clock(&self) -> ClockStats {
        self.shared.lock().await.clock.clone()
    }

    pub async fn stats(&self) -> TrafficStats {
        self.shared.lock().await.stats
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn handle_frame(
    shared: &Arc<Mutex<Shared>>,
    events: &UnboundedSender<SyncEvent>,
    data: &[u8],
) {
    let mut shared = shared.lock().await;
    shared.stats.frames_received += 1;
    shared.stats.bytes_received += data.len() as u64;

    let frame = match codec::decode(data) {
        Ok(frame) => frame,
        // The merge-into-cache design tolerates skipped frames.
        Err(e) => {
            warn!("discarding undecodable frame: {e}");
            return;
        }
    };

    match frame {
        Frame::State(state) => {
            let mut bodies = Vec::with_capacity(state.bodies.len());
            for entry in &state.bodies {
                let Some(id) = resolve_body_id(&shared, entry) else {
                    debug!("state frame names an unknown body index, skipping entry");
                    continue;
                };
                let merged = merge_entry(shared.full_state.entry(id.clone()).or_default(), entry);
                bodies.push((id, merged));
            }

            let result = shared.reconciler.process_frame(
                state.tick,
                state.timestamp_ms,
                &bodies,
                wall_clock_ms(),
            );
            let _ = events.send(SyncEvent::State {
                tick: state.tick,
                timestamp_ms: state.timestamp_ms,
                bodies,
                local_corrections: result.local_corrections,
            });
        }
        Frame::Message(message) => handle_message(&mut shared, events, message),
    }
}

fn handle_message(shared: &mut Shared, events: &UnboundedSender<SyncEvent>, message: Message) {
    match message {
        Message::ClockSyncResponse {
            client_timestamp,
            server_timestamp,
        } => {
            let now = wall_clock_ms();
            let rtt = now - client_timestamp;
            let offset = server_timestamp - client_timestamp - rtt / 2.0;
            shared.clock.push_sample(rtt, offset);
        }

        Message::RoomCreated { room_id } => match shared.pending.pop_front() {
            Some(Pending::Create(tx)) => {
                let _ = tx.send(Ok(room_id));
            }
            Some(other) => {
                warn!("room_created did not match the oldest pending request");
                shared.pending.push_front(other);
            }
            None => debug!("unsolicited room_created for '{room_id}'"),
        },

        Message::RoomJoined {
            room_id,
            snapshot,
            client_id,
            simulation_running,
            body_id_map,
        } => {
            shared.install_id_map(body_id_map);
            shared.rebuild_full_state(&snapshot);
            shared.reconciler.reset();
            shared.room_id = Some(room_id.clone());
            shared.client_id = Some(client_id.clone());

            let info = JoinInfo {
                room_id: room_id.clone(),
                client_id: client_id.clone(),
                simulation_running,
                snapshot,
            };
            match shared.pending.pop_front() {
                Some(Pending::Join(tx)) => {
                    let _ = tx.send(Ok(info));
                }
                Some(other) => {
                    warn!("room_joined did not match the oldest pending request");
                    shared.pending.push_front(other);
                }
                None => debug!("unsolicited room_joined for '{room_id}'"),
            }
            let _ = events.send(SyncEvent::RoomJoined {
                room_id,
                client_id,
                simulation_running,
            });
        }

        Message::SimulationStarted {
            snapshot,
            body_id_map,
        } => {
            shared.install_id_map(body_id_map);
            shared.rebuild_full_state(&snapshot);
            shared.reconciler.reset();
            let _ = events.send(SyncEvent::SimulationStarted { snapshot });
        }

        Message::AddBody { body, body_index } => {
            shared
                .full_state
                .insert(body.id.clone(), body.initial_state());
            if let Some(index) = body_index {
                shared.id_to_index.insert(body.id.clone(), index);
                shared.index_to_id.insert(index, body.id.clone());
            }
            let _ = events.send(SyncEvent::BodyAdded {
                body: Box::new(body),
                body_index,
            });
        }

        Message::RemoveBody { body_id } => {
            shared.full_state.remove(&body_id);
            shared.reconciler.remove_body(&body_id);
            let _ = events.send(SyncEvent::BodyRemoved { body_id });
        }

        Message::CollisionEvents { tick, events: list } => {
            let _ = events.send(SyncEvent::CollisionEvents { tick, events: list });
        }

        Message::BodyEvent {
            body_id,
            event_type,
            data,
        } => {
            let _ = events.send(SyncEvent::BodyEvent {
                body_id,
                event_type,
                data,
            });
        }

        Message::Error { message } => {
            log::error!("server error: {message}");
            match shared.pending.pop_front() {
                Some(Pending::Create(tx)) => {
                    let _ = tx.send(Err(ClientError::Rejected(message)));
                }
                Some(Pending::Join(tx)) => {
                    let _ = tx.send(Err(ClientError::Rejected(message)));
                }
                None => {
                    let _ = events.send(SyncEvent::ServerError { message });
                }
            }
        }

        // Client-to-server verbs have no business arriving here.
        other => debug!("ignoring unexpected inbound message: {other:?}"),
    }
}

fn resolve_body_id(shared: &Shared, entry: &BodyEntry) -> Option<String> {
    match &entry.body {
        BodyRef::Index(index) => shared.index_to_id.get(index).cloned(),
        BodyRef::Name(name) => Some(name.clone()),
    }
}

/// Copy only the masked fields onto the cached state and return the
/// now-complete result.
fn merge_entry(cache: &mut BodyState, entry: &BodyEntry) -> BodyState {
    if entry.mask.contains(FieldMask::POSITION) {
        cache.position = entry.state.position;
    }
    if entry.mask.contains(FieldMask::ROTATION) {
        cache.orientation = entry.state.orientation;
    }
    if entry.mask.contains(FieldMask::LINEAR_VELOCITY) {
        cache.linear_velocity = entry.state.linear_velocity;
    }
    if entry.mask.contains(FieldMask::ANGULAR_VELOCITY) {
        cache.angular_velocity = entry.state.angular_velocity;
    }
    *cache
}
