//! Accept loop and per-connection dispatcher. Each connection gets a
//! reader loop (this module) and a writer task draining an unbounded
//! outbox, so a slow socket never stalls a room tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::sync::Mutex;
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};

use physync::{codec, wall_clock_ms, ClockStats, Frame, Message};

use crate::manager::RoomManager;
use crate::room::{Outbox, Room, RoomClient};

const INVALID_MESSAGE: &str = "Invalid message format";

pub struct Gateway {
    manager: Arc<RoomManager>,
    next_client_id: AtomicU64,
}

impl Gateway {
    pub fn new(manager: Arc<RoomManager>) -> Arc<Self> {
        Arc::new(Self {
            manager,
            next_client_id: AtomicU64::new(1),
        })
    }

    pub fn manager(&self) -> &Arc<RoomManager> {
        &self.manager
    }

    /// Accept connections until the listener is closed or the task is
    /// dropped.
    pub async fn listen(self: Arc<Self>, listener: TcpListener) {
        while let Ok((stream, addr)) = listener.accept().await {
            let gateway = Arc::clone(&self);
            tokio::spawn(async move {
                debug!("connection from {addr}");
                gateway.handle_connection(stream).await;
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream) {
        let ws = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!("websocket handshake failed: {e}");
                return;
            }
        };

        let client_id = format!("client-{}", self.next_client_id.fetch_add(1, Ordering::SeqCst));
        info!("{client_id} connected");

        let (mut sink, mut stream) = ws.split();
        let (outbox, mut outbox_rx): (Outbox, UnboundedReceiver<Vec<u8>>) = unbounded_channel();

        // Writer half: sends are fire-and-forget from the rooms'
        // perspective; a write failure just ends the task.
        let writer_id = client_id.clone();
        let writer = tokio::spawn(async move {
            while let Some(bytes) = outbox_rx.recv().await {
                if let Err(e) = sink.send(WsMessage::Binary(bytes)).await {
                    debug!("{writer_id}: write failed: {e}");
                    break;
                }
            }
        });

        let mut conn = Connection {
            client_id: client_id.clone(),
            outbox,
            room: None,
            clock: ClockStats::new(),
            frames_received: 0,
            bytes_received: 0,
        };

        while let Some(message) = stream.next().await {
            let message = match message {
                Ok(m) => m,
                Err(e) => {
                    debug!("{client_id}: read failed: {e}");
                    break;
                }
            };

            match message {
                WsMessage::Binary(data) => self.handle_frame(&mut conn, &data).await,
                // Older peers send plain JSON text frames.
                WsMessage::Text(text) => self.handle_frame(&mut conn, text.as_bytes()).await,
                WsMessage::Close(_) => break,
                _ => {}
            }
        }

        if let Some((_, room)) = conn.room.take() {
            room.lock().await.leave(&conn.client_id);
        }
        writer.abort();
        info!(
            "{client_id} disconnected ({} frames, {} bytes in, clock offset {:.1} ms)",
            conn.frames_received,
            conn.bytes_received,
            conn.clock.offset_ms()
        );
    }

    async fn handle_frame(&self, conn: &mut Connection, data: &[u8]) {
        conn.frames_received += 1;
        conn.bytes_received += data.len() as u64;

        let frame = match codec::decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("{}: undecodable frame: {e}", conn.client_id);
                conn.send(&Message::error(INVALID_MESSAGE));
                return;
            }
        };

        match frame {
            Frame::Message(message) => self.dispatch(conn, message).await,
            // Clients never send state frames.
            Frame::State(_) => conn.send(&Message::error(INVALID_MESSAGE)),
        }
    }

    async fn dispatch(&self, conn: &mut Connection, message: Message) {
        match message {
            Message::ClockSyncRequest { client_timestamp } => {
                let server_timestamp = wall_clock_ms();
                conn.clock.push_offset(server_timestamp - client_timestamp);
                conn.send(&Message::ClockSyncResponse {
                    client_timestamp,
                    server_timestamp,
                });
            }

            Message::CreateRoom {
                room_id,
                initial_bodies,
                gravity,
                initial_constraints,
            } => {
                let result = self
                    .manager
                    .create_room(room_id.clone(), initial_bodies, gravity, initial_constraints)
                    .await;
                match result {
                    Ok(()) => conn.send(&Message::RoomCreated { room_id }),
                    Err(e) => conn.send(&Message::error(e.to_string())),
                }
            }

            Message::JoinRoom { room_id } => {
                let room = match self.manager.room(&room_id).await {
                    Ok(room) => room,
                    Err(e) => {
                        conn.send(&Message::error(e.to_string()));
                        return;
                    }
                };

                // Joining while in another room implies leaving it.
                if let Some((_, previous)) = conn.room.take() {
                    previous.lock().await.leave(&conn.client_id);
                }

                let (snapshot, simulation_running, body_id_map) =
                    room.lock().await.join(RoomClient {
                        id: conn.client_id.clone(),
                        outbox: conn.outbox.clone(),
                    });

                conn.room = Some((room_id.clone(), room));
                conn.send(&Message::RoomJoined {
                    room_id,
                    snapshot,
                    client_id: conn.client_id.clone(),
                    simulation_running,
                    body_id_map,
                });
            }

            Message::LeaveRoom => {
                if let Some((room_id, room)) = conn.room.take() {
                    room.lock().await.leave(&conn.client_id);
                    debug!("{} left room '{room_id}'", conn.client_id);
                }
            }

            Message::ClientInput { input } => {
                // Ignored when the sender is not in a room.
                if let Some((_, room)) = &conn.room {
                    room.lock().await.buffer_input(&conn.client_id, input);
                }
            }

            Message::AddBody { body, .. } => match &conn.room {
                Some((_, room)) => {
                    if let Err(e) = room.lock().await.add_body(&body) {
                        conn.send(&Message::error(e.to_string()));
                    }
                }
                None => conn.send(&Message::error("Not in a room")),
            },

            Message::RemoveBody { body_id } => match &conn.room {
                Some((_, room)) => {
                    if let Err(e) = room.lock().await.remove_body(&body_id) {
                        conn.send(&Message::error(e.to_string()));
                    }
                }
                None => conn.send(&Message::error("Not in a room")),
            },

            Message::StartSimulation => match &conn.room {
                Some((_, room)) => {
                    let room = Arc::clone(room);
                    let mut guard = room.lock().await;
                    guard.stop_loop();
                    match guard.reset() {
                        Ok(()) => guard.start_loop(Arc::clone(&room)),
                        Err(e) => conn.send(&Message::error(e.to_string())),
                    }
                }
                None => conn.send(&Message::error("Not in a room")),
            },

            Message::BodyEvent { .. } => {
                if let Some((_, room)) = &conn.room {
                    room.lock().await.relay_body_event(&conn.client_id, &message);
                }
            }

            // Server-to-client verbs arriving inbound are a protocol
            // violation, not something to pass through quietly.
            Message::ClockSyncResponse { .. }
            | Message::RoomCreated { .. }
            | Message::RoomJoined { .. }
            | Message::SimulationStarted { .. }
            | Message::CollisionEvents { .. }
            | Message::Error { .. } => {
                warn!("{}: unexpected inbound verb", conn.client_id);
                conn.send(&Message::error(INVALID_MESSAGE));
            }
        }
    }
}

struct Connection {
    client_id: String,
    outbox: Outbox,
    room: Option<(String, Arc<Mutex<Room>>)>,
    clock: ClockStats,
    frames_received: u64,
    bytes_received: u64,
}

impl Connection {
    fn send(&self, message: &Message) {
        match codec::encode_message(message) {
            Ok(bytes) => {
                let _ = self.outbox.send(bytes);
            }
            Err(e) => warn!("{}: failed to encode reply: {e}", self.client_id),
        }
    }
}
