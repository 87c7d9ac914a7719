use std::collections::HashMap;
use std::sync::Arc;

use log::info;
use tokio::sync::Mutex;

use physync::{BodyDescriptor, ConstraintDescriptor};

use crate::config::InputSchedule;
use crate::physics::PhysicsError;
use crate::room::Room;

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("room '{0}' already exists")]
    DuplicateRoom(String),
    #[error("unknown room '{0}'")]
    UnknownRoom(String),
    #[error(transparent)]
    Physics(#[from] PhysicsError),
}

/// Registry of live rooms. Rooms are behind their own mutex so a
/// tick in one room never waits on another.
pub struct RoomManager {
    rooms: Mutex<HashMap<String, Arc<Mutex<Room>>>>,
    input_schedule: InputSchedule,
}

impl RoomManager {
    pub fn new(input_schedule: InputSchedule) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            input_schedule,
        }
    }

    pub async fn create_room(
        &self,
        room_id: String,
        initial_bodies: Vec<BodyDescriptor>,
        gravity: Option<[f32; 3]>,
        initial_constraints: Vec<ConstraintDescriptor>,
    ) -> Result<(), ManagerError> {
        let mut rooms = self.rooms.lock().await;
        if rooms.contains_key(&room_id) {
            return Err(ManagerError::DuplicateRoom(room_id));
        }

        let room = Room::new(
            room_id.clone(),
            initial_bodies,
            gravity,
            initial_constraints,
            self.input_schedule,
        )?;

        info!("created room '{room_id}'");
        rooms.insert(room_id, Arc::new(Mutex::new(room)));
        Ok(())
    }

    pub async fn room(&self, room_id: &str) -> Result<Arc<Mutex<Room>>, ManagerError> {
        self.rooms
            .lock()
            .await
            .get(room_id)
            .cloned()
            .ok_or_else(|| ManagerError::UnknownRoom(room_id.to_owned()))
    }

    pub async fn destroy_room(&self, room_id: &str) -> Result<(), ManagerError> {
        let room = self
            .rooms
            .lock()
            .await
            .remove(room_id)
            .ok_or_else(|| ManagerError::UnknownRoom(room_id.to_owned()))?;

        room.lock().await.stop_loop();
        info!("destroyed room '{room_id}'");
        Ok(())
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }

    /// Stop every room's loop; used on process shutdown.
    pub async fn shutdown(&self) {
        let rooms: Vec<Arc<Mutex<Room>>> = self.rooms.lock().await.values().cloned().collect();
        for room in rooms {
            room.lock().await.stop_loop();
        }
        self.rooms.lock().await.clear();
        info!("all rooms stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use physync::{BodyDescriptor, MotionType, Shape};

    fn floor() -> BodyDescriptor {
        BodyDescriptor::new(
            "floor",
            Shape::Box {
                half_extents: [10.0, 0.5, 10.0],
            },
        )
        .with_motion_type(MotionType::Static)
    }

    #[tokio::test]
    async fn duplicate_room_id_is_rejected() {
        let manager = RoomManager::new(InputSchedule::Immediate);

        manager
            .create_room("arena".into(), vec![floor()], None, Vec::new())
            .await
            .unwrap();

        let err = manager
            .create_room("arena".into(), Vec::new(), None, Vec::new())
            .await;
        assert!(matches!(err, Err(ManagerError::DuplicateRoom(_))));
        assert_eq!(manager.room_count().await, 1);
    }

    #[tokio::test]
    async fn unknown_room_lookup_fails() {
        let manager = RoomManager::new(InputSchedule::Immediate);
        assert!(matches!(
            manager.room("nowhere").await,
            Err(ManagerError::UnknownRoom(_))
        ));
    }

    #[tokio::test]
    async fn destroy_removes_the_room() {
        let manager = RoomManager::new(InputSchedule::Immediate);
        manager
            .create_room("arena".into(), vec![floor()], None, Vec::new())
            .await
            .unwrap();

        manager.destroy_room("arena").await.unwrap();
        assert_eq!(manager.room_count().await, 0);
        assert!(manager.destroy_room("arena").await.is_err());
    }
}
