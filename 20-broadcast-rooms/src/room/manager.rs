use std::{collections::HashMap, mem, sync::Arc};

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{config::RoomConfig, error::Result, room::Room};

/// Registry of rooms keyed by id, creating rooms on first use.
pub struct Manager<T> {
    rooms: Mutex<HashMap<String, Arc<Room<T>>>>,
    config: RoomConfig,
}

impl<T> Default for Manager<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::with_config(RoomConfig::default())
    }
}

impl<T> Manager<T>
where
    T: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager whose rooms use `config` unless `load` is given another.
    pub fn with_config(config: RoomConfig) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Returns the live room for `id`, creating it when missing.
    ///
    /// A room that was closed behind the manager's back counts as missing and
    /// is replaced.
    pub async fn load(&self, id: &str, config: Option<RoomConfig>) -> Arc<Room<T>> {
        let mut rooms = self.rooms.lock().await;
        if let Some(room) = rooms.get(id).filter(|room| !room.is_closed()) {
            return Arc::clone(room);
        }

        let config = config.unwrap_or_else(|| self.config.clone());
        let room = Arc::new(Room::new(id, config));
        rooms.insert(id.to_string(), Arc::clone(&room));
        info!(room = %id, "created room");
        room
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Room<T>>> {
        self.rooms.lock().await.get(id).cloned()
    }

    /// Detaches the room for `id` and closes it.
    ///
    /// Returns `None` when no such room is registered.
    pub async fn remove(&self, id: &str) -> Option<Result<()>> {
        let room = self.rooms.lock().await.remove(id)?;
        Some(room.close().await)
    }

    /// Detaches and closes every room without members.
    ///
    /// A caller that loaded one of these rooms just before the reap sees
    /// `RoomClosed` on its next call and can `load` again.
    pub async fn reap_idle(&self) -> usize {
        let idle: Vec<_> = {
            let mut rooms = self.rooms.lock().await;
            let ids: Vec<String> = rooms
                .iter()
                .filter(|(_, room)| room.size() == 0)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| rooms.remove(id)).collect()
        };

        let reaped = idle.len();
        close_all(idle).await;
        if reaped > 0 {
            info!(reaped, "reaped idle rooms");
        }
        reaped
    }

    pub async fn len(&self) -> usize {
        self.rooms.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rooms.lock().await.is_empty()
    }

    /// Closes every room and empties the registry. Individual close errors
    /// are ignored.
    pub async fn close(&self) {
        let rooms = mem::take(&mut *self.rooms.lock().await);
        let count = rooms.len();
        close_all(rooms.into_values().collect()).await;
        info!(rooms = count, "room manager closed");
    }
}

async fn close_all<T>(rooms: Vec<Arc<Room<T>>>)
where
    T: Clone + Send + 'static,
{
    let results = join_all(rooms.iter().map(|room| room.close())).await;
    for (room, result) in rooms.iter().zip(results) {
        if let Err(error) = result {
            debug!(room = %room.id(), %error, "ignoring room close error");
        }
    }
}
