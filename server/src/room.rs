//! Room metadata and the persistence seam it is loaded through
//!
//! Rooms are owned by a [`RoomStore`]; the server only needs an id lookup when
//! a hub is first created. [`MemoryRoomStore`] backs the binary and the tests.

use crate::config::HubConfig;
use crate::hub::Hub;
use crate::registry::HubRegistry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

pub type RoomId = String;

pub const DEFAULT_TEMPO: u16 = 120;

/// A named, capacity-bounded collaboration space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    /// Beats per minute shared by everyone in the room
    pub tempo: u16,
    /// Maximum concurrent members (0 = unlimited)
    pub capacity: usize,
    pub owner: String,
}

impl Room {
    pub fn new(id: impl Into<RoomId>, name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tempo: DEFAULT_TEMPO,
            capacity: 0,
            owner: owner.into(),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_tempo(mut self, tempo: u16) -> Self {
        self.tempo = tempo;
        self
    }

    /// Hub configuration for this room: server defaults, room capacity.
    pub fn hub_config(&self, defaults: &HubConfig) -> HubConfig {
        defaults.clone().with_capacity(self.capacity)
    }

    /// The room's hub, created on first use.
    pub fn hub(&self, registry: &HubRegistry) -> Arc<Hub> {
        registry.get_or_create(self)
    }
}

/// Parses `id=name[:capacity[:tempo]]`, as accepted by `--room`.
impl FromStr for Room {
    type Err = String;

    fn from_str(arg: &str) -> Result<Self, Self::Err> {
        let (id, rest) = arg
            .split_once('=')
            .ok_or_else(|| format!("expected id=name[:capacity[:tempo]], got '{}'", arg))?;
        if id.is_empty() {
            return Err("room id must not be empty".to_string());
        }

        let mut parts = rest.split(':');
        let name = parts.next().filter(|n| !n.is_empty()).unwrap_or(id);
        let mut room = Room::new(id, name, "server");

        if let Some(capacity) = parts.next() {
            room.capacity = capacity
                .parse()
                .map_err(|_| format!("invalid capacity '{}'", capacity))?;
        }
        if let Some(tempo) = parts.next() {
            room.tempo = tempo
                .parse()
                .map_err(|_| format!("invalid tempo '{}'", tempo))?;
        }
        if parts.next().is_some() {
            return Err(format!("too many fields in '{}'", arg));
        }

        Ok(room)
    }
}

/// Lookup interface onto wherever room metadata lives.
pub trait RoomStore: Send + Sync {
    fn get(&self, id: &str) -> Option<Room>;

    /// Stores `room`, replacing and returning any previous room with that id.
    fn insert(&self, room: Room) -> Option<Room>;

    /// Stores `room` unless its id is taken; returns whichever room is stored.
    fn insert_if_absent(&self, room: Room) -> Room;

    fn remove(&self, id: &str) -> Option<Room>;

    fn list(&self) -> Vec<Room>;
}

#[derive(Debug, Default)]
pub struct MemoryRoomStore {
    rooms: RwLock<HashMap<RoomId, Room>>,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rooms(rooms: impl IntoIterator<Item = Room>) -> Self {
        let store = Self::new();
        for room in rooms {
            store.insert(room);
        }
        store
    }
}

impl RoomStore for MemoryRoomStore {
    fn get(&self, id: &str) -> Option<Room> {
        let rooms = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
        rooms.get(id).cloned()
    }

    fn insert(&self, room: Room) -> Option<Room> {
        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        rooms.insert(room.id.clone(), room)
    }

    fn insert_if_absent(&self, room: Room) -> Room {
        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        rooms.entry(room.id.clone()).or_insert(room).clone()
    }

    fn remove(&self, id: &str) -> Option<Room> {
        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        rooms.remove(id)
    }

    fn list(&self) -> Vec<Room> {
        let rooms = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
        let mut list: Vec<Room> = rooms.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }
}
