//! Keyed store with atomic get-or-create, and its hub-per-room specialisation
//!
//! [`Registry`] is the only structure in the server mutated by arbitrary
//! callers. Lookup and insertion happen under one lock acquisition, so
//! concurrent `get_or_create` calls for the same key converge on a single
//! value and exactly one of them runs the constructor.

use crate::config::HubConfig;
use crate::hub::Hub;
use crate::room::{Room, RoomId};
use log::info;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
pub struct Registry<K, V> {
    entries: Mutex<HashMap<K, Arc<V>>>,
}

impl<K, V> Default for Registry<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> Registry<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored under `key`, running `init` to create it if
    /// absent. Losing racers receive the winner's value.
    pub fn get_or_create<F>(&self, key: K, init: F) -> Arc<V>
    where
        F: FnOnce() -> V,
    {
        let mut entries = self.entries();
        Arc::clone(entries.entry(key).or_insert_with(|| Arc::new(init())))
    }

    /// Non-creating lookup.
    pub fn get<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries().get(key).cloned()
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries().remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries().keys().cloned().collect()
    }

    pub fn values(&self) -> Vec<Arc<V>> {
        self.entries().values().cloned().collect()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<K, Arc<V>>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One hub per room id, created lazily from the room's metadata.
#[derive(Debug, Default)]
pub struct HubRegistry {
    hubs: Registry<RoomId, Hub>,
    defaults: HubConfig,
}

impl HubRegistry {
    /// `defaults` supplies every hub setting except the room's own capacity.
    pub fn new(defaults: HubConfig) -> Self {
        Self {
            hubs: Registry::new(),
            defaults,
        }
    }

    /// Must be called from within a tokio runtime: a newly created hub
    /// spawns its event loop.
    pub fn get_or_create(&self, room: &Room) -> Arc<Hub> {
        self.hubs.get_or_create(room.id.clone(), || {
            info!(
                "Creating hub for room {} ({}, capacity {})",
                room.id, room.name, room.capacity
            );
            Hub::new(room.id.clone(), room.hub_config(&self.defaults))
        })
    }

    pub fn get(&self, room_id: &str) -> Option<Arc<Hub>> {
        self.hubs.get(room_id)
    }

    /// Drops the association only. Callers are expected to have closed the
    /// hub; see [`HubRegistry::delete_room`].
    pub fn remove(&self, room_id: &str) -> Option<Arc<Hub>> {
        self.hubs.remove(room_id)
    }

    /// Removes the room's hub and closes it, disconnecting every member.
    pub async fn delete_room(&self, room_id: &str) -> bool {
        match self.hubs.remove(room_id) {
            Some(hub) => {
                hub.close().await;
                true
            }
            None => false,
        }
    }

    pub async fn close_all(&self) {
        for hub in self.hubs.values() {
            hub.close().await;
        }
    }

    pub fn room_ids(&self) -> Vec<RoomId> {
        let mut ids = self.hubs.keys();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.hubs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hubs.is_empty()
    }
}
