//! Instance registry
//!
//! Generation-checked arena mapping handles to sessions. The application
//! context allocates and frees; engine contexts resolve. Sessions are held as
//! `Arc`, so a dispatch that resolved a handle before `free` keeps the state
//! alive until it returns, while no resolve started after `free` can see it.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::handle::Handle;
use super::session::SessionState;
use crate::error::{BridgeError, Result};

/// Default session capacity
pub const DEFAULT_CAPACITY: usize = 64;

struct Slot {
    generation: u32,
    session: Option<Arc<SessionState>>,
}

#[derive(Default)]
struct Arena {
    slots: Vec<Slot>,
    /// Vacant slot indices, reused LIFO
    vacant: Vec<u32>,
    live: usize,
}

impl Arena {
    fn slot(&self, handle: Handle) -> Option<&Slot> {
        self.slots
            .get(handle.index() as usize)
            .filter(|slot| slot.generation == handle.generation())
    }
}

/// Handle → session map
pub struct InstanceRegistry {
    arena: RwLock<Arena>,
    capacity: usize,
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl InstanceRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            arena: RwLock::new(Arena::default()),
            capacity,
        }
    }

    /// Create an idle session under a fresh handle
    pub fn allocate(&self) -> Result<Handle> {
        let mut arena = self.arena.write();
        if arena.live >= self.capacity {
            warn!(capacity = self.capacity, "session capacity exhausted");
            return Err(BridgeError::ResourceExhausted(self.capacity));
        }

        let index = match arena.vacant.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(arena.slots.len())
                    .map_err(|_| BridgeError::ResourceExhausted(self.capacity))?;
                arena.slots.push(Slot {
                    generation: 0,
                    session: None,
                });
                index
            }
        };

        let slot = &mut arena.slots[index as usize];
        let handle = Handle::new(index, slot.generation);
        slot.session = Some(Arc::new(SessionState::new(handle)));
        arena.live += 1;

        debug!(%handle, live = arena.live, "session allocated");
        Ok(handle)
    }

    /// Remove a session.
    ///
    /// Once this returns no resolve can reach the session. Dispatches that
    /// already resolved it keep their reference until they finish.
    pub fn free(&self, handle: Handle) -> Result<()> {
        let mut arena = self.arena.write();
        let slot = arena
            .slots
            .get_mut(handle.index() as usize)
            .filter(|slot| slot.generation == handle.generation())
            .ok_or(BridgeError::UnknownHandle(handle))?;
        let session = slot.session.take().ok_or(BridgeError::UnknownHandle(handle))?;

        // A slot whose generation would wrap is retired instead of reused
        let retired = slot.generation == u32::MAX;
        if !retired {
            slot.generation += 1;
        }
        arena.live -= 1;
        if !retired {
            arena.vacant.push(handle.index());
        }
        drop(arena);

        debug!(
            %handle,
            in_flight = Arc::strong_count(&session) - 1,
            "session freed"
        );
        Ok(())
    }

    /// Look up a session. Unknown and freed handles yield `None`.
    pub fn resolve(&self, handle: Handle) -> Option<Arc<SessionState>> {
        self.arena.read().slot(handle)?.session.clone()
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.resolve(handle).is_some()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.arena.read().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Handles of all live sessions, in slot order
    pub fn handles(&self) -> Vec<Handle> {
        let arena = self.arena.read();
        arena
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.session.is_some())
            .map(|(index, slot)| Handle::new(index as u32, slot.generation))
            .collect()
    }

    #[cfg(test)]
    fn force_generation(&self, index: u32, generation: u32) {
        self.arena.write().slots[index as usize].generation = generation;
    }
}
