//! In-memory owner → container registry.
//!
//! An owner's slot is either reserved (a container launch is in flight) or
//! live. Reservation is a single check-and-insert under the lock, so two
//! concurrent creates for the same owner cannot both reach the engine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub owner: String,
    pub container_id: String,
    pub container_name: String,
}

#[derive(Debug, Clone)]
enum Slot {
    Reserved,
    Live(ContainerHandle),
}

#[derive(Debug, Default)]
pub struct OwnerRegistry {
    slots: Mutex<HashMap<String, Slot>>,
}

impl OwnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        // A panic while holding the lock cannot leave the map half-written
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the owner's slot. Returns `None` if it is reserved or live.
    pub fn reserve(self: &Arc<Self>, owner: &str) -> Option<Reservation> {
        let mut slots = self.slots();
        if slots.contains_key(owner) {
            return None;
        }
        slots.insert(owner.to_string(), Slot::Reserved);
        debug!(owner, "Reserved registry slot");

        Some(Reservation {
            registry: Arc::clone(self),
            owner: owner.to_string(),
            committed: false,
        })
    }

    /// Live handle for the owner, ignoring in-flight reservations.
    pub fn get(&self, owner: &str) -> Option<ContainerHandle> {
        match self.slots().get(owner) {
            Some(Slot::Live(handle)) => Some(handle.clone()),
            _ => None,
        }
    }

    pub fn is_occupied(&self, owner: &str) -> bool {
        self.slots().contains_key(owner)
    }

    /// Drop the owner's live entry. Reservations are left to their guard.
    pub fn remove(&self, owner: &str) -> Option<ContainerHandle> {
        let mut slots = self.slots();
        match slots.get(owner) {
            Some(Slot::Live(_)) => match slots.remove(owner) {
                Some(Slot::Live(handle)) => Some(handle),
                _ => None,
            },
            _ => None,
        }
    }

    /// Register a container discovered on the engine. Only fills vacant slots.
    pub fn adopt(&self, handle: ContainerHandle) -> bool {
        let mut slots = self.slots();
        if slots.contains_key(&handle.owner) {
            return false;
        }
        slots.insert(handle.owner.clone(), Slot::Live(handle));
        true
    }

    pub fn live_count(&self) -> usize {
        self.slots()
            .values()
            .filter(|slot| matches!(slot, Slot::Live(_)))
            .count()
    }
}

/// Guard over a reserved slot. Dropping it without [`Reservation::commit`]
/// releases the slot, so failed launches never leave a stale entry behind.
#[derive(Debug)]
pub struct Reservation {
    registry: Arc<OwnerRegistry>,
    owner: String,
    committed: bool,
}

impl Reservation {
    pub fn commit(mut self, handle: ContainerHandle) {
        self.registry
            .slots()
            .insert(self.owner.clone(), Slot::Live(handle));
        self.committed = true;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut slots = self.registry.slots();
        if matches!(slots.get(&self.owner), Some(Slot::Reserved)) {
            slots.remove(&self.owner);
            debug!(owner = %self.owner, "Released registry slot");
        }
    }
}

/// Per-owner async locks serializing lifecycle operations.
#[derive(Debug, Default)]
pub struct OwnerLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl OwnerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, owner: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            Arc::clone(locks.entry(owner.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(owner: &str) -> ContainerHandle {
        ContainerHandle {
            owner: owner.to_string(),
            container_id: format!("id-{}", owner),
            container_name: format!("workspace-{}", owner),
        }
    }

    #[test]
    fn test_reserve_is_exclusive() {
        let registry = Arc::new(OwnerRegistry::new());

        let first = registry.reserve("bob");
        assert!(first.is_some());
        assert!(registry.reserve("bob").is_none());
        assert!(registry.is_occupied("bob"));
        assert!(registry.get("bob").is_none());

        first.unwrap().commit(handle("bob"));
        assert_eq!(registry.get("bob"), Some(handle("bob")));
        assert!(registry.reserve("bob").is_none());
    }

    #[test]
    fn test_dropped_reservation_releases_slot() {
        let registry = Arc::new(OwnerRegistry::new());

        {
            let _reservation = registry.reserve("bob").unwrap();
        }

        assert!(!registry.is_occupied("bob"));
        assert!(registry.reserve("bob").is_some());
    }

    #[test]
    fn test_remove_ignores_reservations() {
        let registry = Arc::new(OwnerRegistry::new());
        let reservation = registry.reserve("bob").unwrap();

        assert!(registry.remove("bob").is_none());
        assert!(registry.is_occupied("bob"));

        reservation.commit(handle("bob"));
        assert_eq!(registry.remove("bob"), Some(handle("bob")));
        assert!(!registry.is_occupied("bob"));
    }

    #[test]
    fn test_adopt_only_fills_vacant_slots() {
        let registry = Arc::new(OwnerRegistry::new());

        assert!(registry.adopt(handle("bob")));
        assert!(!registry.adopt(handle("bob")));
        assert_eq!(registry.live_count(), 1);
        assert_eq!(registry.get("bob"), Some(handle("bob")));
    }

    #[tokio::test]
    async fn test_owner_locks_are_per_owner() {
        let locks = OwnerLocks::new();

        let _bob = locks.lock("bob").await;
        // A different owner is not blocked
        let _alice = locks.lock("alice").await;

        let blocked =
            tokio::time::timeout(std::time::Duration::from_millis(20), locks.lock("bob")).await;
        assert!(blocked.is_err());
    }
}
