//! In-process leases over replay ids.
//!
//! A lease marks a replay as being processed by this process. It is released
//! when the [`ReplayLease`] guard is dropped, whichever way processing ends.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use replayer_core::ReplayId;

/// Set of replay ids currently being processed. Clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct ReplayLeases {
    held: Arc<Mutex<HashSet<ReplayId>>>,
}

impl ReplayLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lease for `id`, or `None` if someone already holds it.
    pub fn try_acquire(&self, id: ReplayId) -> Option<ReplayLease> {
        let mut held = self.held.lock().unwrap_or_else(|p| p.into_inner());
        held.insert(id).then(|| ReplayLease {
            id,
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_held(&self, id: ReplayId) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(&id)
    }
}

/// Guard for one held lease.
#[derive(Debug)]
pub struct ReplayLease {
    id: ReplayId,
    held: Arc<Mutex<HashSet<ReplayId>>>,
}

impl ReplayLease {
    pub fn id(&self) -> ReplayId {
        self.id
    }
}

impl Drop for ReplayLease {
    fn drop(&mut self) {
        let mut held = self.held.lock().unwrap_or_else(|p| p.into_inner());
        held.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let leases = ReplayLeases::new();
        let id = ReplayId::new();

        let lease = leases.try_acquire(id).unwrap();
        assert_eq!(lease.id(), id);
        assert!(leases.try_acquire(id).is_none());
        assert!(leases.is_held(id));

        drop(lease);
        assert!(!leases.is_held(id));
        assert!(leases.try_acquire(id).is_some());
    }

    #[test]
    fn clones_share_the_lease_set() {
        let leases = ReplayLeases::new();
        let other = leases.clone();
        let id = ReplayId::new();

        let _lease = leases.try_acquire(id).unwrap();
        assert!(other.try_acquire(id).is_none());
        assert!(other.try_acquire(ReplayId::new()).is_some());
    }
}
