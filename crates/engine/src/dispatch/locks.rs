//! Per-instance claims

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

/// Set of instances currently driven in this process
///
/// At most one [`InstanceClaim`] exists per instance; dropping the claim
/// releases it.
#[derive(Debug, Clone, Default)]
pub struct InstanceLocks {
    held: Arc<Mutex<HashSet<Uuid>>>,
}

impl InstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim an instance, or `None` if someone already holds it
    pub fn try_claim(&self, instance_id: Uuid) -> Option<InstanceClaim> {
        if !self.held.lock().insert(instance_id) {
            return None;
        }
        Some(InstanceClaim {
            instance_id,
            held: self.held.clone(),
        })
    }

    pub fn is_claimed(&self, instance_id: Uuid) -> bool {
        self.held.lock().contains(&instance_id)
    }

    pub fn len(&self) -> usize {
        self.held.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.lock().is_empty()
    }
}

/// Exclusive right to drive one instance
#[derive(Debug)]
pub struct InstanceClaim {
    instance_id: Uuid,
    held: Arc<Mutex<HashSet<Uuid>>>,
}

impl InstanceClaim {
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }
}

impl Drop for InstanceClaim {
    fn drop(&mut self) {
        self.held.lock().remove(&self.instance_id);
    }
}
