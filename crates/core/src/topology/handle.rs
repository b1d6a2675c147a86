use std::sync::{Arc, RwLock};

use super::Topology;

/// Shared pointer to the current topology.
///
/// `snapshot()` takes the read lock only long enough to clone the `Arc`,
/// which then stays valid for as long as the caller holds it. `swap()`
/// replaces the pointer under the write lock without touching the old
/// value, so in-flight readers keep a consistent view. Reads are not
/// lock-free.
#[derive(Debug, Clone)]
pub struct TopologyHandle {
    current: Arc<RwLock<Arc<Topology>>>,
}

impl TopologyHandle {
    pub fn new(topology: Topology) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(topology))),
        }
    }

    pub fn snapshot(&self) -> Arc<Topology> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Install a new topology, returning the one it replaced.
    pub fn swap(&self, topology: Topology) -> Arc<Topology> {
        let next = Arc::new(topology);
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_topology;

    #[test]
    fn test_swap_keeps_old_snapshot_intact() {
        let handle = TopologyHandle::new(sample_topology());
        let before = handle.snapshot();
        let queue_count = before.queues.len();

        let mut smaller = sample_topology();
        smaller.queues = Default::default();
        let previous = handle.swap(smaller);

        assert!(Arc::ptr_eq(&before, &previous));
        assert_eq!(before.queues.len(), queue_count);
        assert!(handle.snapshot().queues.is_empty());
    }
}
