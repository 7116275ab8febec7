//! Container generations.
//!
//! A generation owns the instances built during one epoch and the closer
//! that tears them down. A rebuild retires the current generation and
//! installs a fresh one; the two never share instances or callbacks.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;

use crate::closer::Closer;
use crate::config::ContainerConfig;
use crate::key::ServiceKey;
use crate::registry::Instance;

/// Construction slot for one key. The cell serializes construction of that
/// key without holding a map shard lock while the constructor runs.
pub(crate) type Slot = Arc<OnceCell<Instance>>;

/// Instances and teardown callbacks of one epoch.
pub struct Generation {
    epoch: u64,
    instances: DashMap<ServiceKey, Slot>,
    closer: Arc<Closer>,
}

impl Generation {
    pub(crate) fn new(epoch: u64, config: &ContainerConfig) -> Self {
        let closer = Arc::new(Closer::new(config.closer.clone()));
        if config.handle_signals {
            closer.arm_signals();
        }

        Self {
            epoch,
            instances: DashMap::new(),
            closer,
        }
    }

    /// Rebuild counter, starting at 0.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Closer collecting this generation's teardown.
    pub fn closer(&self) -> &Arc<Closer> {
        &self.closer
    }

    /// Number of constructed instances.
    pub fn instance_count(&self) -> usize {
        self.instances
            .iter()
            .filter(|entry| entry.value().get().is_some())
            .count()
    }

    /// Returns the constructed instance for `key`, if any.
    pub(crate) fn cached(&self, key: &ServiceKey) -> Option<Instance> {
        self.instances
            .get(key)
            .and_then(|slot| slot.get().cloned())
    }

    /// Returns the construction slot for `key`, creating an empty one.
    pub(crate) fn slot(&self, key: &ServiceKey) -> Slot {
        // Clone out so the shard guard drops before construction starts.
        self.instances
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone()
    }

    /// Drops every cached instance. In-flight holders keep theirs.
    pub(crate) fn clear(&self) {
        self.instances.clear();
    }
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generation")
            .field("epoch", &self.epoch)
            .field("instances", &self.instance_count())
            .field("closer", &self.closer)
            .finish()
    }
}
