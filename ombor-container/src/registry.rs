//! Constructor registry.
//!
//! The registry maps a [`ServiceKey`] to the constructor that knows how to
//! build it. Registration is last-write-wins: the composition root may
//! override a default by providing the same key again.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::container::Resolver;
use crate::error::BoxError;
use crate::key::ServiceKey;

/// A constructed service, type-erased for the instance cache.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Type-erased constructor.
///
/// Receives a [`Resolver`] bound to the generation being populated, so the
/// constructor can pull its own dependencies and register teardown.
///
/// `Arc` rather than `Box`: the container clones the constructor out of the
/// registry lock before running it.
pub type ConstructorFn =
    Arc<dyn Fn(&Resolver<'_>) -> Result<Instance, BoxError> + Send + Sync>;

/// Wraps a typed constructor into a [`ConstructorFn`].
pub fn erase<T, F>(constructor: F) -> ConstructorFn
where
    T: Send + Sync + 'static,
    F: Fn(&Resolver<'_>) -> Result<T, BoxError> + Send + Sync + 'static,
{
    Arc::new(move |resolver: &Resolver<'_>| {
        constructor(resolver).map(|service| Arc::new(service) as Instance)
    })
}

/// Registration entry for a single service.
#[derive(Clone)]
pub(crate) struct Registration {
    pub key: ServiceKey,
    pub constructor: ConstructorFn,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration").field("key", &self.key).finish()
    }
}

/// Stores all service registrations.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    registrations: HashMap<ServiceKey, Registration>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor, replacing any earlier one for the same key.
    ///
    /// Returns the replaced registration.
    pub fn register(&mut self, registration: Registration) -> Option<Registration> {
        let key = registration.key.clone();
        let replaced = self.registrations.insert(key.clone(), registration);

        if replaced.is_some() {
            debug!(key = %key, "Replaced service registration");
        } else {
            debug!(key = %key, "Registered service");
        }
        replaced
    }

    /// Looks up a registration by key.
    pub fn get(&self, key: &ServiceKey) -> Option<&Registration> {
        self.registrations.get(key)
    }

    /// Returns true if `key` has a constructor.
    pub fn contains(&self, key: &ServiceKey) -> bool {
        self.registrations.contains_key(key)
    }

    /// Returns the number of registered services.
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Returns all registered keys.
    pub fn registered_keys(&self) -> Vec<ServiceKey> {
        self.registrations.keys().cloned().collect()
    }

    /// Returns the distinct ids, for "did you mean" suggestions.
    pub fn ids(&self) -> Vec<&'static str> {
        let mut ids: Vec<&'static str> = self.registrations.keys().map(ServiceKey::id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}
