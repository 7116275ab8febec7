//! # The Container
//!
//! Lazily builds services on first use, caches one instance per key per
//! generation, and tears them down on shutdown or rebuild.
//!
//! # Architecture
//! ```text
//! ContainerBuilder ──build()──> Container ──get()──> Generation (epoch N)
//!                                   │                    ├─ instance cache
//!                                   │                    └─ Closer
//!                          shutdown_resources()
//!                                   │
//!                                   ▼
//!                         Generation (epoch N + 1)
//! ```
//!
//! # Examples
//! ```rust
//! use ombor_container::prelude::*;
//! use std::sync::Arc;
//!
//! trait Logger: Send + Sync {
//!     fn log(&self, msg: &str);
//! }
//!
//! struct ConsoleLogger;
//! impl Logger for ConsoleLogger {
//!     fn log(&self, msg: &str) { println!("{msg}"); }
//! }
//!
//! struct UserService {
//!     logger: Arc<dyn Logger>,
//! }
//!
//! const LOGGER: Service<Arc<dyn Logger>> = Service::new("logger");
//! const USERS: Service<Arc<UserService>> = Service::new("user_service");
//!
//! let container = Container::builder()
//!     .handle_signals(false)
//!     .provide(&LOGGER, |_| Ok(Arc::new(ConsoleLogger) as Arc<dyn Logger>))
//!     .provide(&USERS, |r| {
//!         let logger = r.try_get(&LOGGER)?;
//!         Ok(Arc::new(UserService { logger }))
//!     })
//!     .build();
//!
//! let users = container.get(&USERS);
//! users.logger.log("ready");
//! assert!(Arc::ptr_eq(&users, &container.get(&USERS)));
//! ```

use std::any::type_name;
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ombor_support::rendering::suggest_similar;
use parking_lot::RwLock;
use tracing::{debug, error, info, instrument, trace};

use crate::closer::Closer;
use crate::config::ContainerConfig;
use crate::error::{BoxError, ContainerError, NotRegisteredError, Result};
use crate::generation::Generation;
use crate::key::{Service, ServiceKey};
use crate::provider::{Provider, ProviderRegistry};
use crate::rebuild::RebuildCoordinator;
use crate::registry::{ConstructorFn, Instance, Registration, Registry, erase};

const MAX_SUGGESTIONS: usize = 3;

// ═══════════════════════════════════════════
// ContainerBuilder
// ═══════════════════════════════════════════

/// Builds a [`Container`] with its initial registrations.
///
/// Everything the builder does can also be done on a live container; the
/// builder exists so the composition root reads as one block.
pub struct ContainerBuilder {
    registry: Registry,
    config: ContainerConfig,
}

impl ContainerBuilder {
    fn new() -> Self {
        Self {
            registry: Registry::new(),
            config: ContainerConfig::default(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ContainerConfig) -> Self {
        self.config = config;
        self
    }

    /// Minimum interval between accepted change signals.
    pub fn debounce(mut self, window: Duration) -> Self {
        self.config.debounce = window;
        self
    }

    /// Whether every generation's closer listens for SIGINT/SIGTERM.
    pub fn handle_signals(mut self, enabled: bool) -> Self {
        self.config.handle_signals = enabled;
        self
    }

    /// Bounds the teardown fan-out of every generation.
    pub fn teardown_timeout(mut self, timeout: Duration) -> Self {
        self.config.closer.teardown_timeout = Some(timeout);
        self
    }

    // ── Registration ──

    /// Registers the constructor for `service`.
    ///
    /// Called lazily, at most once per generation.
    pub fn provide<T, F>(mut self, service: &Service<T>, constructor: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Resolver<'_>) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        self.register(service.key(), erase(constructor));
        self
    }

    /// Registers a constructor under `service` qualified by `name`.
    pub fn provide_named<T, F>(
        mut self,
        service: &Service<T>,
        name: impl Into<Cow<'static, str>>,
        constructor: F,
    ) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Resolver<'_>) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        self.register(service.named_key(name), erase(constructor));
        self
    }

    /// Registers a pre-built value. Every generation gets a clone.
    pub fn value<T>(mut self, service: &Service<T>, value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        self.register(service.key(), erase(move |_| Ok(value.clone())));
        self
    }

    /// Adds a [`Provider`] module.
    pub fn add_provider(mut self, provider: &dyn Provider) -> Self {
        debug!(provider = provider.name(), "Adding provider");
        provider.register(&mut self);
        self
    }

    // ── Build ──

    /// Builds the container. Nothing is constructed until the first `get`.
    #[instrument(skip(self), name = "container_build")]
    pub fn build(self) -> Container {
        info!(registered = self.registry.len(), "Building container");

        let generation = Arc::new(Generation::new(0, &self.config));
        let rebuild = RebuildCoordinator::new(self.config.debounce);

        Container {
            inner: Arc::new(ContainerInner {
                registry: RwLock::new(self.registry),
                current: RwLock::new(generation),
                config: self.config,
                rebuild,
            }),
        }
    }
}

impl ProviderRegistry for ContainerBuilder {
    fn register(&mut self, key: ServiceKey, constructor: ConstructorFn) {
        self.registry.register(Registration { key, constructor });
    }
}

impl fmt::Debug for ContainerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerBuilder")
            .field("registered", &self.registry.len())
            .field("config", &self.config)
            .finish()
    }
}

// ═══════════════════════════════════════════
// Container
// ═══════════════════════════════════════════

/// Thread-safe service container. Cloning is cheap and shares state.
#[derive(Clone)]
pub struct Container {
    pub(crate) inner: Arc<ContainerInner>,
}

pub(crate) struct ContainerInner {
    registry: RwLock<Registry>,
    current: RwLock<Arc<Generation>>,
    config: ContainerConfig,
    pub(crate) rebuild: RebuildCoordinator,
}

impl Drop for ContainerInner {
    fn drop(&mut self) {
        self.rebuild.cancel_watch();
    }
}

impl Container {
    /// Creates a new builder.
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::new()
    }

    /// Creates an empty container with default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Settings the container was built with.
    pub fn config(&self) -> &ContainerConfig {
        &self.inner.config
    }

    // ── Resolution ──

    /// Returns the instance of `service` for the current generation.
    ///
    /// # Panics
    /// On a configuration error: the service (or one of its dependencies)
    /// is not registered, its constructor failed, or another identifier
    /// with the same id declared a different type.
    pub fn get<T>(&self, service: &Service<T>) -> T
    where
        T: Clone + Send + Sync + 'static,
    {
        self.try_get(service).unwrap_or_else(|err| fatal(err))
    }

    /// Like [`get`](Self::get) for the registration qualified by `name`.
    pub fn get_named<T>(&self, service: &Service<T>, name: &str) -> T
    where
        T: Clone + Send + Sync + 'static,
    {
        self.try_get_named(service, name)
            .unwrap_or_else(|err| fatal(err))
    }

    /// Returns the instance of `service`, or the configuration error.
    pub fn try_get<T>(&self, service: &Service<T>) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let generation = self.generation();
        self.resolve_typed(&generation, service.key(), &[])
    }

    /// Like [`try_get`](Self::try_get) for the registration qualified by `name`.
    pub fn try_get_named<T>(&self, service: &Service<T>, name: &str) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let generation = self.generation();
        self.resolve_typed(&generation, service.named_key(name.to_owned()), &[])
    }

    fn resolve_typed<T>(
        &self,
        generation: &Arc<Generation>,
        key: ServiceKey,
        ancestors: &[ServiceKey],
    ) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        trace!(key = %key, epoch = generation.epoch(), "Resolving");
        let instance = self.resolve_erased(generation, &key, ancestors)?;
        self.downcast(&key, &instance)
    }

    /// Cached instance, or construct it under the key's slot.
    fn resolve_erased(
        &self,
        generation: &Arc<Generation>,
        key: &ServiceKey,
        ancestors: &[ServiceKey],
    ) -> Result<Instance> {
        if let Some(instance) = generation.cached(key) {
            return Ok(instance);
        }

        let registration = self.inner.registry.read().get(key).cloned();
        let Some(registration) = registration else {
            return Err(self.not_registered(key, ancestors));
        };

        let slot = generation.slot(key);
        let instance = slot.get_or_try_init(|| {
            debug!(key = %key, epoch = generation.epoch(), "Constructing service");
            let resolver = Resolver {
                container: self,
                generation,
                service: key.clone(),
                ancestors,
            };
            (registration.constructor)(&resolver).map_err(|source| {
                ContainerError::ConstructionFailed {
                    key: key.clone(),
                    source,
                }
            })
        })?;

        Ok(instance.clone())
    }

    fn downcast<T: Clone + 'static>(&self, key: &ServiceKey, instance: &Instance) -> Result<T> {
        match instance.downcast_ref::<T>() {
            Some(value) => Ok(value.clone()),
            None => Err(ContainerError::TypeMismatch {
                key: key.clone(),
                registered: self
                    .inner
                    .registry
                    .read()
                    .get(key)
                    .map_or(key.type_name(), |registration| registration.key.type_name()),
                expected: type_name::<T>(),
            }),
        }
    }

    fn not_registered(&self, key: &ServiceKey, ancestors: &[ServiceKey]) -> ContainerError {
        let ids = self.inner.registry.read().ids();
        let mut chain = ancestors.to_vec();
        chain.push(key.clone());

        ContainerError::NotRegistered(NotRegisteredError {
            requested: key.clone(),
            required_by: ancestors.last().cloned(),
            chain,
            suggestions: suggest_similar(key.id(), &ids, MAX_SUGGESTIONS),
        })
    }

    // ── Live registration ──

    /// Registers (or replaces) the constructor for `service`.
    ///
    /// An instance already cached in the current generation stays until the
    /// next shutdown or rebuild.
    pub fn provide<T, F>(&self, service: &Service<T>, constructor: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&Resolver<'_>) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        self.register(service.key(), erase(constructor));
    }

    /// Registers a constructor under `service` qualified by `name`.
    pub fn provide_named<T, F>(
        &self,
        service: &Service<T>,
        name: impl Into<Cow<'static, str>>,
        constructor: F,
    ) where
        T: Send + Sync + 'static,
        F: Fn(&Resolver<'_>) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        self.register(service.named_key(name), erase(constructor));
    }

    /// Registers a pre-built value.
    pub fn value<T>(&self, service: &Service<T>, value: T)
    where
        T: Clone + Send + Sync + 'static,
    {
        self.register(service.key(), erase(move |_| Ok(value.clone())));
    }

    /// Registers everything a [`Provider`] declares.
    pub fn install(&self, provider: &dyn Provider) {
        debug!(provider = provider.name(), "Installing provider");
        let mut registry = self.inner.registry.write();
        provider.register(&mut LiveRegistry(&mut registry));
    }

    fn register(&self, key: ServiceKey, constructor: ConstructorFn) {
        self.inner
            .registry
            .write()
            .register(Registration { key, constructor });
    }

    /// Keys with a registered constructor.
    pub fn registered(&self) -> Vec<ServiceKey> {
        self.inner.registry.read().registered_keys()
    }

    /// Returns true if a constructor is registered under `key`.
    pub fn is_registered(&self, key: &ServiceKey) -> bool {
        self.inner.registry.read().contains(key)
    }

    // ── Lifecycle ──

    /// The generation currently serving `get`.
    pub fn generation(&self) -> Arc<Generation> {
        self.inner.current.read().clone()
    }

    /// Number of completed shutdowns and rebuilds.
    pub fn epoch(&self) -> u64 {
        self.inner.current.read().epoch()
    }

    /// Closer of the current generation.
    pub fn closer(&self) -> Arc<Closer> {
        self.inner.current.read().closer().clone()
    }

    /// Adds a teardown callback to the current generation.
    pub fn on_shutdown<F>(&self, label: impl Into<Cow<'static, str>>, teardown: F) -> bool
    where
        F: FnOnce() -> std::result::Result<(), BoxError> + Send + 'static,
    {
        self.closer().add(label, teardown)
    }

    /// Adds an async teardown to the current generation.
    pub fn on_shutdown_async<F>(&self, label: impl Into<Cow<'static, str>>, teardown: F) -> bool
    where
        F: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        self.closer().add_async(label, teardown)
    }

    /// Retires the current generation and tears it down.
    ///
    /// A fresh generation is installed first, so `get` keeps working while
    /// the old instances are released. Returns once every teardown callback
    /// of the retired generation has finished.
    ///
    /// A `get` issued during the teardown builds its instance in the new
    /// generation while the retired resources are still closing. Callers
    /// that need the old generation fully released before the new one
    /// serves wait for this future, or for [`RebuildNotice::reloaded`]
    /// during a rebuild, before their next `get`.
    ///
    /// [`RebuildNotice::reloaded`]: crate::rebuild::RebuildNotice::reloaded
    #[instrument(skip(self), name = "container_shutdown_resources")]
    pub async fn shutdown_resources(&self) {
        let retired = self.retire();
        info!(
            epoch = retired.epoch(),
            instances = retired.instance_count(),
            "Shutting down resources"
        );

        retired.clear();
        retired.closer().close_all().await;
        retired.closer().wait().await;
    }

    fn retire(&self) -> Arc<Generation> {
        let mut current = self.inner.current.write();
        let next = Arc::new(Generation::new(current.epoch() + 1, &self.inner.config));
        std::mem::replace(&mut *current, next)
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("registered", &self.inner.registry.read().len())
            .field("generation", &*self.inner.current.read())
            .field("rebuild", &self.inner.rebuild.phase())
            .finish()
    }
}

fn fatal(err: ContainerError) -> ! {
    error!(error = %err, "Container configuration error");
    panic!("{err}")
}

// ═══════════════════════════════════════════
// Resolver
// ═══════════════════════════════════════════

/// Handed to constructors while they run.
///
/// Bound to the generation that started the construction: dependencies and
/// teardown callbacks land in that generation even if a rebuild happens
/// meanwhile.
pub struct Resolver<'a> {
    container: &'a Container,
    generation: &'a Arc<Generation>,
    service: ServiceKey,
    ancestors: &'a [ServiceKey],
}

impl Resolver<'_> {
    /// Key of the service being constructed.
    pub fn service(&self) -> &ServiceKey {
        &self.service
    }

    /// Epoch of the generation being populated.
    pub fn epoch(&self) -> u64 {
        self.generation.epoch()
    }

    /// The container running the construction.
    pub fn container(&self) -> &Container {
        self.container
    }

    /// Resolves a dependency, panicking on a configuration error.
    pub fn get<T>(&self, service: &Service<T>) -> T
    where
        T: Clone + Send + Sync + 'static,
    {
        self.try_get(service).unwrap_or_else(|err| fatal(err))
    }

    /// Resolves a named dependency, panicking on a configuration error.
    pub fn get_named<T>(&self, service: &Service<T>, name: &str) -> T
    where
        T: Clone + Send + Sync + 'static,
    {
        self.try_get_named(service, name)
            .unwrap_or_else(|err| fatal(err))
    }

    /// Resolves a dependency. The error converts into [`BoxError`], so
    /// constructors can use `?`.
    pub fn try_get<T>(&self, service: &Service<T>) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.resolve(service.key())
    }

    /// Resolves the registration of `service` qualified by `name`.
    pub fn try_get_named<T>(&self, service: &Service<T>, name: &str) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.resolve(service.named_key(name.to_owned()))
    }

    fn resolve<T>(&self, key: ServiceKey) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut chain = self.ancestors.to_vec();
        chain.push(self.service.clone());
        self.container.resolve_typed(self.generation, key, &chain)
    }

    /// Adds a teardown callback labelled with the service being built.
    pub fn on_shutdown<F>(&self, teardown: F) -> bool
    where
        F: FnOnce() -> std::result::Result<(), BoxError> + Send + 'static,
    {
        self.generation
            .closer()
            .add(self.service.to_string(), teardown)
    }

    /// Adds an async teardown labelled with the service being built.
    pub fn on_shutdown_async<F>(&self, teardown: F) -> bool
    where
        F: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        self.generation
            .closer()
            .add_async(self.service.to_string(), teardown)
    }
}

impl fmt::Debug for Resolver<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("service", &self.service)
            .field("epoch", &self.epoch())
            .finish()
    }
}

// ═══════════════════════════════════════════
// LiveRegistry (provider bridge for a built container)
// ═══════════════════════════════════════════

struct LiveRegistry<'a>(&'a mut Registry);

impl ProviderRegistry for LiveRegistry<'_> {
    fn register(&mut self, key: ServiceKey, constructor: ConstructorFn) {
        self.0.register(Registration { key, constructor });
    }
}

// ═══════════════════════════════════════════
// Prelude
// ═══════════════════════════════════════════

pub mod prelude {
    pub use super::{Container, ContainerBuilder, Resolver};
    pub use crate::closer::Closer;
    pub use crate::config::{CloserConfig, ContainerConfig};
    pub use crate::error::{BoxError, ContainerError, Result};
    pub use crate::key::{Service, ServiceKey};
    pub use crate::provider::{Provider, ProviderRegistry};
    pub use crate::rebuild::{RebuildNotice, RebuildPhase};
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════
