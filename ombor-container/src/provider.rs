//! Provider trait: a module of related registrations.
//!
//! Providers group the services of one concern (storage, HTTP clients,
//! observability) so the composition root stays a short list.
//!
//! # Examples
//! ```rust
//! use std::sync::Arc;
//! use ombor_container::prelude::*;
//!
//! struct Pool { dsn: String }
//!
//! const DSN: Service<String> = Service::new("dsn");
//! const POOL: Service<Arc<Pool>> = Service::new("pool");
//!
//! struct StorageProvider;
//!
//! impl Provider for StorageProvider {
//!     fn register(&self, registry: &mut dyn ProviderRegistry) {
//!         registry.value(&DSN, "postgres://localhost".to_string());
//!         registry.provide(&POOL, |r| Ok(Arc::new(Pool { dsn: r.try_get(&DSN)? })));
//!     }
//! }
//!
//! let container = Container::builder()
//!     .handle_signals(false)
//!     .add_provider(&StorageProvider)
//!     .build();
//! assert_eq!(container.get(&POOL).dsn, "postgres://localhost");
//! ```

use std::borrow::Cow;

use crate::container::Resolver;
use crate::error::BoxError;
use crate::key::{Service, ServiceKey};
use crate::registry::{ConstructorFn, erase};

/// A module that registers related services.
pub trait Provider: Send + Sync {
    /// Registers this module's services.
    fn register(&self, registry: &mut dyn ProviderRegistry);

    /// Human-readable name for logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Registration surface handed to providers.
///
/// Implemented by the builder and by a live container, so a provider can be
/// added before or after `build`. Tests can implement it to inspect what a
/// provider declares.
pub trait ProviderRegistry {
    /// Registers an erased constructor. Last write wins.
    fn register(&mut self, key: ServiceKey, constructor: ConstructorFn);
}

impl dyn ProviderRegistry + '_ {
    /// Typed form of [`register`](ProviderRegistry::register).
    pub fn provide<T, F>(&mut self, service: &Service<T>, constructor: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&Resolver<'_>) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        self.register(service.key(), erase(constructor));
    }

    pub fn provide_named<T, F>(
        &mut self,
        service: &Service<T>,
        name: impl Into<Cow<'static, str>>,
        constructor: F,
    ) where
        T: Send + Sync + 'static,
        F: Fn(&Resolver<'_>) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        self.register(service.named_key(name), erase(constructor));
    }

    pub fn value<T>(&mut self, service: &Service<T>, value: T)
    where
        T: Clone + Send + Sync + 'static,
    {
        self.register(service.key(), erase(move |_| Ok(value.clone())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingRegistry {
        keys: Vec<ServiceKey>,
    }

    impl ProviderRegistry for RecordingRegistry {
        fn register(&mut self, key: ServiceKey, _constructor: ConstructorFn) {
            self.keys.push(key);
        }
    }

    trait Tracer: Send + Sync {
        fn component(&self) -> &str;
    }

    struct NamedTracer(String);

    impl Tracer for NamedTracer {
        fn component(&self) -> &str {
            &self.0
        }
    }

    const TRACER: Service<Arc<dyn Tracer>> = Service::new("tracer");
    const SERVICE_NAME: Service<String> = Service::new("service_name");

    struct TracingProvider;

    impl Provider for TracingProvider {
        fn register(&self, registry: &mut dyn ProviderRegistry) {
            registry.value(&SERVICE_NAME, "billing".to_string());
            registry.provide(&TRACER, |r| {
                let name = r.try_get(&SERVICE_NAME)?;
                Ok(Arc::new(NamedTracer(name)) as Arc<dyn Tracer>)
            });
            for component in ["http-server", "user-service"] {
                registry.provide_named(&TRACER, component, move |_| {
                    Ok(Arc::new(NamedTracer(component.to_string())) as Arc<dyn Tracer>)
                });
            }
        }
    }

    #[test]
    fn provider_declares_registrations() {
        let mut registry = RecordingRegistry::default();
        TracingProvider.register(&mut registry);

        assert_eq!(registry.keys.len(), 4);
        assert!(registry.keys.contains(&TRACER.named_key("http-server")));
    }

    #[test]
    fn provider_has_name() {
        assert!(TracingProvider.name().contains("TracingProvider"));
    }

    #[test]
    fn install_on_live_container() {
        let container = Container::builder().handle_signals(false).build();
        container.install(&TracingProvider);

        assert_eq!(container.get(&TRACER).component(), "billing");
        assert_eq!(container.get_named(&TRACER, "http-server").component(), "http-server");
        assert_eq!(container.get_named(&TRACER, "user-service").component(), "user-service");
    }
}
