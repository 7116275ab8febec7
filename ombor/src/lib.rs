//! # Ombor
//!
//! Service composition and lifecycle runtime: lazily built singletons,
//! coordinated teardown, rebuild on configuration change, and resilience
//! decorators for the clients the services wrap.
//!
//! ```rust
//! use std::sync::Arc;
//! use ombor::prelude::*;
//!
//! struct Greeter { greeting: String }
//!
//! const GREETING: Service<String> = Service::new("greeting");
//! const GREETER: Service<Arc<Greeter>> = Service::new("greeter");
//!
//! let container = Container::builder()
//!     .handle_signals(false)
//!     .value(&GREETING, "hello".to_string())
//!     .provide(&GREETER, |r| Ok(Arc::new(Greeter { greeting: r.try_get(&GREETING)? })))
//!     .build();
//!
//! assert_eq!(container.get(&GREETER).greeting, "hello");
//! ```

pub use ombor_container::*;
pub use ombor_resilience as resilience;
pub use ombor_support as support;

pub mod prelude {
    pub use ombor_container::prelude::*;
    pub use ombor_resilience::{
        BreakerConfig, BreakerError, CircuitBreaker, Classify, ClientKind, Retry, RetryConfig,
    };
}
