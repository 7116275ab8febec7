//! Resilience decorators: circuit breaker and retry.
//!
//! Both classify errors by [`ClientKind`]: business outcomes (a missing or
//! duplicate record) pass through untouched, infrastructure failures are
//! retried and counted. Wrap retry inside the breaker so one logical call
//! counts once:
//!
//! ```rust
//! use ombor_resilience::{BreakerConfig, CircuitBreaker, ClientKind, Retry, RetryConfig, StoreError};
//!
//! # async fn demo() {
//! let breaker = CircuitBreaker::new(BreakerConfig::new("users-db", ClientKind::SqlStore));
//! let retry = Retry::new(RetryConfig::new(ClientKind::SqlStore));
//!
//! let user = breaker
//!     .call(|| retry.call(|| async { Ok::<_, StoreError>("alice") }))
//!     .await;
//! assert_eq!(user.unwrap(), "alice");
//! # }
//! ```

pub mod breaker;
pub mod classify;
pub mod error;
pub mod retry;

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use classify::{Classify, ClientKind, DomainOutcome, StoreError};
pub use error::{BreakerError, ResilienceError};
pub use retry::{Retry, RetryConfig};
