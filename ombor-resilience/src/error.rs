//! Error types for the resilience decorators.

use crate::classify::{Classify, DomainOutcome};

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ResilienceError {
    /// The configured client kind is not one of the known categories.
    #[error("Unknown client kind {0:?}, expected one of: sql_store, in_memory_store, http")]
    UnknownClient(String),
}

/// Failure of a call made through a [`CircuitBreaker`].
///
/// [`CircuitBreaker`]: crate::breaker::CircuitBreaker
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// The breaker is open; the call was not made.
    #[error("Circuit breaker '{0}' is open")]
    Open(String),

    /// The breaker is half-open and its probe budget is spent.
    #[error("Circuit breaker '{0}' is half-open, too many requests")]
    TooManyRequests(String),

    /// The wrapped call failed.
    #[error(transparent)]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// Returns true if the breaker refused the call.
    pub fn is_rejected(&self) -> bool {
        !matches!(self, Self::Inner(_))
    }

    /// The wrapped call's error, if it ran.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(err) => Some(err),
            Self::Open(_) | Self::TooManyRequests(_) => None,
        }
    }
}

impl<E: Classify> Classify for BreakerError<E> {
    fn domain_outcome(&self) -> Option<DomainOutcome> {
        match self {
            Self::Inner(err) => err.domain_outcome(),
            Self::Open(_) | Self::TooManyRequests(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::StoreError;

    #[test]
    fn breaker_error_display() {
        let open: BreakerError<StoreError> = BreakerError::Open("users-db".into());
        assert_eq!(open.to_string(), "Circuit breaker 'users-db' is open");
        assert!(open.is_rejected());

        let inner = BreakerError::Inner(StoreError::Timeout);
        assert_eq!(inner.to_string(), "query timed out");
        assert!(!inner.is_rejected());
        assert!(matches!(inner.into_inner(), Some(StoreError::Timeout)));
    }

    #[test]
    fn breaker_error_keeps_domain_outcome() {
        let err = BreakerError::Inner(StoreError::NotFound);
        assert_eq!(err.domain_outcome(), Some(DomainOutcome::NotFound));

        let rejected: BreakerError<StoreError> = BreakerError::TooManyRequests("x".into());
        assert_eq!(rejected.domain_outcome(), None);
    }
}
