//! Error classification.
//!
//! A call can fail for two reasons: the dependency is unhealthy
//! (infrastructure failure) or it answered a legitimate "no" (business
//! outcome). Only the first is retried or counted by a breaker. Which
//! answers count as business depends on the kind of client.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::ResilienceError;

/// Domain answer carried by an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainOutcome {
    NotFound,
    AlreadyExists,
}

/// Errors that may carry a [`DomainOutcome`].
pub trait Classify {
    /// The domain answer, or `None` for an infrastructure failure.
    fn domain_outcome(&self) -> Option<DomainOutcome>;
}

impl Classify for std::io::Error {
    fn domain_outcome(&self) -> Option<DomainOutcome> {
        match self.kind() {
            std::io::ErrorKind::NotFound => Some(DomainOutcome::NotFound),
            std::io::ErrorKind::AlreadyExists => Some(DomainOutcome::AlreadyExists),
            _ => None,
        }
    }
}

/// Error returned by storage clients.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("record already exists")]
    AlreadyExists,
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("query timed out")]
    Timeout,
}

impl Classify for StoreError {
    fn domain_outcome(&self) -> Option<DomainOutcome> {
        match self {
            Self::NotFound => Some(DomainOutcome::NotFound),
            Self::AlreadyExists => Some(DomainOutcome::AlreadyExists),
            Self::Unavailable(_) | Self::Timeout => None,
        }
    }
}

/// Category of the wrapped client.
///
/// A closed set; configuration naming anything else is rejected.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ClientKind {
    /// Relational store: missing and duplicate rows are business outcomes.
    SqlStore,
    /// Key-value cache: only a miss is a business outcome.
    InMemoryStore,
    /// Remote HTTP service: every error is an infrastructure failure.
    Http,
}

impl ClientKind {
    /// Parses a client kind from configuration.
    ///
    /// An unknown kind is a configuration error: callers treat it as fatal
    /// at startup, typically by returning it from a constructor so the
    /// container's `get` panics with it.
    pub fn from_config(value: &str) -> Result<Self, ResilienceError> {
        value
            .parse()
            .map_err(|_| ResilienceError::UnknownClient(value.to_owned()))
    }

    /// Returns true if `err` is a business outcome for this kind of client.
    pub fn is_business<E: Classify + ?Sized>(self, err: &E) -> bool {
        match (self, err.domain_outcome()) {
            (_, None) => false,
            (Self::SqlStore, Some(_)) => true,
            (Self::InMemoryStore, Some(outcome)) => outcome == DomainOutcome::NotFound,
            (Self::Http, Some(_)) => false,
        }
    }
}
