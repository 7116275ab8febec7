//! Error types for container operations.
//!
//! Most of these are configuration errors: [`Container::get`] turns them
//! into a panic because a missing registration is a wiring bug, not a
//! runtime condition. The `try_*` accessors return them as values.
//!
//! [`Container::get`]: crate::container::Container::get

use std::fmt;
#[cfg(feature = "watch")]
use std::path::PathBuf;

use ombor_support::rendering::{render_chain, shorten_type_name};

use crate::key::ServiceKey;

/// Opaque failure from a collaborator: a constructor, a teardown callback.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for container operations.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// Requested service was never registered.
    #[error("{}", .0)]
    NotRegistered(NotRegisteredError),

    /// The cached instance is not of the type the identifier declares.
    /// Happens when two `Service` constants share an id.
    #[error("Type mismatch for {key}: registered as {}, requested as {}", shorten_type_name(.registered), shorten_type_name(.expected))]
    TypeMismatch {
        key: ServiceKey,
        registered: &'static str,
        expected: &'static str,
    },

    /// A constructor returned an error.
    #[error("Failed to construct {key}: {source}")]
    ConstructionFailed {
        key: ServiceKey,
        #[source]
        source: BoxError,
    },

    /// A background operation was requested outside a Tokio runtime.
    #[error("{operation} requires a running Tokio runtime")]
    NoRuntime { operation: &'static str },

    /// The file change source could not be set up.
    #[cfg(feature = "watch")]
    #[error("Failed to watch {}: {source}", .path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Error when a service was not registered.
#[derive(Debug)]
pub struct NotRegisteredError {
    /// The service that was requested.
    pub requested: ServiceKey,
    /// The service whose constructor asked for it, if any.
    pub required_by: Option<ServiceKey>,
    /// Services being constructed when the lookup failed, outermost first.
    pub chain: Vec<ServiceKey>,
    /// Registered ids that look like the requested one.
    pub suggestions: Vec<String>,
}

impl fmt::Display for NotRegisteredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Service not registered: {} ({})",
            self.requested,
            shorten_type_name(self.requested.type_name()),
        )?;

        if let Some(parent) = &self.required_by {
            write!(f, "\n  Required by: {parent}")?;
        }

        if self.chain.len() > 1 {
            let links: Vec<String> = self.chain.iter().map(ToString::to_string).collect();
            write!(f, "\n  Resolution chain: {}", render_chain(&links))?;
        }

        if !self.suggestions.is_empty() {
            write!(f, "\n  Did you mean one of:")?;
            for suggestion in &self.suggestions {
                write!(f, "\n    - {suggestion}")?;
            }
        }

        match self.requested.name() {
            Some(name) => write!(
                f,
                "\n  Hint: call .provide_named(&SERVICE, {name:?}, ..) before the first get"
            ),
            None => write!(f, "\n  Hint: call .provide(&SERVICE, ..) before the first get"),
        }
    }
}

/// Convenient Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;
