//! Service container with generations, teardown and rebuild-on-change.
//!
//! Services are declared as typed [`Service`] identifiers, built lazily on
//! first [`Container::get`], and cached per generation. A generation ends
//! with [`Container::shutdown_resources`] or a rebuild triggered by a change
//! source; its [`Closer`] then runs every registered teardown.

pub mod closer;
pub mod config;
pub mod container;
pub mod error;
pub mod generation;
pub mod key;
pub mod provider;
pub mod rebuild;
pub mod registry;
pub mod signal;
#[cfg(feature = "watch")]
pub mod watch;

pub use closer::Closer;
pub use config::{CloserConfig, ContainerConfig};
pub use container::{Container, ContainerBuilder, Resolver, prelude};
pub use error::{BoxError, ContainerError, NotRegisteredError, Result};
pub use generation::Generation;
pub use key::{Service, ServiceKey};
pub use provider::{Provider, ProviderRegistry};
pub use rebuild::{RebuildNotice, RebuildPhase};
#[cfg(feature = "watch")]
pub use watch::{FileChanges, watch_file};
