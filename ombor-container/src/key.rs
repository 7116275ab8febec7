//! Service identification.
//!
//! Services are declared once, at the composition root, as typed
//! identifiers:
//!
//! ```
//! use std::sync::Arc;
//! use ombor_container::key::Service;
//!
//! trait UserRepo: Send + Sync {}
//!
//! pub const USER_REPO: Service<Arc<dyn UserRepo>> = Service::new("user_repo");
//! pub const DSN: Service<String> = Service::new("dsn");
//!
//! assert_eq!(USER_REPO.key().id(), "user_repo");
//! assert_eq!(DSN.named_key("replica").name(), Some("replica"));
//! ```
//!
//! [`Service<T>`] carries the type for the accessor wrappers on the
//! container; [`ServiceKey`] is its erased form used by the registry and
//! the instance cache.

use std::any::type_name;
use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use ombor_support::rendering::shorten_type_name;

/// Erased identity of one registration: a service id plus an optional name.
///
/// Two keys are equal when their id and name match. The recorded type name
/// only feeds diagnostics.
#[derive(Clone)]
pub struct ServiceKey {
    id: &'static str,
    name: Option<Cow<'static, str>>,
    type_name: &'static str,
}

impl ServiceKey {
    /// Creates an unqualified key.
    #[inline]
    pub fn new(id: &'static str, type_name: &'static str) -> Self {
        Self { id, name: None, type_name }
    }

    /// Qualifies this key with a name. Named keys live in a namespace
    /// separate from the unqualified key of the same id.
    #[inline]
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns the service id.
    #[inline]
    pub fn id(&self) -> &'static str {
        self.id
    }

    /// Returns the name qualifier, if any.
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the full type name the key was declared with.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl PartialEq for ServiceKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.name == other.name
    }
}

impl Eq for ServiceKey {}

impl Hash for ServiceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ty = shorten_type_name(self.type_name);
        match &self.name {
            Some(name) => write!(f, "ServiceKey({}, name={:?}, type={})", self.id, name, ty),
            None => write!(f, "ServiceKey({}, type={})", self.id, ty),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}:{}", self.id, name),
            None => f.write_str(self.id),
        }
    }
}

/// Typed service identifier.
///
/// Declared as a `const` next to the composition root. The type parameter
/// is what `get` hands back, so it is normally a cheap-to-clone handle such
/// as `Arc<T>` or `Arc<dyn Trait>`.
pub struct Service<T> {
    id: &'static str,
    marker: PhantomData<fn() -> T>,
}

impl<T> Service<T> {
    /// Declares a service identifier.
    pub const fn new(id: &'static str) -> Self {
        Self { id, marker: PhantomData }
    }

    /// Returns the service id.
    pub const fn id(&self) -> &'static str {
        self.id
    }

    /// Erased key of the unqualified registration.
    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(self.id, type_name::<T>())
    }

    /// Erased key of the registration qualified by `name`.
    pub fn named_key(&self, name: impl Into<Cow<'static, str>>) -> ServiceKey {
        self.key().with_name(name)
    }
}

impl<T> Clone for Service<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Service<T> {}

impl<T> fmt::Debug for Service<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Service({}: {})", self.id, shorten_type_name(type_name::<T>()))
    }
}
