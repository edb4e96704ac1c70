//! Route registry.
//!
//! One ordered list of manifests per HTTP method, filled at startup and then
//! frozen inside the [`Dispatcher`](crate::Dispatcher). Requests only ever
//! read it, so no locking is involved.

use std::collections::HashMap;

use tracing::info;

use crate::error::Error;
use crate::manifest::{Resource, ResourceManifest};
use crate::method::Method;

/// Every registered operation, grouped by method in registration order.
///
/// Each call takes and returns `self` so registrations chain:
///
/// ```rust
/// use tenon::{Args, BoxError, Method, Registry, ResourceManifest};
///
/// async fn list(_: Args) -> Result<&'static str, BoxError> { Ok("[]") }
///
/// let registry = Registry::new()
///     .register(ResourceManifest::builder(Method::Get, "/users").handler(list).build()?)?;
/// assert_eq!(registry.len(), 1);
/// # Ok::<(), tenon::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct Registry {
    routes: HashMap<Method, Vec<ResourceManifest>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one manifest.
    ///
    /// A manifest with the same method, an equivalent path pattern and
    /// identical consumes and produces as an existing one is rejected.
    pub fn register(mut self, manifest: ResourceManifest) -> Result<Self, Error> {
        let list = self.routes.entry(manifest.method().clone()).or_default();
        if list.iter().any(|m| m.conflicts_with(&manifest)) {
            return Err(Error::DuplicateRoute {
                method: manifest.method().clone(),
                template: manifest.template().to_owned(),
            });
        }
        info!("{manifest} -> {}", manifest.name());
        list.push(manifest);
        Ok(self)
    }

    /// Builds and registers every operation of a resource.
    pub fn mount(self, resource: Resource) -> Result<Self, Error> {
        resource.build()?.into_iter().try_fold(self, Self::register)
    }

    /// Manifests registered for `method`, in registration order.
    pub fn candidates_for(&self, method: Method) -> &[ResourceManifest] {
        self.routes.get(&method).map(Vec::as_slice).unwrap_or_default()
    }

    /// Manifests for a raw request method token. Invalid tokens have none.
    pub fn candidates_for_token(&self, token: &str) -> &[ResourceManifest] {
        token.parse().map(|m| self.candidates_for(m)).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceManifest> {
        self.routes.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
