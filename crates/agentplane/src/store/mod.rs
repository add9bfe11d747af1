//! Storage seams: the cluster resource store and the persisted runtime store.

pub mod manifests;
pub mod memory;
pub mod runtime;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::StoreError;
use crate::resources::{Kind, Object, ObjectRef, Resource};

pub use memory::MemoryStore;
pub use runtime::{FileRuntimeStore, MemoryRuntimeStore, RuntimeStore, ToolServerRecord};

/// Change notification delivered to watchers.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// Created, or spec/metadata changed.
    Applied(Object),
    /// Only the status subresource changed.
    StatusUpdated(Object),
    Deleted(Object),
}

impl WatchEvent {
    pub fn object(&self) -> &Object {
        match self {
            WatchEvent::Applied(o) | WatchEvent::StatusUpdated(o) | WatchEvent::Deleted(o) => o,
        }
    }
}

/// Typed access to the cluster's declarative objects.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get(&self, kind: Kind, reference: &ObjectRef) -> Result<Option<Object>, StoreError>;

    /// List objects of `kind`, optionally restricted to one namespace.
    async fn list(&self, kind: Kind, namespace: Option<&str>) -> Result<Vec<Object>, StoreError>;

    /// Server-side apply. The stored status is preserved; a spec change bumps
    /// `generation`. Fails with `Conflict` when another field manager owns the
    /// object and `force` is false.
    async fn apply(
        &self,
        object: Object,
        field_manager: &str,
        force: bool,
    ) -> Result<Object, StoreError>;

    /// Replace only the status of an existing object.
    async fn update_status(&self, object: &Object) -> Result<Object, StoreError>;

    /// Delete an object and, transitively, everything it owns. Returns false
    /// when nothing was stored under the key.
    async fn delete(&self, kind: Kind, reference: &ObjectRef) -> Result<bool, StoreError>;

    fn watch(&self) -> broadcast::Receiver<WatchEvent>;
}

pub async fn get_typed<T: Resource>(
    store: &dyn ResourceStore,
    reference: &ObjectRef,
) -> Result<Option<T>, StoreError> {
    Ok(store.get(T::KIND, reference).await?.and_then(T::from_object))
}

/// Like [`get_typed`] but a missing object is an error.
pub async fn require_typed<T: Resource>(
    store: &dyn ResourceStore,
    reference: &ObjectRef,
) -> Result<T, StoreError> {
    get_typed::<T>(store, reference)
        .await?
        .ok_or_else(|| StoreError::NotFound {
            kind: T::KIND,
            reference: reference.clone(),
        })
}

pub async fn list_typed<T: Resource>(
    store: &dyn ResourceStore,
    namespace: Option<&str>,
) -> Result<Vec<T>, StoreError> {
    Ok(store
        .list(T::KIND, namespace)
        .await?
        .into_iter()
        .filter_map(T::from_object)
        .collect())
}
