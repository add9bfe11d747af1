//! In-process resource store.
//!
//! Mirrors the parts of API-server behaviour the control plane relies on:
//! uid assignment, generation bumps on spec change, field-manager conflicts,
//! owner-reference garbage collection and a broadcast watch.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};

use super::{ResourceStore, WatchEvent};
use crate::error::StoreError;
use crate::resources::{Kind, Object, ObjectRef};

const WATCH_CAPACITY: usize = 1024;

type Key = (Kind, ObjectRef);

pub struct MemoryStore {
    objects: RwLock<BTreeMap<Key, Object>>,
    events: broadcast::Sender<WatchEvent>,
    applies: RwLock<HashMap<String, usize>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            objects: RwLock::new(BTreeMap::new()),
            events,
            applies: RwLock::new(HashMap::new()),
        }
    }

    /// Number of `apply` calls made by `field_manager`, including no-ops.
    pub async fn apply_count(&self, field_manager: &str) -> usize {
        self.applies
            .read()
            .await
            .get(field_manager)
            .copied()
            .unwrap_or(0)
    }

    fn emit(&self, event: WatchEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn is_owned_by(object: &Object, owner: &Object) -> bool {
    let meta = object.metadata();
    let owner_meta = owner.metadata();
    meta.namespace == owner_meta.namespace
        && meta.owner_references.iter().any(|r| {
            r.kind == owner.kind().as_str()
                && r.name == owner_meta.name
                && (r.uid.is_empty() || r.uid == owner_meta.uid)
        })
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get(&self, kind: Kind, reference: &ObjectRef) -> Result<Option<Object>, StoreError> {
        Ok(self
            .objects
            .read()
            .await
            .get(&(kind, reference.clone()))
            .cloned())
    }

    async fn list(&self, kind: Kind, namespace: Option<&str>) -> Result<Vec<Object>, StoreError> {
        Ok(self
            .objects
            .read()
            .await
            .iter()
            .filter(|((k, r), _)| *k == kind && namespace.is_none_or(|ns| r.namespace == ns))
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn apply(
        &self,
        mut object: Object,
        field_manager: &str,
        force: bool,
    ) -> Result<Object, StoreError> {
        let kind = object.kind();
        let reference = object.object_ref();
        if reference.name.is_empty() || reference.namespace.is_empty() {
            return Err(StoreError::Backend(format!(
                "{kind} must have a name and namespace"
            )));
        }
        *self
            .applies
            .write()
            .await
            .entry(field_manager.to_string())
            .or_default() += 1;

        let key = (kind, reference.clone());
        let mut objects = self.objects.write().await;
        match objects.get(&key).cloned() {
            Some(existing) => {
                if let Some(owner) = existing.metadata().field_manager.as_deref()
                    && owner != field_manager
                    && !force
                {
                    return Err(StoreError::Conflict {
                        kind,
                        reference,
                        owner: owner.to_string(),
                        requested: field_manager.to_string(),
                    });
                }
                let spec_changed = existing.spec_fingerprint() != object.spec_fingerprint();
                let old = existing.metadata();
                let meta = object.metadata_mut();
                meta.uid = old.uid.clone();
                meta.generation = if spec_changed {
                    old.generation + 1
                } else {
                    old.generation
                };
                meta.field_manager = Some(field_manager.to_string());
                object.copy_status_from(&existing);
                if object == existing {
                    tracing::trace!("apply {} {}: unchanged", kind, reference);
                    return Ok(existing);
                }
            }
            None => {
                let meta = object.metadata_mut();
                meta.uid = uuid::Uuid::new_v4().to_string();
                meta.generation = 1;
                meta.field_manager = Some(field_manager.to_string());
            }
        }
        objects.insert(key, object.clone());
        drop(objects);
        tracing::debug!(
            "applied {} {} (generation={}, manager={})",
            kind,
            reference,
            object.metadata().generation,
            field_manager
        );
        self.emit(WatchEvent::Applied(object.clone()));
        Ok(object)
    }

    async fn update_status(&self, object: &Object) -> Result<Object, StoreError> {
        let kind = object.kind();
        let reference = object.object_ref();
        let mut objects = self.objects.write().await;
        let Some(existing) = objects.get_mut(&(kind, reference.clone())) else {
            return Err(StoreError::NotFound { kind, reference });
        };
        let mut updated = existing.clone();
        if !updated.copy_status_from(object) {
            return Err(StoreError::Backend(format!(
                "{kind} has no status subresource"
            )));
        }
        if updated == *existing {
            return Ok(updated);
        }
        *existing = updated.clone();
        drop(objects);
        tracing::debug!("updated status of {} {}", kind, reference);
        self.emit(WatchEvent::StatusUpdated(updated.clone()));
        Ok(updated)
    }

    async fn delete(&self, kind: Kind, reference: &ObjectRef) -> Result<bool, StoreError> {
        let mut objects = self.objects.write().await;
        let Some(root) = objects.remove(&(kind, reference.clone())) else {
            return Ok(false);
        };
        let mut removed = vec![root];
        let mut next = 0;
        while next < removed.len() {
            let owner = &removed[next];
            let dependents: Vec<Key> = objects
                .iter()
                .filter(|(_, o)| is_owned_by(o, owner))
                .map(|(k, _)| k.clone())
                .collect();
            for key in dependents {
                if let Some(o) = objects.remove(&key) {
                    removed.push(o);
                }
            }
            next += 1;
        }
        drop(objects);
        tracing::debug!(
            "deleted {} {} (collected {} owned object(s))",
            kind,
            reference,
            removed.len() - 1
        );
        for o in removed {
            self.emit(WatchEvent::Deleted(o));
        }
        Ok(true)
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{
        API_VERSION, ConfigMap, ModelConfig, ObjectMeta, OwnerReference, Resource,
    };
    use crate::store::get_typed;

    fn model(name: &str, model: &str) -> Object {
        let mut m = ModelConfig {
            metadata: ObjectMeta::new("ns", name),
            ..Default::default()
        };
        m.spec.model = model.into();
        m.spec.provider = "OpenAI".into();
        m.into_object()
    }

    #[tokio::test]
    async fn generation_bumps_only_on_spec_change() {
        let store = MemoryStore::new();
        let first = store.apply(model("m", "gpt-4o"), "op", false).await.unwrap();
        assert_eq!(first.metadata().generation, 1);
        assert!(!first.metadata().uid.is_empty());

        let same = store.apply(model("m", "gpt-4o"), "op", false).await.unwrap();
        assert_eq!(same.metadata().generation, 1);
        assert_eq!(same.metadata().uid, first.metadata().uid);

        let changed = store.apply(model("m", "gpt-5"), "op", false).await.unwrap();
        assert_eq!(changed.metadata().generation, 2);
        assert_eq!(store.apply_count("op").await, 3);
    }

    #[tokio::test]
    async fn conflicting_manager_needs_force() {
        let store = MemoryStore::new();
        store.apply(model("m", "a"), "alice", false).await.unwrap();
        let err = store.apply(model("m", "b"), "bob", false).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        let forced = store.apply(model("m", "b"), "bob", true).await.unwrap();
        assert_eq!(forced.metadata().field_manager.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn apply_preserves_status() {
        let store = MemoryStore::new();
        let stored = store.apply(model("m", "a"), "op", false).await.unwrap();
        let Object::ModelConfig(mut with_status) = stored else {
            panic!("wrong kind");
        };
        with_status.status.observed_generation = 1;
        store
            .update_status(&with_status.clone().into_object())
            .await
            .unwrap();

        store.apply(model("m", "a"), "op", false).await.unwrap();
        let fetched: ModelConfig = get_typed(&store, &ObjectRef::new("ns", "m"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.status.observed_generation, 1);
    }

    #[tokio::test]
    async fn delete_collects_owned_objects_transitively() {
        let store = MemoryStore::new();
        let owner = store.apply(model("m", "a"), "op", false).await.unwrap();
        let owner_ref = |kind: &str, name: &str, uid: &str| OwnerReference {
            api_version: API_VERSION.into(),
            kind: kind.into(),
            name: name.into(),
            uid: uid.into(),
            controller: true,
        };
        let mut child = ConfigMap {
            metadata: ObjectMeta::new("ns", "child"),
            ..Default::default()
        };
        child
            .metadata
            .owner_references
            .push(owner_ref("ModelConfig", "m", &owner.metadata().uid));
        let child = store.apply(child.into_object(), "op", false).await.unwrap();
        let mut grandchild = ConfigMap {
            metadata: ObjectMeta::new("ns", "grandchild"),
            ..Default::default()
        };
        grandchild
            .metadata
            .owner_references
            .push(owner_ref("ConfigMap", "child", &child.metadata().uid));
        store
            .apply(grandchild.into_object(), "op", false)
            .await
            .unwrap();
        let bystander = ConfigMap {
            metadata: ObjectMeta::new("ns", "other"),
            ..Default::default()
        };
        store
            .apply(bystander.into_object(), "op", false)
            .await
            .unwrap();

        let mut rx = store.watch();
        assert!(
            store
                .delete(Kind::ModelConfig, &ObjectRef::new("ns", "m"))
                .await
                .unwrap()
        );
        let remaining = store.list(Kind::ConfigMap, Some("ns")).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].metadata().name, "other");

        let mut deleted = Vec::new();
        while let Ok(WatchEvent::Deleted(o)) = rx.try_recv() {
            deleted.push(o.metadata().name.clone());
        }
        assert_eq!(deleted, vec!["m", "child", "grandchild"]);
    }

    #[tokio::test]
    async fn list_filters_by_namespace() {
        let store = MemoryStore::new();
        store.apply(model("m", "a"), "op", false).await.unwrap();
        let mut other = model("n", "a");
        other.metadata_mut().namespace = "elsewhere".into();
        store.apply(other, "op", false).await.unwrap();
        assert_eq!(store.list(Kind::ModelConfig, None).await.unwrap().len(), 2);
        assert_eq!(
            store
                .list(Kind::ModelConfig, Some("elsewhere"))
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
