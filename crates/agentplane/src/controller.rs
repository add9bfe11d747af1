//! Watch loop: turns store events into reconciles.
//!
//! Reconciles for different keys run concurrently. A key never has two
//! reconciles in flight; an event arriving meanwhile marks it dirty and it
//! runs once more when the current pass finishes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;

use crate::reconciler::Reconciler;
use crate::resources::{Kind, Object, ObjectRef};
use crate::store::WatchEvent;

pub type Key = (Kind, ObjectRef);

/// Kinds re-listed on startup and after the watch lagged.
const RESYNC_KINDS: [Kind; 3] = [Kind::Agent, Kind::ToolServer, Kind::RemoteMcpServer];

fn owning_agent(object: &Object) -> Option<ObjectRef> {
    let meta = object.metadata();
    meta.owner_references
        .iter()
        .find(|o| o.kind == Kind::Agent.as_str())
        .map(|o| ObjectRef::new(meta.namespace.clone(), o.name.clone()))
}

/// The reconcile an event calls for, if any.
pub fn trigger_for(event: &WatchEvent) -> Option<Key> {
    let object = event.object();
    match (event, object.kind()) {
        (_, Kind::Deployment) => owning_agent(object).map(|a| (Kind::Agent, a)),
        (WatchEvent::StatusUpdated(_), _) => None,
        (_, Kind::ServiceAccount) => None,
        (_, Kind::ConfigMap | Kind::Service) if owning_agent(object).is_some() => None,
        (_, kind) => Some((kind, object.object_ref())),
    }
}

#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

struct Inner {
    reconciler: Arc<Reconciler>,
    requeue_after: Duration,
    /// Keys with a reconcile in flight; `true` when another pass is owed.
    in_flight: Mutex<HashMap<Key, bool>>,
}

impl Controller {
    pub fn new(reconciler: Arc<Reconciler>, requeue_after: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                reconciler,
                requeue_after,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<Key, bool>> {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enqueue(&self, key: Key) {
        {
            let mut in_flight = self.in_flight();
            if let Some(dirty) = in_flight.get_mut(&key) {
                *dirty = true;
                return;
            }
            in_flight.insert(key.clone(), false);
        }
        let this = self.clone();
        tokio::spawn(async move { this.work(key).await });
    }

    async fn work(&self, key: Key) {
        loop {
            let (kind, reference) = (&key.0, &key.1);
            match self.inner.reconciler.reconcile(*kind, reference).await {
                Ok(()) => tracing::trace!("reconciled {} {}", kind, reference),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        "reconcile {} {} failed, retrying in {:?}: {}",
                        kind,
                        reference,
                        self.inner.requeue_after,
                        e
                    );
                    let this = self.clone();
                    let retry = key.clone();
                    let delay = self.inner.requeue_after;
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        this.enqueue(retry);
                    });
                }
                Err(e) => tracing::warn!("reconcile {} {} failed: {}", kind, reference, e),
            }
            let again = {
                let mut in_flight = self.in_flight();
                match in_flight.get_mut(&key) {
                    Some(dirty) if *dirty => {
                        *dirty = false;
                        true
                    }
                    _ => {
                        in_flight.remove(&key);
                        false
                    }
                }
            };
            if !again {
                break;
            }
        }
    }

    /// Enqueue every object of the kinds that drive reconciliation.
    pub async fn resync(&self) {
        let store = self.inner.reconciler.store().clone();
        for kind in RESYNC_KINDS {
            match store.list(kind, None).await {
                Ok(objects) => {
                    for object in objects {
                        self.enqueue((kind, object.object_ref()));
                    }
                }
                Err(e) => tracing::warn!("resync list of {} failed: {}", kind, e),
            }
        }
    }

    /// Dispatch watch events forever; re-runs tool discovery every
    /// `discovery_interval`.
    pub async fn run(self, discovery_interval: Duration) {
        let mut events = self.inner.reconciler.store().watch();
        self.resync().await;

        let mut ticker = tokio::time::interval(discovery_interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => {
                        if let Some(key) = trigger_for(&event) {
                            self.enqueue(key);
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!("watch lagged by {} events; resyncing", missed);
                        self.resync().await;
                    }
                    Err(RecvError::Closed) => {
                        tracing::info!("watch closed; controller stopping");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    let reconciler = self.inner.reconciler.clone();
                    tokio::spawn(async move {
                        if let Err(e) = reconciler.refresh_discovery().await {
                            tracing::warn!("discovery refresh failed: {}", e);
                        }
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2a::{HandlerRegistry, HttpExecutor};
    use crate::resources::{
        ConfigMap, Deployment, ObjectMeta, OwnerReference, Resource, API_VERSION,
    };
    use crate::store::{MemoryRuntimeStore, ResourceStore};
    use crate::testing;
    use crate::translator::{Translator, TranslatorOptions};

    fn owned(mut meta: ObjectMeta, agent: &str) -> ObjectMeta {
        meta.owner_references.push(OwnerReference {
            api_version: API_VERSION.into(),
            kind: "Agent".into(),
            name: agent.into(),
            uid: String::new(),
            controller: true,
        });
        meta
    }

    #[test]
    fn events_map_to_reconcile_keys() {
        let dep = Deployment {
            metadata: owned(ObjectMeta::new("ns", "a"), "a"),
            ..Default::default()
        }
        .into_object();
        assert_eq!(
            trigger_for(&WatchEvent::StatusUpdated(dep.clone())),
            Some((Kind::Agent, ObjectRef::new("ns", "a")))
        );
        assert_eq!(
            trigger_for(&WatchEvent::Deleted(dep)),
            Some((Kind::Agent, ObjectRef::new("ns", "a")))
        );

        let agent_cm = ConfigMap {
            metadata: owned(ObjectMeta::new("ns", "a"), "a"),
            ..Default::default()
        }
        .into_object();
        assert_eq!(trigger_for(&WatchEvent::Applied(agent_cm)), None);

        let user_cm = ConfigMap {
            metadata: ObjectMeta::new("ns", "tenant"),
            ..Default::default()
        }
        .into_object();
        assert_eq!(
            trigger_for(&WatchEvent::Applied(user_cm)),
            Some((Kind::ConfigMap, ObjectRef::new("ns", "tenant")))
        );

        let agent = testing::agent("ns", "a", "m").into_object();
        assert_eq!(trigger_for(&WatchEvent::StatusUpdated(agent)), None);
    }

    #[tokio::test]
    async fn applied_agent_becomes_routable() {
        let store = testing::store_with(vec![
            testing::model_config("ns", "m", "OpenAI").into_object(),
            testing::secret("ns", "openai", &[("key", "sk")]).into_object(),
        ])
        .await;
        let registry = Arc::new(HandlerRegistry::new());
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            Translator::new(store.clone(), TranslatorOptions::default()),
            Arc::new(MemoryRuntimeStore::new()),
            registry.clone(),
            Arc::new(HttpExecutor::new("http://127.0.0.1:1")),
            Arc::new(testing::StaticDiscoverer::default()),
        ));
        let controller = Controller::new(reconciler, Duration::from_secs(60));
        let task = tokio::spawn(controller.run(Duration::from_secs(3600)));

        testing::put(&*store, testing::agent("ns", "a", "m")).await;
        let a = ObjectRef::new("ns", "a");
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.get(&a).await.is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("agent was never registered");

        store.delete(Kind::Agent, &a).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.get(&a).await.is_some() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("agent was never removed");
        task.abort();
    }
}
