//! Drives stored objects toward their translated form.
//!
//! An Agent reconcile translates, applies the manifest set when the content
//! hash moved, persists the compiled config to the runtime store and
//! (re)registers the A2A handler. Changes to anything an Agent reads fan out
//! to every dependent Agent.

pub mod deps;
pub mod discovery;
pub mod status;

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::a2a::{AgentExecutor, ExecutorHandler, HandlerRegistry};
use crate::error::ReconcileError;
use crate::resources::{
    Agent, ConditionStatus, ConditionType, Deployment, Kind, Object, ObjectRef, Resource,
};
use crate::store::{ResourceStore, RuntimeStore, ToolServerRecord, get_typed};
use crate::translator::Translator;
use crate::translator::tools::{ToolServerKind, server_endpoint};

pub use discovery::{McpToolDiscoverer, ToolDiscoverer};

/// Field manager for everything the reconciler applies.
pub const FIELD_MANAGER: &str = "agentplane";

pub struct Reconciler {
    store: Arc<dyn ResourceStore>,
    translator: Translator,
    runtime: Arc<dyn RuntimeStore>,
    registry: Arc<HandlerRegistry>,
    executor: Arc<dyn AgentExecutor>,
    discoverer: Arc<dyn ToolDiscoverer>,
    upsert_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        translator: Translator,
        runtime: Arc<dyn RuntimeStore>,
        registry: Arc<HandlerRegistry>,
        executor: Arc<dyn AgentExecutor>,
        discoverer: Arc<dyn ToolDiscoverer>,
    ) -> Self {
        Self {
            store,
            translator,
            runtime,
            registry,
            executor,
            discoverer,
            upsert_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    /// Reconcile whatever is (or was) stored under `kind`/`reference`.
    pub async fn reconcile(&self, kind: Kind, reference: &ObjectRef) -> Result<(), ReconcileError> {
        tracing::debug!("reconcile {} {}", kind, reference);
        match kind {
            Kind::Agent => self.reconcile_agent_tree(reference).await,
            Kind::Deployment => match get_typed::<Deployment>(&*self.store, reference).await? {
                Some(d) if d.metadata.is_owned_by(Kind::Agent.as_str(), &d.metadata.name) => {
                    self.reconcile_agent(reference).await
                }
                _ => Ok(()),
            },
            Kind::ServiceAccount => Ok(()),
            _ => self.reconcile_dependency(kind, reference).await,
        }
    }

    /// The agent itself, then every agent that nests it. Parents compile the
    /// agent inline, so they are re-reconciled even when the agent failed.
    async fn reconcile_agent_tree(&self, reference: &ObjectRef) -> Result<(), ReconcileError> {
        let mut errors = Vec::new();
        if let Err(e) = self.reconcile_agent(reference).await {
            errors.push((reference.clone(), e));
        }
        let snapshot = deps::Snapshot::load(&*self.store).await?;
        for parent in deps::dependents(&snapshot, Kind::Agent, reference) {
            if parent == *reference {
                continue;
            }
            if let Err(e) = self.reconcile_agent(&parent).await {
                errors.push((parent, e));
            }
        }
        ReconcileError::aggregate(errors)
    }

    /// Reconcile a single Agent.
    pub async fn reconcile_agent(&self, reference: &ObjectRef) -> Result<(), ReconcileError> {
        let Some(agent) = get_typed::<Agent>(&*self.store, reference).await? else {
            self.registry.remove_handler(reference).await;
            let _guard = self.upsert_lock.lock().await;
            self.runtime
                .delete_agent(reference)
                .await
                .map_err(ReconcileError::Runtime)?;
            tracing::info!("agent {} removed", reference);
            return Ok(());
        };

        let outcome = self.apply_agent(&agent).await;
        if let Err(e) = &outcome {
            tracing::warn!("agent {} not accepted: {}", reference, e);
        }
        let written = self
            .write_agent_status(reference, outcome.as_ref().map(String::as_str))
            .await;
        match (outcome, written) {
            (Ok(_), written) => written,
            (Err(e), Ok(())) => Err(e),
            // The translate error decides retries, not the status write.
            (Err(e), Err(status_err)) => {
                tracing::warn!("failed to record status of agent {}: {}", reference, status_err);
                Err(e)
            }
        }
    }

    /// Translate and push the result everywhere it goes. Returns the hash.
    async fn apply_agent(&self, agent: &Agent) -> Result<String, ReconcileError> {
        let reference = agent.metadata.object_ref();
        let outputs = self.translator.translate(agent).await?;

        if agent.status.config_hash.as_deref() != Some(outputs.hash.as_str()) {
            for manifest in outputs.manifests.iter().cloned() {
                self.store.apply(manifest, FIELD_MANAGER, true).await?;
            }
            tracing::info!(
                "applied {} manifests for {} ({})",
                outputs.manifests.len(),
                reference,
                &outputs.hash[..12]
            );
        }

        {
            let _guard = self.upsert_lock.lock().await;
            self.runtime
                .upsert_agent(&reference, &outputs.config)
                .await
                .map_err(ReconcileError::Runtime)?;
        }

        self.registry
            .set_handler(
                reference,
                outputs.config.card.clone(),
                Arc::new(ExecutorHandler::new(
                    self.executor.clone(),
                    outputs.config.clone(),
                )),
            )
            .await;
        Ok(outputs.hash)
    }

    async fn write_agent_status(
        &self,
        reference: &ObjectRef,
        outcome: Result<&str, &ReconcileError>,
    ) -> Result<(), ReconcileError> {
        let Some(mut agent) = get_typed::<Agent>(&*self.store, reference).await? else {
            return Ok(());
        };
        let before = agent.status.clone();
        let generation = agent.metadata.generation;
        let st = &mut agent.status;
        st.observed_generation = generation;
        status::set_accepted(&mut st.conditions, outcome.map(|_| ()), generation);
        if let Ok(hash) = outcome {
            st.config_hash = Some(hash.to_string());
        }

        let available = get_typed::<Deployment>(&*self.store, reference)
            .await?
            .map(|d| d.status.available_replicas)
            .unwrap_or(0);
        let (ready, reason, message) = if available > 0 {
            (
                ConditionStatus::True,
                status::REASON_READY,
                format!("{available} replica(s) available"),
            )
        } else {
            (
                ConditionStatus::False,
                status::REASON_NOT_READY,
                "no replicas available".to_string(),
            )
        };
        status::set_condition(
            &mut st.conditions,
            ConditionType::Ready,
            ready,
            reason,
            &message,
            generation,
        );

        if agent.status != before {
            self.store.update_status(&agent.into_object()).await?;
        }
        Ok(())
    }

    async fn reconcile_dependency(
        &self,
        kind: Kind,
        reference: &ObjectRef,
    ) -> Result<(), ReconcileError> {
        let object = self.store.get(kind, reference).await?;
        if let Some(obj) = &object
            && obj
                .metadata()
                .owner_references
                .iter()
                .any(|o| o.kind == Kind::Agent.as_str())
        {
            return Ok(());
        }

        let mut errors = Vec::new();
        if matches!(kind, Kind::ToolServer | Kind::RemoteMcpServer) {
            let discovered = match &object {
                Some(_) => self.discover(kind, reference).await,
                None => self.forget_tool_server(reference).await,
            };
            if let Err(e) = discovered {
                errors.push((reference.clone(), e));
            }
        }

        let snapshot = deps::Snapshot::load(&*self.store).await?;
        let dependents = deps::dependents(&snapshot, kind, reference);
        if !dependents.is_empty() {
            tracing::debug!(
                "{} {} change affects {} agent(s)",
                kind,
                reference,
                dependents.len()
            );
        }
        for agent in dependents {
            if let Err(e) = self.reconcile_agent(&agent).await {
                errors.push((agent, e));
            }
        }

        let result = ReconcileError::aggregate(errors);
        if object.is_some() {
            self.write_accepted(kind, reference, result.as_ref().err())
                .await?;
        }
        result
    }

    async fn write_accepted(
        &self,
        kind: Kind,
        reference: &ObjectRef,
        error: Option<&ReconcileError>,
    ) -> Result<(), ReconcileError> {
        let Some(mut object) = self.store.get(kind, reference).await? else {
            return Ok(());
        };
        let generation = object.metadata().generation;
        let Some((conditions, observed)) = status::conditions_mut(&mut object) else {
            return Ok(());
        };
        let outcome = match error {
            Some(e) => Err(e),
            None => Ok(()),
        };
        let mut changed = status::set_accepted(conditions, outcome, generation);
        if *observed != generation {
            *observed = generation;
            changed = true;
        }
        if changed {
            self.store.update_status(&object).await?;
        }
        Ok(())
    }

    /// List a tool server's tools and record them in status and the runtime
    /// store.
    pub async fn discover(&self, kind: Kind, reference: &ObjectRef) -> Result<(), ReconcileError> {
        let server_kind = match kind {
            Kind::ToolServer => ToolServerKind::ToolServer,
            _ => ToolServerKind::RemoteMcpServer,
        };
        let endpoint = server_endpoint(&*self.store, server_kind, reference).await?;
        let tools = self
            .discoverer
            .list_tools(&endpoint)
            .await
            .map_err(|e| ReconcileError::Discovery {
                server: reference.clone(),
                message: format!("{e:#}"),
            })?;

        {
            let _guard = self.upsert_lock.lock().await;
            let record = ToolServerRecord {
                endpoint,
                tools: tools.clone(),
            };
            self.runtime
                .upsert_tool_server(reference, &record)
                .await
                .map_err(ReconcileError::Runtime)?;
        }

        let Some(mut object) = self.store.get(kind, reference).await? else {
            return Ok(());
        };
        let current = match &mut object {
            Object::ToolServer(s) => &mut s.status.discovered_tools,
            Object::RemoteMcpServer(s) => &mut s.status.discovered_tools,
            _ => return Ok(()),
        };
        if *current != tools {
            tracing::info!("{} {} now exposes {} tool(s)", kind, reference, tools.len());
            *current = tools;
            self.store.update_status(&object).await?;
        }
        Ok(())
    }

    async fn forget_tool_server(&self, reference: &ObjectRef) -> Result<(), ReconcileError> {
        let _guard = self.upsert_lock.lock().await;
        self.runtime
            .delete_tool_server(reference)
            .await
            .map_err(ReconcileError::Runtime)
    }

    /// Re-run discovery for every stored tool server. Failures are logged.
    pub async fn refresh_discovery(&self) -> Result<(), ReconcileError> {
        for kind in [Kind::ToolServer, Kind::RemoteMcpServer] {
            for object in self.store.list(kind, None).await? {
                let reference = object.object_ref();
                if let Err(e) = self.discover(kind, &reference).await {
                    tracing::warn!("periodic discovery of {} {} failed: {}", kind, reference, e);
                }
            }
        }
        Ok(())
    }
}
