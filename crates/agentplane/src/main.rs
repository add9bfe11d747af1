use std::sync::Arc;

use anyhow::Context;

use agentplane::a2a::{
    A2aState, AgentExecutor, HandlerRegistry, HttpExecutor, MemorySessionStore, TaskManager,
    router,
};
use agentplane::config::{self, Settings};
use agentplane::controller::Controller;
use agentplane::logging;
use agentplane::reconciler::{McpToolDiscoverer, Reconciler};
use agentplane::store::manifests::ManifestLoader;
use agentplane::store::{
    FileRuntimeStore, MemoryRuntimeStore, MemoryStore, ResourceStore, RuntimeStore,
};
use agentplane::translator::Translator;

/// Per-request event buffer for streaming responses.
const STREAM_BUFFER: usize = 64;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let home = config::agentplane_home();
    let (user_cfg, cfg_error) = match config::load_user_config(&home) {
        Ok(cfg) => (cfg, None),
        Err(e) => (None, Some(e)),
    };
    logging::init_tracing(&home, user_cfg.as_ref());
    if let Some(e) = cfg_error {
        tracing::warn!("ignoring user config: {:#}", e);
    }
    let settings = Settings::resolve(user_cfg.unwrap_or_default(), |k| {
        std::env::var_os(k).is_some()
    });
    tracing::debug!("settings: {:?}", settings);

    let store: Arc<dyn ResourceStore> = Arc::new(MemoryStore::new());
    let runtime: Arc<dyn RuntimeStore> = match &settings.runtime_store_dir {
        Some(dir) => {
            tracing::info!("runtime records under {}", dir.display());
            Arc::new(FileRuntimeStore::new(dir.clone()))
        }
        None => Arc::new(MemoryRuntimeStore::new()),
    };
    let registry = Arc::new(HandlerRegistry::new());
    let executor: Arc<dyn AgentExecutor> = Arc::new(HttpExecutor::new(settings.runtime_url.clone()));
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        Translator::new(store.clone(), settings.translator_options()),
        runtime,
        registry.clone(),
        executor,
        Arc::new(McpToolDiscoverer::new(settings.discovery_timeout)),
    ));

    let mut loader = ManifestLoader::new(settings.manifest_dir.clone(), store.clone());
    match loader.sync().await {
        Ok(s) => tracing::info!(
            "loaded {} manifests from {}",
            s.applied,
            settings.manifest_dir.display()
        ),
        Err(e) => tracing::warn!("initial manifest sync failed: {:#}", e),
    }
    let loader_task = tokio::spawn(loader.run(settings.manifest_poll));
    let controller_task = tokio::spawn(
        Controller::new(reconciler, settings.requeue_after).run(settings.discovery_interval),
    );

    let state = A2aState {
        registry,
        sessions: Arc::new(MemorySessionStore::new()),
        tasks: TaskManager::new(),
        request_timeout: settings.request_timeout,
        stream_buffer: STREAM_BUFFER,
    };
    let listener = tokio::net::TcpListener::bind((settings.host.as_str(), settings.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", settings.host, settings.port))?;
    tracing::info!(
        "A2A server listening on {} (advertised as {})",
        listener.local_addr()?,
        settings.a2a_base_url
    );

    let served = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("A2A server failed");
    loader_task.abort();
    controller_task.abort();
    served
}
