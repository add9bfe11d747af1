//! Persisted runtime store: compiled agent configs and discovered tool lists
//! consumed by the execution runtime.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::resources::{DiscoveredTool, ObjectRef};
use crate::translator::types::{AgentConfig, RemoteEndpoint};

/// What the runtime needs to reach a tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolServerRecord {
    pub endpoint: RemoteEndpoint,
    pub tools: Vec<DiscoveredTool>,
}

#[async_trait]
pub trait RuntimeStore: Send + Sync {
    async fn upsert_agent(&self, key: &ObjectRef, config: &AgentConfig) -> anyhow::Result<()>;
    async fn delete_agent(&self, key: &ObjectRef) -> anyhow::Result<()>;
    async fn upsert_tool_server(
        &self,
        key: &ObjectRef,
        record: &ToolServerRecord,
    ) -> anyhow::Result<()>;
    async fn delete_tool_server(&self, key: &ObjectRef) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct MemoryRuntimeStore {
    agents: RwLock<BTreeMap<ObjectRef, AgentConfig>>,
    tool_servers: RwLock<BTreeMap<ObjectRef, ToolServerRecord>>,
}

impl MemoryRuntimeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn agent(&self, key: &ObjectRef) -> Option<AgentConfig> {
        self.agents.read().await.get(key).cloned()
    }

    pub async fn tool_server(&self, key: &ObjectRef) -> Option<ToolServerRecord> {
        self.tool_servers.read().await.get(key).cloned()
    }
}

#[async_trait]
impl RuntimeStore for MemoryRuntimeStore {
    async fn upsert_agent(&self, key: &ObjectRef, config: &AgentConfig) -> anyhow::Result<()> {
        self.agents.write().await.insert(key.clone(), config.clone());
        Ok(())
    }

    async fn delete_agent(&self, key: &ObjectRef) -> anyhow::Result<()> {
        self.agents.write().await.remove(key);
        Ok(())
    }

    async fn upsert_tool_server(
        &self,
        key: &ObjectRef,
        record: &ToolServerRecord,
    ) -> anyhow::Result<()> {
        self.tool_servers
            .write()
            .await
            .insert(key.clone(), record.clone());
        Ok(())
    }

    async fn delete_tool_server(&self, key: &ObjectRef) -> anyhow::Result<()> {
        self.tool_servers.write().await.remove(key);
        Ok(())
    }
}

/// One JSON file per record under `<root>/agents` and `<root>/tool-servers`.
pub struct FileRuntimeStore {
    root: PathBuf,
}

impl FileRuntimeStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, section: &str, key: &ObjectRef) -> PathBuf {
        self.root
            .join(section)
            .join(format!("{}__{}.json", key.namespace, key.name))
    }

    async fn write_json<T: Serialize + Sync>(path: &Path, value: &T) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let body = serde_json::to_vec_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("failed to move {} into place", path.display()))?;
        Ok(())
    }

    async fn remove(path: &Path) -> anyhow::Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to remove {}", path.display())),
        }
    }

    pub async fn read_agent(&self, key: &ObjectRef) -> anyhow::Result<Option<AgentConfig>> {
        let path = self.path_for("agents", key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(
                serde_json::from_slice(&bytes)
                    .with_context(|| format!("corrupt agent record {}", path.display()))?,
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }
}

#[async_trait]
impl RuntimeStore for FileRuntimeStore {
    async fn upsert_agent(&self, key: &ObjectRef, config: &AgentConfig) -> anyhow::Result<()> {
        Self::write_json(&self.path_for("agents", key), config).await
    }

    async fn delete_agent(&self, key: &ObjectRef) -> anyhow::Result<()> {
        Self::remove(&self.path_for("agents", key)).await
    }

    async fn upsert_tool_server(
        &self,
        key: &ObjectRef,
        record: &ToolServerRecord,
    ) -> anyhow::Result<()> {
        Self::write_json(&self.path_for("tool-servers", key), record).await
    }

    async fn delete_tool_server(&self, key: &ObjectRef) -> anyhow::Result<()> {
        Self::remove(&self.path_for("tool-servers", key)).await
    }
}
