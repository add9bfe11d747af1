//! The `Memory` resource: a vector-memory provider for agents.

use serde::{Deserialize, Serialize};

use super::meta::ObjectMeta;
use super::status::BasicStatus;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: MemorySpec,
    #[serde(default)]
    pub status: BasicStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySpec {
    /// Only `Pinecone` is supported.
    pub provider: String,
    #[serde(default)]
    pub api_key_secret_ref: String,
    #[serde(default)]
    pub api_key_secret_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinecone: Option<PineconeConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PineconeConfig {
    pub index_host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub record_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_threshold: Option<String>,
}
