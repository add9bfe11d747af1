//! Error types for the store, translator and reconciler.

use crate::resources::{Kind, ObjectRef, ReferenceError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {reference} not found")]
    NotFound { kind: Kind, reference: ObjectRef },
    #[error(
        "apply conflict on {kind} {reference}: owned by field manager '{owner}', '{requested}' did not force"
    )]
    Conflict {
        kind: Kind,
        reference: ObjectRef,
        owner: String,
        requested: String,
    },
    #[error("store backend error: {0}")]
    Backend(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("{resource} names unknown provider '{provider}'")]
    UnknownProvider { resource: ObjectRef, provider: String },
    #[error("{resource} ({provider}) is missing required field {field}")]
    MissingProviderConfig {
        resource: ObjectRef,
        provider: String,
        field: &'static str,
    },
    #[error("secret {secret} has no key '{key}'")]
    UnresolvedSecret { secret: ObjectRef, key: String },
    #[error("config map {config_map} has no key '{key}'")]
    UnresolvedConfigMap { config_map: ObjectRef, key: String },
    #[error("agent {agent} references itself as a tool")]
    SelfReference { agent: ObjectRef },
    #[error("agent {caller} references {callee}, which is already on the reference path (cycle)")]
    Cycle { caller: ObjectRef, callee: ObjectRef },
    #[error("agent {callee} referenced from {caller} exceeds the maximum nesting depth of {max}")]
    DepthExceeded {
        caller: ObjectRef,
        callee: ObjectRef,
        max: usize,
    },
    #[error("unknown tool server kind '{kind}' for {reference}")]
    UnknownToolServerKind { kind: String, reference: String },
    #[error("service {service} exposes no usable MCP port")]
    MissingServicePort { service: ObjectRef },
    #[error("tool server {server}: {reason}")]
    InvalidToolServer {
        server: ObjectRef,
        reason: &'static str,
    },
    #[error("BYO agent {agent} has no deployment image")]
    MissingImage { agent: ObjectRef },
    #[error("{kind} {reference} not found")]
    NotFound { kind: Kind, reference: ObjectRef },
    #[error(transparent)]
    InvalidReference(#[from] ReferenceError),
    #[error(transparent)]
    Store(StoreError),
    #[error("failed to serialize agent config: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<StoreError> for TranslateError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, reference } => TranslateError::NotFound { kind, reference },
            other => TranslateError::Store(other),
        }
    }
}

impl TranslateError {
    /// Configuration errors need an operator edit; retrying cannot help.
    pub fn is_config_error(&self) -> bool {
        !matches!(self, TranslateError::Store(_) | TranslateError::Serialize(_))
    }

    /// Short CamelCase reason for status conditions.
    pub fn reason(&self) -> &'static str {
        match self {
            TranslateError::UnknownProvider { .. } => "UnknownProvider",
            TranslateError::MissingProviderConfig { .. } => "MissingProviderConfig",
            TranslateError::UnresolvedSecret { .. } => "UnresolvedSecret",
            TranslateError::UnresolvedConfigMap { .. } => "UnresolvedConfigMap",
            TranslateError::SelfReference { .. } => "SelfReference",
            TranslateError::Cycle { .. } => "CycleDetected",
            TranslateError::DepthExceeded { .. } => "DepthExceeded",
            TranslateError::UnknownToolServerKind { .. } => "UnknownToolServerKind",
            TranslateError::MissingServicePort { .. } => "MissingServicePort",
            TranslateError::InvalidToolServer { .. } => "InvalidToolServer",
            TranslateError::MissingImage { .. } => "MissingImage",
            TranslateError::NotFound { .. } => "NotFound",
            TranslateError::InvalidReference(_) => "InvalidReference",
            TranslateError::Store(_) => "StoreError",
            TranslateError::Serialize(_) => "SerializationError",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Translate(#[from] TranslateError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("runtime store: {0:#}")]
    Runtime(anyhow::Error),
    #[error("tool discovery for {server} failed: {message}")]
    Discovery { server: ObjectRef, message: String },
    #[error("{} dependent(s) failed: {}", .0.len(), summarize(.0))]
    Aggregate(Vec<(ObjectRef, ReconcileError)>),
}

fn summarize(errors: &[(ObjectRef, ReconcileError)]) -> String {
    errors
        .iter()
        .map(|(r, e)| format!("{r}: {e}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ReconcileError {
    /// Transient failures are requeued; configuration errors wait for an edit.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::Translate(e) => !e.is_config_error(),
            ReconcileError::Store(_) | ReconcileError::Runtime(_) => true,
            ReconcileError::Discovery { .. } => true,
            ReconcileError::Aggregate(errors) => errors.iter().any(|(_, e)| e.is_retryable()),
        }
    }

    /// CamelCase reason recorded on the `Accepted` condition.
    pub fn reason(&self) -> &'static str {
        match self {
            ReconcileError::Translate(e) => e.reason(),
            ReconcileError::Store(_) => "StoreError",
            ReconcileError::Runtime(_) => "RuntimeStoreError",
            ReconcileError::Discovery { .. } => "DiscoveryFailed",
            ReconcileError::Aggregate(_) => "DependentsFailed",
        }
    }

    /// Collapse a batch of per-agent failures; `Ok` when the batch succeeded.
    pub fn aggregate(errors: Vec<(ObjectRef, ReconcileError)>) -> Result<(), ReconcileError> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ReconcileError::Aggregate(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_becomes_translate_not_found() {
        let err: TranslateError = StoreError::NotFound {
            kind: Kind::ModelConfig,
            reference: ObjectRef::new("ns", "m"),
        }
        .into();
        assert!(matches!(err, TranslateError::NotFound { .. }));
        assert!(err.is_config_error());
        assert_eq!(err.to_string(), "ModelConfig ns/m not found");
    }

    #[test]
    fn aggregate_is_retryable_when_any_member_is() {
        let config = ReconcileError::Translate(TranslateError::SelfReference {
            agent: ObjectRef::new("ns", "a"),
        });
        assert!(!config.is_retryable());
        let transient = ReconcileError::Store(StoreError::Backend("down".into()));
        let all = ReconcileError::Aggregate(vec![
            (ObjectRef::new("ns", "a"), config),
            (ObjectRef::new("ns", "b"), transient),
        ]);
        assert!(all.is_retryable());
        assert!(all.to_string().starts_with("2 dependent(s) failed"));
    }

    #[test]
    fn cycle_message_mentions_both_agents() {
        let err = TranslateError::Cycle {
            caller: ObjectRef::new("ns", "b"),
            callee: ObjectRef::new("ns", "a"),
        };
        let msg = err.to_string();
        assert!(msg.contains("ns/a") && msg.contains("ns/b"));
        assert_eq!(err.reason(), "CycleDetected");
    }
}
