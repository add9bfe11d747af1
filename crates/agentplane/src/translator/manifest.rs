//! Manifest synthesis: ServiceAccount, ConfigMap, Deployment and Service for
//! one compiled agent.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::TranslatorOptions;
use super::types::AgentConfig;
use crate::resources::{
    API_VERSION, Agent, AgentType, ConfigMap, Container, ContainerPort, Deployment,
    DeploymentOverrides, DeploymentSpec, EnvVar, Object, ObjectMeta, OwnerReference, PodSpec,
    PodTemplate, Probe, Resource, ResourceRequirements, Service, ServiceAccount, ServicePort,
    ServiceSpec, Volume, VolumeMount,
};

/// Pod template label carrying the (truncated) content hash.
pub const CONFIG_HASH_LABEL: &str = "config-hash";
/// Pod template annotation carrying the full content hash.
pub const CONFIG_HASH_ANNOTATION: &str = "agentplane.dev/config-hash";
/// Selector label naming the owning agent.
pub const AGENT_LABEL: &str = "agentplane.dev/agent";
/// Label values are bounded at 63 characters.
const HASH_LABEL_LEN: usize = 32;

const CONFIG_VOLUME: &str = "config";
const CONFIG_MOUNT_PATH: &str = "/config";

/// Deployment-affecting values gathered while compiling an agent and its
/// nested agents.
#[derive(Debug, Default, Clone, Serialize)]
pub struct DeploymentInputs {
    pub env: Vec<EnvVar>,
    pub volumes: Vec<Volume>,
    pub volume_mounts: Vec<VolumeMount>,
    /// `namespace/secret#key` → SHA-256 of the value.
    pub secret_digests: BTreeMap<String, String>,
}

impl DeploymentInputs {
    /// Add an env var unless one with the same name is already present.
    pub fn add_env(&mut self, var: EnvVar) {
        if !self.env.iter().any(|e| e.name == var.name) {
            self.env.push(var);
        }
    }

    pub fn add_volume(&mut self, volume: Volume, mount: VolumeMount) {
        if !self.volumes.iter().any(|v| v.name == volume.name) {
            self.volumes.push(volume);
        }
        if !self
            .volume_mounts
            .iter()
            .any(|m| m.mount_path == mount.mount_path)
        {
            self.volume_mounts.push(mount);
        }
    }

    pub fn record_secret(&mut self, id: String, value: &str) {
        self.secret_digests
            .insert(id, hex::encode(Sha256::digest(value.as_bytes())));
    }
}

/// The pod-level inputs after merging ambient, credential and override
/// values. This is both hashed and written into the Deployment.
#[derive(Debug, Clone, Serialize)]
pub struct PodInputs {
    pub env: Vec<EnvVar>,
    pub volumes: Vec<Volume>,
    pub volume_mounts: Vec<VolumeMount>,
}

/// Merge env in precedence order: ambient tracing env and credential env
/// (first definition of a name wins), then per-agent overrides (override
/// replaces). The result is sorted by name.
pub fn merge_env(ambient: &[EnvVar], credentials: &[EnvVar], overrides: &[EnvVar]) -> Vec<EnvVar> {
    let mut merged: BTreeMap<String, EnvVar> = BTreeMap::new();
    for var in ambient.iter().chain(credentials) {
        merged.entry(var.name.clone()).or_insert_with(|| var.clone());
    }
    for var in overrides {
        merged.insert(var.name.clone(), var.clone());
    }
    merged.into_values().collect()
}

pub fn pod_inputs(
    agent: &Agent,
    inputs: &DeploymentInputs,
    options: &TranslatorOptions,
) -> PodInputs {
    let overrides = agent.spec.deployment.clone().unwrap_or_default();
    let mut base = vec![
        EnvVar::value("AGENT_NAME", agent.metadata.name.clone()),
        EnvVar::value("AGENT_NAMESPACE", agent.metadata.namespace.clone()),
        EnvVar::value(
            "AGENT_CONFIG_PATH",
            format!("{CONFIG_MOUNT_PATH}/config.json"),
        ),
    ];
    base.extend(options.ambient_env.iter().cloned());
    let env = merge_env(&base, &inputs.env, &overrides.env);

    let mut volumes = vec![Volume {
        name: CONFIG_VOLUME.to_string(),
        config_map: Some(agent.metadata.name.clone()),
        secret: None,
    }];
    let mut volume_mounts = vec![VolumeMount {
        name: CONFIG_VOLUME.to_string(),
        mount_path: CONFIG_MOUNT_PATH.to_string(),
        read_only: true,
    }];
    for v in inputs.volumes.iter().chain(&overrides.volumes) {
        if !volumes.iter().any(|x| x.name == v.name) {
            volumes.push(v.clone());
        }
    }
    for m in inputs.volume_mounts.iter().chain(&overrides.volume_mounts) {
        if !volume_mounts.iter().any(|x| x.mount_path == m.mount_path) {
            volume_mounts.push(m.clone());
        }
    }
    PodInputs {
        env,
        volumes,
        volume_mounts,
    }
}

#[derive(Serialize)]
struct HashInput<'a> {
    config: &'a AgentConfig,
    pod: &'a PodInputs,
    overrides: Option<&'a DeploymentOverrides>,
    secrets: &'a BTreeMap<String, String>,
    image: &'a str,
}

/// SHA-256 over the compiled config and every deployment-affecting input.
pub fn content_hash(
    config: &AgentConfig,
    pod: &PodInputs,
    agent: &Agent,
    inputs: &DeploymentInputs,
    options: &TranslatorOptions,
) -> Result<String, serde_json::Error> {
    let image = image_for(agent, options).unwrap_or_default();
    let bytes = serde_json::to_vec(&HashInput {
        config,
        pod,
        overrides: agent.spec.deployment.as_ref(),
        secrets: &inputs.secret_digests,
        image: &image,
    })?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Container image: the override when given, the shared runtime image for
/// declarative agents, nothing for a BYO agent without one.
pub fn image_for(agent: &Agent, options: &TranslatorOptions) -> Option<String> {
    let explicit = agent
        .spec
        .deployment
        .as_ref()
        .and_then(|d| d.image.clone())
        .filter(|i| !i.is_empty());
    match agent.spec.agent_type {
        AgentType::Byo => explicit,
        AgentType::Declarative => Some(explicit.unwrap_or_else(|| options.image.clone())),
    }
}

fn owned_meta(agent: &Agent, labels: &BTreeMap<String, String>) -> ObjectMeta {
    let mut meta = ObjectMeta::new(agent.metadata.namespace.clone(), agent.metadata.name.clone());
    meta.labels = labels.clone();
    meta.owner_references.push(OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: Agent::KIND.as_str().to_string(),
        name: agent.metadata.name.clone(),
        uid: agent.metadata.uid.clone(),
        controller: true,
    });
    meta
}

pub struct ManifestSet<'a> {
    pub agent: &'a Agent,
    pub config_json: String,
    pub card_json: String,
    pub pod: PodInputs,
    pub image: String,
    pub hash: &'a str,
}

pub fn build(set: ManifestSet<'_>, options: &TranslatorOptions) -> Vec<Object> {
    let agent = set.agent;
    let name = agent.metadata.name.clone();
    let overrides = agent.spec.deployment.clone().unwrap_or_default();

    let selector = BTreeMap::from([(AGENT_LABEL.to_string(), name.clone())]);
    let mut labels = selector.clone();
    labels.insert("app.kubernetes.io/name".into(), name.clone());
    labels.insert("app.kubernetes.io/managed-by".into(), "agentplane".into());
    labels.extend(overrides.labels.clone());

    let service_account = ServiceAccount {
        metadata: owned_meta(agent, &labels),
    };

    let config_map = ConfigMap {
        metadata: owned_meta(agent, &labels),
        data: BTreeMap::from([
            ("config.json".to_string(), set.config_json),
            ("agent-card.json".to_string(), set.card_json),
        ]),
    };

    let mut pod_labels = labels.clone();
    let short = &set.hash[..set.hash.len().min(HASH_LABEL_LEN)];
    pod_labels.insert(CONFIG_HASH_LABEL.to_string(), short.to_string());
    let mut pod_annotations = overrides.annotations.clone();
    pod_annotations.insert(CONFIG_HASH_ANNOTATION.to_string(), set.hash.to_string());

    let (command, args) = match agent.spec.agent_type {
        AgentType::Byo => (overrides.cmd.clone(), overrides.args.clone()),
        AgentType::Declarative => {
            let args = if overrides.args.is_empty() {
                vec![
                    "serve".to_string(),
                    "--config".to_string(),
                    format!("{CONFIG_MOUNT_PATH}/config.json"),
                    "--port".to_string(),
                    options.port.to_string(),
                ]
            } else {
                overrides.args.clone()
            };
            (overrides.cmd.clone(), args)
        }
    };

    let container = Container {
        name: "agent".to_string(),
        image: set.image,
        image_pull_policy: Some(options.image_pull_policy.clone()),
        command,
        args,
        ports: vec![ContainerPort {
            name: "http".to_string(),
            container_port: options.port,
        }],
        env: set.pod.env,
        volume_mounts: set.pod.volume_mounts,
        readiness_probe: Some(Probe {
            path: "/health".to_string(),
            port: options.port,
            initial_delay_seconds: 15,
            period_seconds: 15,
        }),
        resources: ResourceRequirements {
            requests: BTreeMap::from([
                ("cpu".to_string(), "100m".to_string()),
                ("memory".to_string(), "384Mi".to_string()),
            ]),
            limits: BTreeMap::from([
                ("cpu".to_string(), "2000m".to_string()),
                ("memory".to_string(), "1Gi".to_string()),
            ]),
        },
    };

    let deployment = Deployment {
        metadata: owned_meta(agent, &labels),
        spec: DeploymentSpec {
            replicas: overrides.replicas.unwrap_or(1),
            selector: selector.clone(),
            template: PodTemplate {
                labels: pod_labels,
                annotations: pod_annotations,
                spec: PodSpec {
                    service_account_name: name.clone(),
                    image_pull_secrets: overrides.image_pull_secrets.clone(),
                    containers: vec![container],
                    volumes: set.pod.volumes,
                },
            },
        },
        status: Default::default(),
    };

    let service = Service {
        metadata: owned_meta(agent, &labels),
        spec: ServiceSpec {
            service_type: Some("ClusterIP".to_string()),
            ports: vec![ServicePort {
                name: Some("http".to_string()),
                port: options.port,
                target_port: Some(options.port),
                app_protocol: None,
            }],
            selector,
        },
    };

    vec![
        service_account.into_object(),
        config_map.into_object(),
        deployment.into_object(),
        service.into_object(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_merge_first_wins_then_override_replaces_sorted() {
        let ambient = vec![
            EnvVar::value("OTEL_EXPORTER_OTLP_ENDPOINT", "http://otel:4317"),
            EnvVar::value("SHARED", "ambient"),
        ];
        let creds = vec![
            EnvVar::from_secret("OPENAI_API_KEY", "openai", "key"),
            EnvVar::value("SHARED", "credential"),
        ];
        let overrides = vec![
            EnvVar::value("OPENAI_API_KEY", "literal"),
            EnvVar::value("A_FIRST", "1"),
        ];
        let merged = merge_env(&ambient, &creds, &overrides);
        let names: Vec<&str> = merged.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["A_FIRST", "OPENAI_API_KEY", "OTEL_EXPORTER_OTLP_ENDPOINT", "SHARED"]
        );
        let shared = merged.iter().find(|e| e.name == "SHARED").unwrap();
        assert_eq!(shared.value.as_deref(), Some("ambient"));
        let key = merged.iter().find(|e| e.name == "OPENAI_API_KEY").unwrap();
        assert_eq!(key.value.as_deref(), Some("literal"));
        assert!(key.value_from.is_none());
    }

    #[test]
    fn inputs_deduplicate_env_and_mounts() {
        let mut inputs = DeploymentInputs::default();
        inputs.add_env(EnvVar::value("X", "1"));
        inputs.add_env(EnvVar::value("X", "2"));
        let vol = Volume {
            name: "creds".into(),
            config_map: None,
            secret: Some("gcp".into()),
        };
        let mount = VolumeMount {
            name: "creds".into(),
            mount_path: "/creds".into(),
            read_only: true,
        };
        inputs.add_volume(vol.clone(), mount.clone());
        inputs.add_volume(vol, mount);
        assert_eq!(inputs.env.len(), 1);
        assert_eq!(inputs.env[0].value.as_deref(), Some("1"));
        assert_eq!(inputs.volumes.len(), 1);
        assert_eq!(inputs.volume_mounts.len(), 1);
    }

    #[test]
    fn byo_image_comes_only_from_overrides() {
        let options = TranslatorOptions::default();
        let mut agent = Agent::default();
        agent.spec.agent_type = AgentType::Byo;
        assert_eq!(image_for(&agent, &options), None);
        agent.spec.agent_type = AgentType::Declarative;
        assert_eq!(image_for(&agent, &options), Some(options.image.clone()));
    }
}
