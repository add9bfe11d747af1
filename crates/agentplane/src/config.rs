//! Process settings. Each knob is read from its env var, then from
//! `<AGENTPLANE_HOME>/config.toml`, then falls back to its default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use env_flags::env_flags;
use serde::Deserialize;

use crate::resources::EnvVar;
use crate::translator::TranslatorOptions;

env_flags! {
    /// Agentplane home directory (absolute). Defaults to $HOME/.agentplane
    AGENTPLANE_HOME: &str = "";
    /// Directory of YAML manifests mirrored into the resource store.
    MANIFEST_DIR: &str = "manifests";
    MANIFEST_POLL_SECS: u64 = 5;
    /// Bind address of the A2A server.
    HOST: &str = "0.0.0.0";
    PORT: u16 = 8083;
    /// Public base URL advertised in agent cards. Defaults to http://127.0.0.1:<PORT>
    A2A_BASE_URL: &str = "";
    A2A_REQUEST_TIMEOUT_SECS: u64 = 600;
    /// Agent runtime that executes compiled configs.
    RUNTIME_URL: &str = "http://127.0.0.1:8080";
    /// If set, runtime records are written here instead of kept in memory.
    RUNTIME_STORE_DIR: &str = "";
    AGENT_IMAGE_REGISTRY: &str = "ghcr.io";
    AGENT_IMAGE_REPOSITORY: &str = "agentplane/agent-runtime";
    /// Defaults to the crate version.
    AGENT_IMAGE_TAG: &str = "";
    AGENT_IMAGE_PULL_POLICY: &str = "IfNotPresent";
    /// Container and Service port of agent workloads.
    AGENT_PORT: u16 = 8080;
    DISCOVERY_INTERVAL_SECS: u64 = 60;
    DISCOVERY_TIMEOUT_MS: u64 = 10000;
    /// Delay before a transiently failed reconcile is retried.
    REQUEUE_SECS: u64 = 5;
    /// Collector endpoint injected into agent pods; empty disables it.
    OTEL_EXPORTER_OTLP_ENDPOINT: &str = "";
}

#[derive(Debug, Default, Deserialize)]
pub struct UserConfig {
    pub logging: Option<LoggingCfg>,
    pub server: Option<ServerCfg>,
    pub manifests: Option<ManifestsCfg>,
    pub runtime: Option<RuntimeCfg>,
    pub agents: Option<AgentsCfg>,
    pub discovery: Option<DiscoveryCfg>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingCfg {
    pub to_file: Option<bool>,
    pub dir: Option<String>,
    pub json: Option<bool>,
    pub compact: Option<bool>,
    pub pretty: Option<bool>,
    pub level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerCfg {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub base_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ManifestsCfg {
    pub dir: Option<String>,
    pub poll_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RuntimeCfg {
    pub url: Option<String>,
    pub store_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AgentsCfg {
    pub image_registry: Option<String>,
    pub image_repository: Option<String>,
    pub image_tag: Option<String>,
    pub image_pull_policy: Option<String>,
    pub port: Option<u16>,
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DiscoveryCfg {
    pub interval_secs: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub requeue_secs: Option<u64>,
}

pub fn agentplane_home() -> PathBuf {
    if !(*AGENTPLANE_HOME).is_empty() {
        PathBuf::from((*AGENTPLANE_HOME).to_string())
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".agentplane")
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".agentplane")
    }
}

pub fn load_user_config(home: &Path) -> anyhow::Result<Option<UserConfig>> {
    let path = home.join("config.toml");
    if !path.exists() {
        return Ok(None);
    }
    let s = std::fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let cfg: UserConfig =
        toml::from_str(&s).with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(cfg))
}

pub fn expand_home(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Ok(home) = std::env::var("HOME")
    {
        return PathBuf::from(home).join(stripped);
    }
    PathBuf::from(path)
}

/// The env value when the variable is set, else the file value, else the
/// env-flags default (which is what an unset flag evaluates to).
fn pick<T>(env_present: bool, env_value: T, file_value: Option<T>) -> T {
    if env_present {
        env_value
    } else {
        file_value.unwrap_or(env_value)
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub manifest_dir: PathBuf,
    pub manifest_poll: Duration,
    pub host: String,
    pub port: u16,
    pub a2a_base_url: String,
    pub request_timeout: Duration,
    pub runtime_url: String,
    pub runtime_store_dir: Option<PathBuf>,
    pub agent_image: String,
    pub agent_image_pull_policy: String,
    pub agent_port: u16,
    pub discovery_interval: Duration,
    pub discovery_timeout: Duration,
    pub requeue_after: Duration,
    pub otlp_endpoint: Option<String>,
}

impl Settings {
    pub fn resolve(file: UserConfig, env_set: impl Fn(&str) -> bool) -> Self {
        let server = file.server.unwrap_or_default();
        let manifests = file.manifests.unwrap_or_default();
        let runtime = file.runtime.unwrap_or_default();
        let agents = file.agents.unwrap_or_default();
        let discovery = file.discovery.unwrap_or_default();
        let text = |key: &str, env: &str, file: Option<String>| pick(env_set(key), env.to_string(), file);

        let port = pick(env_set("PORT"), *PORT, server.port);
        let base_url = text("A2A_BASE_URL", *A2A_BASE_URL, server.base_url);
        let store_dir = text("RUNTIME_STORE_DIR", *RUNTIME_STORE_DIR, runtime.store_dir);
        let registry = text("AGENT_IMAGE_REGISTRY", *AGENT_IMAGE_REGISTRY, agents.image_registry);
        let repository = text(
            "AGENT_IMAGE_REPOSITORY",
            *AGENT_IMAGE_REPOSITORY,
            agents.image_repository,
        );
        let tag = text("AGENT_IMAGE_TAG", *AGENT_IMAGE_TAG, agents.image_tag);
        let otlp = text(
            "OTEL_EXPORTER_OTLP_ENDPOINT",
            *OTEL_EXPORTER_OTLP_ENDPOINT,
            agents.otlp_endpoint,
        );

        Self {
            manifest_dir: expand_home(&text("MANIFEST_DIR", *MANIFEST_DIR, manifests.dir)),
            manifest_poll: Duration::from_secs(pick(
                env_set("MANIFEST_POLL_SECS"),
                *MANIFEST_POLL_SECS,
                manifests.poll_secs,
            )),
            host: text("HOST", *HOST, server.host),
            port,
            a2a_base_url: if base_url.is_empty() {
                format!("http://127.0.0.1:{port}")
            } else {
                base_url.trim_end_matches('/').to_string()
            },
            request_timeout: Duration::from_secs(pick(
                env_set("A2A_REQUEST_TIMEOUT_SECS"),
                *A2A_REQUEST_TIMEOUT_SECS,
                server.request_timeout_secs,
            )),
            runtime_url: text("RUNTIME_URL", *RUNTIME_URL, runtime.url),
            runtime_store_dir: (!store_dir.is_empty()).then(|| expand_home(&store_dir)),
            agent_image: image_ref(&registry, &repository, &tag),
            agent_image_pull_policy: text(
                "AGENT_IMAGE_PULL_POLICY",
                *AGENT_IMAGE_PULL_POLICY,
                agents.image_pull_policy,
            ),
            agent_port: pick(env_set("AGENT_PORT"), *AGENT_PORT, agents.port),
            discovery_interval: Duration::from_secs(pick(
                env_set("DISCOVERY_INTERVAL_SECS"),
                *DISCOVERY_INTERVAL_SECS,
                discovery.interval_secs,
            )),
            discovery_timeout: Duration::from_millis(pick(
                env_set("DISCOVERY_TIMEOUT_MS"),
                *DISCOVERY_TIMEOUT_MS,
                discovery.timeout_ms,
            )),
            requeue_after: Duration::from_secs(pick(
                env_set("REQUEUE_SECS"),
                *REQUEUE_SECS,
                discovery.requeue_secs,
            )),
            otlp_endpoint: (!otlp.is_empty()).then_some(otlp),
        }
    }

    pub fn translator_options(&self) -> TranslatorOptions {
        let mut ambient_env = Vec::new();
        if let Some(endpoint) = &self.otlp_endpoint {
            ambient_env.push(EnvVar::value("OTEL_TRACING_ENABLED", "true"));
            ambient_env.push(EnvVar::value("OTEL_EXPORTER_OTLP_ENDPOINT", endpoint.clone()));
        }
        TranslatorOptions {
            image: self.agent_image.clone(),
            image_pull_policy: self.agent_image_pull_policy.clone(),
            port: self.agent_port,
            a2a_base_url: self.a2a_base_url.clone(),
            ambient_env,
        }
    }
}

fn image_ref(registry: &str, repository: &str, tag: &str) -> String {
    let tag = if tag.is_empty() { env!("CARGO_PKG_VERSION") } else { tag };
    let registry = registry.trim_end_matches('/');
    if registry.is_empty() {
        format!("{repository}:{tag}")
    } else {
        format!("{registry}/{repository}:{tag}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_beats_file_beats_default() {
        assert_eq!(pick(true, 1, Some(2)), 1);
        assert_eq!(pick(false, 1, Some(2)), 2);
        assert_eq!(pick(false, 1, None), 1);
    }

    #[test]
    fn file_values_apply_when_env_is_unset() {
        let cfg: UserConfig = toml::from_str(
            r#"
            [server]
            port = 9000
            base_url = "https://agents.example.com/"

            [agents]
            image_registry = ""
            image_repository = "acme/runtime"
            image_tag = "1.2.3"
            otlp_endpoint = "http://otel:4317"

            [discovery]
            timeout_ms = 250
            "#,
        )
        .unwrap();
        let s = Settings::resolve(cfg, |_| false);
        assert_eq!(s.port, 9000);
        assert_eq!(s.a2a_base_url, "https://agents.example.com");
        assert_eq!(s.agent_image, "acme/runtime:1.2.3");
        assert_eq!(s.discovery_timeout, Duration::from_millis(250));

        let opts = s.translator_options();
        assert_eq!(opts.port, s.agent_port);
        assert!(
            opts.ambient_env
                .iter()
                .any(|e| e.name == "OTEL_EXPORTER_OTLP_ENDPOINT"
                    && e.value.as_deref() == Some("http://otel:4317"))
        );
    }

    #[test]
    fn base_url_defaults_to_local_port() {
        let cfg: UserConfig = toml::from_str("[server]\nport = 9100\n").unwrap();
        let s = Settings::resolve(cfg, |_| false);
        assert_eq!(s.a2a_base_url, "http://127.0.0.1:9100");
    }

    #[test]
    fn image_ref_joins_parts() {
        assert_eq!(image_ref("ghcr.io/", "a/b", "v1"), "ghcr.io/a/b:v1");
        assert!(image_ref("", "a/b", "").starts_with("a/b:"));
    }

    #[test]
    fn missing_config_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_user_config(dir.path()).unwrap().is_none());
        std::fs::write(dir.path().join("config.toml"), "[logging]\njson = true\n").unwrap();
        let cfg = load_user_config(dir.path()).unwrap().unwrap();
        assert_eq!(cfg.logging.and_then(|l| l.json), Some(true));
    }
}
