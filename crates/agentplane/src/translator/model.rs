//! ModelConfig → model-client config plus credential env/volumes.

use super::manifest::DeploymentInputs;
use super::types::{ModelClientConfig, ModelProvider, ProviderParams};
use crate::error::TranslateError;
use crate::resources::{
    EnvVar, ModelConfig, ObjectRef, Secret, Volume, VolumeMount, resolve,
};
use crate::store::{ResourceStore, get_typed, require_typed};

const VERTEX_CREDS_PATH: &str = "/creds";

/// Read `key` from a Secret, recording its digest as a deployment input.
pub(crate) async fn secret_value(
    store: &dyn ResourceStore,
    secret: &ObjectRef,
    key: &str,
    inputs: &mut DeploymentInputs,
) -> Result<String, TranslateError> {
    let unresolved = || TranslateError::UnresolvedSecret {
        secret: secret.clone(),
        key: key.to_string(),
    };
    if key.is_empty() {
        return Err(unresolved());
    }
    let found: Secret = get_typed(store, secret).await?.ok_or_else(unresolved)?;
    let value = found.data.get(key).cloned().ok_or_else(unresolved)?;
    inputs.record_secret(format!("{secret}#{key}"), &value);
    Ok(value)
}

fn missing(mc: &ModelConfig, provider: ModelProvider, field: &'static str) -> TranslateError {
    TranslateError::MissingProviderConfig {
        resource: mc.metadata.object_ref(),
        provider: provider.to_string(),
        field,
    }
}

fn provider_params(
    mc: &ModelConfig,
    provider: ModelProvider,
) -> Result<(ProviderParams, Option<String>), TranslateError> {
    let spec = &mc.spec;
    let params = match provider {
        ModelProvider::OpenAi => {
            let c = spec.open_ai.clone().unwrap_or_default();
            return Ok((
                ProviderParams::OpenAi {
                    organization: c.organization,
                    temperature: c.temperature,
                    max_tokens: c.max_tokens,
                    top_p: c.top_p,
                    seed: c.seed,
                },
                c.base_url,
            ));
        }
        ModelProvider::Anthropic => {
            let c = spec.anthropic.clone().unwrap_or_default();
            return Ok((
                ProviderParams::Anthropic {
                    max_tokens: c.max_tokens,
                    temperature: c.temperature,
                },
                c.base_url,
            ));
        }
        ModelProvider::AzureOpenAi => {
            let c = spec
                .azure_open_ai
                .as_ref()
                .ok_or_else(|| missing(mc, provider, "azureOpenAI"))?;
            if c.azure_endpoint.is_empty() {
                return Err(missing(mc, provider, "azureOpenAI.azureEndpoint"));
            }
            if c.api_version.is_empty() {
                return Err(missing(mc, provider, "azureOpenAI.apiVersion"));
            }
            ProviderParams::AzureOpenAi {
                endpoint: c.azure_endpoint.clone(),
                api_version: c.api_version.clone(),
                deployment: c.azure_deployment.clone(),
            }
        }
        ModelProvider::Gemini => ProviderParams::Gemini {
            temperature: spec.gemini.as_ref().and_then(|g| g.temperature.clone()),
        },
        ModelProvider::GeminiVertexAi | ModelProvider::AnthropicVertexAi => {
            let (cfg, field) = if provider == ModelProvider::GeminiVertexAi {
                (spec.gemini_vertex_ai.as_ref(), "geminiVertexAI")
            } else {
                (spec.anthropic_vertex_ai.as_ref(), "anthropicVertexAI")
            };
            let c = cfg.ok_or_else(|| missing(mc, provider, field))?;
            if c.project_id.is_empty() {
                return Err(missing(mc, provider, "projectID"));
            }
            if c.location.is_empty() {
                return Err(missing(mc, provider, "location"));
            }
            ProviderParams::Vertex {
                project_id: c.project_id.clone(),
                location: c.location.clone(),
            }
        }
        ModelProvider::Ollama => {
            let c = spec
                .ollama
                .as_ref()
                .ok_or_else(|| missing(mc, provider, "ollama"))?;
            if c.host.is_empty() {
                return Err(missing(mc, provider, "ollama.host"));
            }
            ProviderParams::Ollama {
                host: c.host.clone(),
                options: c.options.clone(),
            }
        }
    };
    Ok((params, None))
}

/// Resolve the ModelConfig named by `reference` for an agent.
///
/// Credentials are added to `inputs`; the first definition of an env var
/// wins, so the root agent's credentials take precedence over nested ones.
pub(crate) async fn resolve_model(
    store: &dyn ResourceStore,
    reference: &ObjectRef,
    inputs: &mut DeploymentInputs,
) -> Result<ModelClientConfig, TranslateError> {
    let mc: ModelConfig = require_typed(store, reference).await?;
    let provider: ModelProvider =
        mc.spec
            .provider
            .parse()
            .map_err(|_| TranslateError::UnknownProvider {
                resource: reference.clone(),
                provider: mc.spec.provider.clone(),
            })?;
    let (params, base_url) = provider_params(&mc, provider)?;

    let mut api_key_env = None;
    if let Some(secret_name) = mc.spec.api_key_secret.as_deref().filter(|s| !s.is_empty()) {
        let secret = resolve(secret_name, &mc.metadata.namespace)?;
        let key = mc.spec.api_key_secret_key.clone().unwrap_or_default();
        secret_value(store, &secret, &key, inputs).await?;
        if let Some(env_name) = provider.api_key_env() {
            inputs.add_env(EnvVar::from_secret(env_name, &secret.name, &key));
            api_key_env = Some(env_name.to_string());
        } else if provider.is_vertex() {
            inputs.add_volume(
                Volume {
                    name: format!("{}-creds", secret.name),
                    config_map: None,
                    secret: Some(secret.name.clone()),
                },
                VolumeMount {
                    name: format!("{}-creds", secret.name),
                    mount_path: VERTEX_CREDS_PATH.to_string(),
                    read_only: true,
                },
            );
            inputs.add_env(EnvVar::value(
                "GOOGLE_APPLICATION_CREDENTIALS",
                format!("{VERTEX_CREDS_PATH}/{key}"),
            ));
        }
    }
    if let ProviderParams::Vertex {
        project_id,
        location,
    } = &params
    {
        inputs.add_env(EnvVar::value("GOOGLE_CLOUD_PROJECT", project_id.clone()));
        inputs.add_env(EnvVar::value("GOOGLE_CLOUD_LOCATION", location.clone()));
    }
    tracing::debug!(
        "resolved model {} -> {} {}",
        reference,
        provider,
        mc.spec.model
    );

    Ok(ModelClientConfig {
        provider,
        model: mc.spec.model.clone(),
        api_key_env,
        base_url,
        default_headers: mc.spec.default_headers.clone(),
        params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{AzureOpenAiConfig, Resource, VertexConfig};
    use crate::store::MemoryStore;
    use crate::testing;

    async fn resolve_with(
        objects: Vec<crate::resources::Object>,
    ) -> (Result<ModelClientConfig, TranslateError>, DeploymentInputs) {
        let store = testing::store_with(objects).await;
        let mut inputs = DeploymentInputs::default();
        let r = resolve_model(&*store, &ObjectRef::new("ns", "m"), &mut inputs).await;
        (r, inputs)
    }

    #[tokio::test]
    async fn openai_key_becomes_secret_env() {
        let (r, inputs) = resolve_with(vec![
            testing::model_config("ns", "m", "OpenAI").into_object(),
            testing::secret("ns", "openai", &[("key", "sk-1")]).into_object(),
        ])
        .await;
        let cfg = r.unwrap();
        assert_eq!(cfg.api_key_env.as_deref(), Some("OPENAI_API_KEY"));
        assert_eq!(inputs.env.len(), 1);
        let source = inputs.env[0].value_from.as_ref().unwrap();
        assert_eq!(source.secret_key_ref.as_ref().unwrap().name, "openai");
        assert!(inputs.secret_digests.contains_key("ns/openai#key"));
    }

    #[tokio::test]
    async fn unknown_provider_is_rejected() {
        let (r, _) = resolve_with(vec![
            testing::model_config("ns", "m", "Mistral").into_object(),
        ])
        .await;
        assert!(matches!(r, Err(TranslateError::UnknownProvider { .. })));
    }

    #[tokio::test]
    async fn missing_secret_key_is_unresolved() {
        let (r, _) = resolve_with(vec![
            testing::model_config("ns", "m", "OpenAI").into_object(),
            testing::secret("ns", "openai", &[("other", "x")]).into_object(),
        ])
        .await;
        match r {
            Err(TranslateError::UnresolvedSecret { secret, key }) => {
                assert_eq!(secret, ObjectRef::new("ns", "openai"));
                assert_eq!(key, "key");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn azure_requires_endpoint_and_version() {
        let mut mc = testing::model_config("ns", "m", "AzureOpenAI");
        mc.spec.azure_open_ai = Some(AzureOpenAiConfig {
            azure_endpoint: "https://x.openai.azure.com".into(),
            ..Default::default()
        });
        let (r, _) = resolve_with(vec![
            mc.into_object(),
            testing::secret("ns", "openai", &[("key", "k")]).into_object(),
        ])
        .await;
        match r {
            Err(TranslateError::MissingProviderConfig { field, .. }) => {
                assert_eq!(field, "azureOpenAI.apiVersion")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn vertex_mounts_credentials_and_sets_project() {
        let mut mc = testing::model_config("ns", "m", "GeminiVertexAI");
        mc.spec.api_key_secret = Some("gcp".into());
        mc.spec.api_key_secret_key = Some("sa.json".into());
        mc.spec.gemini_vertex_ai = Some(VertexConfig {
            project_id: "proj".into(),
            location: "us-central1".into(),
        });
        let (r, inputs) = resolve_with(vec![
            mc.into_object(),
            testing::secret("ns", "gcp", &[("sa.json", "{}")]).into_object(),
        ])
        .await;
        let cfg = r.unwrap();
        assert_eq!(cfg.api_key_env, None);
        assert_eq!(inputs.volume_mounts[0].mount_path, "/creds");
        let names: Vec<&str> = inputs.env.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "GOOGLE_APPLICATION_CREDENTIALS",
                "GOOGLE_CLOUD_PROJECT",
                "GOOGLE_CLOUD_LOCATION"
            ]
        );
    }

    #[tokio::test]
    async fn ollama_needs_host_but_no_secret() {
        let mut mc = testing::model_config("ns", "m", "Ollama");
        mc.spec.api_key_secret = None;
        let store = MemoryStore::new();
        store
            .apply(mc.clone().into_object(), "test", false)
            .await
            .unwrap();
        let mut inputs = DeploymentInputs::default();
        let r = resolve_model(&store, &ObjectRef::new("ns", "m"), &mut inputs).await;
        assert!(matches!(
            r,
            Err(TranslateError::MissingProviderConfig { field: "ollama", .. })
        ));
    }
}
