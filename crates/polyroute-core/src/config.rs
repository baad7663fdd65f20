use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use polyroute_protocol::ProviderFamily;
use polyroute_provider::auth::{ApiKeyAuth, AuthFileAuth, AuthProvider, OAuthAuth, OAuthConfig};
use polyroute_provider::auth::qwen::QWEN_USER_INFO_URLS;
use polyroute_provider::auth::store::TokenStore;
use polyroute_router::{
    Classifier, ClassifyRule, HealthManager, ModelPattern, RateLimitManager, RouteCategory,
    RoutePools, RouterEngine, SessionStore, Target,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("provider {0}: unknown family {1}")]
    UnknownFamily(String, String),
    #[error("routing pool {pool}: malformed target {target} (want provider.key.model)")]
    MalformedTarget { pool: String, target: String },
    #[error("routing pool {pool}: target {target} references unknown {what}")]
    UnknownTarget {
        pool: String,
        target: String,
        what: &'static str,
    },
    #[error("routing pool {0}: unknown category")]
    UnknownCategory(String),
    #[error("provider {provider} key {alias}: oauth binding needs device/token urls")]
    IncompleteOAuth { provider: String, alias: String },
}

/// The parsed configuration document. Loading and file-format validation are
/// the binary's job; the core consumes the parsed form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigDocument {
    pub providers: BTreeMap<String, ProviderConfig>,
    /// Category name → ordered `provider.key.model` runtime keys.
    pub routing: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub rules: Vec<ClassifyRule>,
    #[serde(default)]
    pub model_patterns: Vec<ModelPattern>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub family: String,
    pub base_url: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub default_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub models: BTreeMap<String, ModelCaps>,
    pub keys: BTreeMap<String, KeyBindingConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCaps {
    #[serde(default)]
    pub max_context: Option<u64>,
    #[serde(default)]
    pub supports_tools: Option<bool>,
    #[serde(default)]
    pub supports_vision: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum KeyBindingConfig {
    Apikey {
        value: String,
        #[serde(default)]
        header: Option<String>,
        #[serde(default)]
        prefix: Option<String>,
    },
    Oauth {
        #[serde(default)]
        alias: Option<String>,
        #[serde(default)]
        device_authorization_url: Option<String>,
        #[serde(default)]
        token_url: Option<String>,
        #[serde(default)]
        client_id: Option<String>,
        #[serde(default)]
        scope: Option<String>,
    },
    Authfile {
        file: String,
    },
}

/// One provider's resolved runtime pieces: family, wire settings, and auth
/// per key alias.
pub struct ProviderRuntime {
    pub id: String,
    pub family: ProviderFamily,
    pub base_url: String,
    pub endpoint: Option<String>,
    pub default_headers: Vec<(String, String)>,
    pub timeout: Duration,
    pub keys: BTreeMap<String, AuthProvider>,
    pub models: Vec<String>,
    /// Digest of the wire settings; the module registry keys instances on it.
    pub config_hash: String,
}

/// Immutable routing table built from one configuration document. Reload
/// swaps the whole table atomically.
pub struct RouterTable {
    pub providers: BTreeMap<String, Arc<ProviderRuntime>>,
    pub pools: Arc<RoutePools>,
    pub engine: Arc<RouterEngine>,
}

impl RouterTable {
    pub fn build(
        document: &ConfigDocument,
        state_dir: &Path,
        default_timeout: Duration,
        health: Arc<HealthManager>,
        ratelimit: Arc<RateLimitManager>,
        sessions: Arc<SessionStore>,
    ) -> Result<Self, ConfigError> {
        let mut providers = BTreeMap::new();
        for (provider_id, config) in &document.providers {
            let family = ProviderFamily::parse(&config.family).ok_or_else(|| {
                ConfigError::UnknownFamily(provider_id.clone(), config.family.clone())
            })?;

            let mut keys = BTreeMap::new();
            for (alias, binding) in &config.keys {
                keys.insert(
                    alias.clone(),
                    build_auth(provider_id, alias, family, binding, state_dir)?,
                );
            }

            let config_hash = hash_provider_config(provider_id, config);
            providers.insert(
                provider_id.clone(),
                Arc::new(ProviderRuntime {
                    id: provider_id.clone(),
                    family,
                    base_url: config.base_url.clone(),
                    endpoint: config.endpoint.clone(),
                    default_headers: config
                        .default_headers
                        .iter()
                        .map(|(name, value)| (name.clone(), value.clone()))
                        .collect(),
                    timeout: config
                        .timeout_ms
                        .map(Duration::from_millis)
                        .unwrap_or(default_timeout),
                    keys,
                    models: config.models.keys().cloned().collect(),
                    config_hash,
                }),
            );
        }

        let mut pools: HashMap<RouteCategory, Vec<Target>> = HashMap::new();
        for (pool_name, entries) in &document.routing {
            let category = RouteCategory::parse(pool_name)
                .ok_or_else(|| ConfigError::UnknownCategory(pool_name.clone()))?;
            let mut targets = Vec::with_capacity(entries.len());
            for entry in entries {
                targets.push(resolve_target(pool_name, entry, &providers)?);
            }
            pools.insert(category, targets);
        }

        let pools = Arc::new(RoutePools::new(pools));
        let classifier = Classifier::new(document.rules.clone(), document.model_patterns.clone());
        let engine = Arc::new(RouterEngine::new(
            pools.clone(),
            classifier,
            health,
            ratelimit,
            sessions,
        ));

        Ok(Self {
            providers,
            pools,
            engine,
        })
    }

    /// Model listing for `/v1/models`, synthesized from the descriptors.
    pub fn model_listing(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for (provider_id, provider) in &self.providers {
            for model in &provider.models {
                out.push((model.clone(), provider_id.clone()));
            }
        }
        out
    }
}

fn resolve_target(
    pool: &str,
    entry: &str,
    providers: &BTreeMap<String, Arc<ProviderRuntime>>,
) -> Result<Target, ConfigError> {
    // model ids may themselves contain dots, so split twice from the left
    let mut parts = entry.splitn(3, '.');
    let (provider_id, key_alias, model_id) = match (parts.next(), parts.next(), parts.next()) {
        (Some(provider), Some(key), Some(model)) if !model.is_empty() => (provider, key, model),
        _ => {
            return Err(ConfigError::MalformedTarget {
                pool: pool.to_string(),
                target: entry.to_string(),
            });
        }
    };
    let provider = providers
        .get(provider_id)
        .ok_or(ConfigError::UnknownTarget {
            pool: pool.to_string(),
            target: entry.to_string(),
            what: "provider",
        })?;
    if !provider.keys.contains_key(key_alias) {
        return Err(ConfigError::UnknownTarget {
            pool: pool.to_string(),
            target: entry.to_string(),
            what: "key alias",
        });
    }
    if !provider.models.is_empty() && !provider.models.iter().any(|model| model == model_id) {
        return Err(ConfigError::UnknownTarget {
            pool: pool.to_string(),
            target: entry.to_string(),
            what: "model",
        });
    }
    Ok(Target::new(provider_id, key_alias, model_id, provider.family))
}

fn build_auth(
    provider_id: &str,
    alias: &str,
    family: ProviderFamily,
    binding: &KeyBindingConfig,
    state_dir: &Path,
) -> Result<AuthProvider, ConfigError> {
    match binding {
        KeyBindingConfig::Apikey {
            value,
            header,
            prefix,
        } => Ok(AuthProvider::ApiKey(ApiKeyAuth {
            header: header.clone().unwrap_or_else(|| "authorization".to_string()),
            prefix: prefix.clone().unwrap_or_else(|| "Bearer ".to_string()),
            key: value.clone(),
        })),
        KeyBindingConfig::Authfile { file } => Ok(AuthProvider::AuthFile(AuthFileAuth {
            path: state_dir.join("auth").join(file),
        })),
        KeyBindingConfig::Oauth {
            alias: token_alias,
            device_authorization_url,
            token_url,
            client_id,
            scope,
        } => {
            let defaults = oauth_defaults(family);
            let (device_url, token_url, client_id, scope) = match (
                device_authorization_url
                    .clone()
                    .or_else(|| defaults.map(|d| d.device_url.to_string())),
                token_url
                    .clone()
                    .or_else(|| defaults.map(|d| d.token_url.to_string())),
                client_id
                    .clone()
                    .or_else(|| defaults.map(|d| d.client_id.to_string())),
                scope
                    .clone()
                    .or_else(|| defaults.map(|d| d.scope.to_string())),
            ) {
                (Some(device), Some(token), Some(client), Some(scope)) => {
                    (device, token, client, scope)
                }
                _ => {
                    return Err(ConfigError::IncompleteOAuth {
                        provider: provider_id.to_string(),
                        alias: alias.to_string(),
                    });
                }
            };

            let token_alias = token_alias.as_deref().unwrap_or(alias);
            let store =
                TokenStore::for_alias(&state_dir.join("auth"), provider_id, alias, token_alias);
            let user_info_urls = if family == ProviderFamily::Qwen {
                QWEN_USER_INFO_URLS
                    .iter()
                    .map(|url| url.to_string())
                    .collect()
            } else {
                Vec::new()
            };
            Ok(AuthProvider::OAuth(OAuthAuth::new(
                OAuthConfig {
                    provider_id: provider_id.to_string(),
                    alias: token_alias.to_string(),
                    device_authorization_url: device_url,
                    token_url,
                    client_id,
                    scope,
                    user_info_urls,
                },
                store,
            )))
        }
    }
}

struct OAuthDefaults {
    device_url: &'static str,
    token_url: &'static str,
    client_id: &'static str,
    scope: &'static str,
}

/// Built-in device-flow endpoints for families that ship them.
fn oauth_defaults(family: ProviderFamily) -> Option<&'static OAuthDefaults> {
    match family {
        ProviderFamily::Qwen => Some(&OAuthDefaults {
            device_url: "https://chat.qwen.ai/api/v1/oauth2/device/code",
            token_url: "https://chat.qwen.ai/api/v1/oauth2/token",
            client_id: "f0304373b74a44d2b584a3fb70ca9e56",
            scope: "openid profile email model.completion",
        }),
        ProviderFamily::Iflow => Some(&OAuthDefaults {
            device_url: "https://iflow.cn/oauth/device/code",
            token_url: "https://iflow.cn/oauth/token",
            client_id: "10009311001",
            scope: "openid profile api",
        }),
        _ => None,
    }
}

fn hash_provider_config(provider_id: &str, config: &ProviderConfig) -> String {
    let serialized = serde_json::to_vec(config).unwrap_or_default();
    let mut hasher = blake3::Hasher::new();
    hasher.update(provider_id.as_bytes());
    hasher.update(&serialized);
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document() -> ConfigDocument {
        serde_json::from_value(json!({
            "providers": {
                "openai": {
                    "family": "openai",
                    "base_url": "https://api.openai.com",
                    "models": {"gpt-4": {}},
                    "keys": {"k1": {"type": "apikey", "value": "sk-test"}}
                }
            },
            "routing": {
                "default": ["openai.k1.gpt-4"]
            }
        }))
        .unwrap()
    }

    fn build(document: &ConfigDocument) -> Result<RouterTable, ConfigError> {
        RouterTable::build(
            document,
            Path::new("/tmp/polyroute-test"),
            Duration::from_secs(300),
            HealthManager::new(Default::default()),
            Arc::new(RateLimitManager::new(Default::default())),
            Arc::new(SessionStore::default()),
        )
    }

    #[test]
    fn valid_document_builds_pools_and_models() {
        let table = build(&document()).unwrap();
        assert_eq!(table.pools.targets(RouteCategory::Default).len(), 1);
        assert_eq!(
            table.model_listing(),
            vec![("gpt-4".to_string(), "openai".to_string())]
        );
    }

    #[test]
    fn unknown_pool_targets_are_rejected() {
        let mut doc = document();
        doc.routing
            .insert("default".to_string(), vec!["openai.k2.gpt-4".to_string()]);
        assert!(matches!(
            build(&doc),
            Err(ConfigError::UnknownTarget { what: "key alias", .. })
        ));

        let mut doc = document();
        doc.routing
            .insert("default".to_string(), vec!["nope".to_string()]);
        assert!(matches!(build(&doc), Err(ConfigError::MalformedTarget { .. })));
    }

    #[test]
    fn model_ids_with_dots_resolve() {
        let mut doc = document();
        doc.providers
            .get_mut("openai")
            .unwrap()
            .models
            .insert("gpt-4.1".to_string(), ModelCaps::default());
        doc.routing
            .insert("default".to_string(), vec!["openai.k1.gpt-4.1".to_string()]);
        let table = build(&doc).unwrap();
        let targets = table.pools.targets(RouteCategory::Default);
        assert_eq!(targets[0].model_id, "gpt-4.1");
    }
}
