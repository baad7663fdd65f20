use polyroute_protocol::{Protocol, ProviderFamily};
use serde::{Deserialize, Serialize};

/// Routing category. Pool order within a category defines the round-robin
/// rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteCategory {
    Default,
    Longcontext,
    Thinking,
    Coding,
    Tools,
    Websearch,
    Vision,
    Background,
}

impl RouteCategory {
    pub const ALL: &'static [RouteCategory] = &[
        RouteCategory::Default,
        RouteCategory::Longcontext,
        RouteCategory::Thinking,
        RouteCategory::Coding,
        RouteCategory::Tools,
        RouteCategory::Websearch,
        RouteCategory::Vision,
        RouteCategory::Background,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "default" => Some(RouteCategory::Default),
            "longcontext" => Some(RouteCategory::Longcontext),
            "thinking" => Some(RouteCategory::Thinking),
            "coding" => Some(RouteCategory::Coding),
            "tools" => Some(RouteCategory::Tools),
            "websearch" => Some(RouteCategory::Websearch),
            "vision" => Some(RouteCategory::Vision),
            "background" => Some(RouteCategory::Background),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteCategory::Default => "default",
            RouteCategory::Longcontext => "longcontext",
            RouteCategory::Thinking => "thinking",
            RouteCategory::Coding => "coding",
            RouteCategory::Tools => "tools",
            RouteCategory::Websearch => "websearch",
            RouteCategory::Vision => "vision",
            RouteCategory::Background => "background",
        }
    }
}

/// Concrete dispatch destination. Equality and all map keys go through the
/// runtime key, which is stable for the life of the configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub provider_id: String,
    pub key_alias: String,
    pub model_id: String,
    pub family: ProviderFamily,
    pub protocol: Protocol,
    runtime_key: String,
}

impl Target {
    pub fn new(
        provider_id: impl Into<String>,
        key_alias: impl Into<String>,
        model_id: impl Into<String>,
        family: ProviderFamily,
    ) -> Self {
        let provider_id = provider_id.into();
        let key_alias = key_alias.into();
        let model_id = model_id.into();
        let runtime_key = format!("{provider_id}.{key_alias}.{model_id}");
        Self {
            provider_id,
            key_alias,
            model_id,
            protocol: family.protocol(),
            family,
            runtime_key,
        }
    }

    pub fn runtime_key(&self) -> &str {
        &self.runtime_key
    }

    /// `provider.key` part, used as the rate-limit cooldown scope.
    pub fn provider_key(&self) -> String {
        format!("{}.{}", self.provider_id, self.key_alias)
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        self.runtime_key == other.runtime_key
    }
}

impl Eq for Target {}

impl std::hash::Hash for Target {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.runtime_key.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_key_is_recomputable() {
        let target = Target::new("openai", "k1", "gpt-4", ProviderFamily::Openai);
        assert_eq!(target.runtime_key(), "openai.k1.gpt-4");
        assert_eq!(target.provider_key(), "openai.k1");
        let again = Target::new("openai", "k1", "gpt-4", ProviderFamily::Openai);
        assert_eq!(target, again);
    }

    #[test]
    fn family_fixes_target_protocol() {
        let target = Target::new("z", "k", "m", ProviderFamily::Anthropic);
        assert_eq!(target.protocol, Protocol::AnthropicMessages);
    }
}
