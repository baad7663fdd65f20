use serde::{Deserialize, Serialize};

/// Wire dialect spoken on one side of the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    OpenaiChat,
    OpenaiResponses,
    AnthropicMessages,
    GeminiChat,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::OpenaiChat => "openai-chat",
            Protocol::OpenaiResponses => "openai-responses",
            Protocol::AnthropicMessages => "anthropic-messages",
            Protocol::GeminiChat => "gemini-chat",
        }
    }
}

/// Provider family. The family fixes the upstream protocol and which
/// compatibility profile applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFamily {
    Openai,
    Glm,
    Qwen,
    Iflow,
    Lmstudio,
    Anthropic,
    Gemini,
    Responses,
    Deepseek,
    Modelscope,
    Kimi,
}

impl ProviderFamily {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "openai" => Some(ProviderFamily::Openai),
            "glm" => Some(ProviderFamily::Glm),
            "qwen" => Some(ProviderFamily::Qwen),
            "iflow" => Some(ProviderFamily::Iflow),
            "lmstudio" => Some(ProviderFamily::Lmstudio),
            "anthropic" => Some(ProviderFamily::Anthropic),
            "gemini" => Some(ProviderFamily::Gemini),
            "responses" => Some(ProviderFamily::Responses),
            "deepseek" => Some(ProviderFamily::Deepseek),
            "modelscope" => Some(ProviderFamily::Modelscope),
            "kimi" => Some(ProviderFamily::Kimi),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderFamily::Openai => "openai",
            ProviderFamily::Glm => "glm",
            ProviderFamily::Qwen => "qwen",
            ProviderFamily::Iflow => "iflow",
            ProviderFamily::Lmstudio => "lmstudio",
            ProviderFamily::Anthropic => "anthropic",
            ProviderFamily::Gemini => "gemini",
            ProviderFamily::Responses => "responses",
            ProviderFamily::Deepseek => "deepseek",
            ProviderFamily::Modelscope => "modelscope",
            ProviderFamily::Kimi => "kimi",
        }
    }

    /// Upstream protocol for this family. Most OpenAI-compatible vendors speak
    /// plain chat completions.
    pub fn protocol(&self) -> Protocol {
        match self {
            ProviderFamily::Anthropic => Protocol::AnthropicMessages,
            ProviderFamily::Gemini => Protocol::GeminiChat,
            ProviderFamily::Responses => Protocol::OpenaiResponses,
            _ => Protocol::OpenaiChat,
        }
    }
}

/// Client-facing entry endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryEndpoint {
    ChatCompletions,
    /// Legacy text completions, served as an openai-chat subset.
    Completions,
    Messages,
    Responses,
    Embeddings,
    ModelsList,
    ModelsGet,
}

impl EntryEndpoint {
    pub fn parse(path: &str) -> Option<Self> {
        let path = path.trim_end_matches('/');
        match path {
            "/v1/chat/completions" => Some(EntryEndpoint::ChatCompletions),
            "/v1/completions" => Some(EntryEndpoint::Completions),
            "/v1/messages" => Some(EntryEndpoint::Messages),
            "/v1/responses" => Some(EntryEndpoint::Responses),
            "/v1/embeddings" => Some(EntryEndpoint::Embeddings),
            "/v1/models" => Some(EntryEndpoint::ModelsList),
            _ => path
                .strip_prefix("/v1/models/")
                .filter(|rest| !rest.is_empty())
                .map(|_| EntryEndpoint::ModelsGet),
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            EntryEndpoint::Messages => Protocol::AnthropicMessages,
            EntryEndpoint::Responses => Protocol::OpenaiResponses,
            _ => Protocol::OpenaiChat,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryEndpoint::ChatCompletions => "/v1/chat/completions",
            EntryEndpoint::Completions => "/v1/completions",
            EntryEndpoint::Messages => "/v1/messages",
            EntryEndpoint::Responses => "/v1/responses",
            EntryEndpoint::Embeddings => "/v1/embeddings",
            EntryEndpoint::ModelsList => "/v1/models",
            EntryEndpoint::ModelsGet => "/v1/models/:id",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_fixes_protocol() {
        assert_eq!(ProviderFamily::Glm.protocol(), Protocol::OpenaiChat);
        assert_eq!(
            ProviderFamily::Anthropic.protocol(),
            Protocol::AnthropicMessages
        );
        assert_eq!(
            ProviderFamily::Responses.protocol(),
            Protocol::OpenaiResponses
        );
        assert_eq!(ProviderFamily::Gemini.protocol(), Protocol::GeminiChat);
    }

    #[test]
    fn entry_endpoints_parse() {
        assert_eq!(
            EntryEndpoint::parse("/v1/chat/completions"),
            Some(EntryEndpoint::ChatCompletions)
        );
        assert_eq!(
            EntryEndpoint::parse("/v1/models/gpt-4"),
            Some(EntryEndpoint::ModelsGet)
        );
        assert_eq!(
            EntryEndpoint::parse("/v1/models/"),
            Some(EntryEndpoint::ModelsList)
        );
        assert_eq!(EntryEndpoint::parse("/v2/chat"), None);
        assert_eq!(
            EntryEndpoint::parse("/v1/messages").map(|e| e.protocol()),
            Some(Protocol::AnthropicMessages)
        );
    }
}
