use polyroute_protocol::ProviderFamily;
use serde::{Deserialize, Serialize};

use crate::rules::{MessageRule, RuleAction, RuleWhen};

/// How a provider wants tool-call arguments encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgsEncoding {
    /// JSON string (the OpenAI wire default).
    String,
    /// Decoded object.
    Object,
}

/// Per-family shape policy. Everything here is data; the filter itself is a
/// single implementation.
#[derive(Debug, Clone)]
pub struct CompatProfile {
    pub family: ProviderFamily,
    /// Skip the filter entirely (responses-shaped upstreams).
    pub bypass: bool,
    /// Allow-listed top-level request keys; `None` leaves the payload alone.
    pub request_keys: Option<&'static [&'static str]>,
    /// Allow-listed top-level response keys.
    pub response_keys: Option<&'static [&'static str]>,
    pub request_args: ArgsEncoding,
    pub response_args: ArgsEncoding,
    /// Remove `function.strict` from tool definitions (GLM rejects it).
    pub strip_strict: bool,
    /// Repair the shell tool's `command` parameter to `array<string>`.
    pub fix_shell_tool: bool,
    pub strip_reasoning_tags: bool,
    pub message_rules: Vec<MessageRule>,
}

const CHAT_REQUEST_KEYS: &[&str] = &[
    "model",
    "messages",
    "max_tokens",
    "max_completion_tokens",
    "temperature",
    "top_p",
    "n",
    "stream",
    "stream_options",
    "stop",
    "presence_penalty",
    "frequency_penalty",
    "logit_bias",
    "logprobs",
    "top_logprobs",
    "response_format",
    "seed",
    "tools",
    "tool_choice",
    "parallel_tool_calls",
    "user",
];

const CHAT_RESPONSE_KEYS: &[&str] = &[
    "id",
    "object",
    "created",
    "created_at",
    "model",
    "choices",
    "usage",
    "system_fingerprint",
    "service_tier",
];

impl CompatProfile {
    pub fn for_family(family: ProviderFamily) -> Self {
        let base = Self {
            family,
            bypass: false,
            request_keys: Some(CHAT_REQUEST_KEYS),
            response_keys: Some(CHAT_RESPONSE_KEYS),
            request_args: ArgsEncoding::String,
            response_args: ArgsEncoding::String,
            strip_strict: false,
            fix_shell_tool: false,
            strip_reasoning_tags: false,
            message_rules: Vec::new(),
        };
        match family {
            ProviderFamily::Glm => Self {
                strip_strict: true,
                fix_shell_tool: true,
                strip_reasoning_tags: true,
                // GLM chokes on historical assistant turns that still carry
                // tool_calls; only the latest one may keep them.
                message_rules: vec![MessageRule {
                    when: RuleWhen {
                        role: Some("assistant".to_string()),
                        has_tool_calls: Some(true),
                        except_last: true,
                    },
                    action: RuleAction::Drop,
                }],
                ..base
            },
            ProviderFamily::Qwen | ProviderFamily::Deepseek | ProviderFamily::Modelscope => Self {
                strip_reasoning_tags: true,
                ..base
            },
            ProviderFamily::Lmstudio | ProviderFamily::Iflow | ProviderFamily::Kimi => base,
            // Anthropic and gemini payloads are shaped end to end by the
            // codec; running the chat-shape filter over their typed content
            // blocks would destroy them.
            ProviderFamily::Anthropic | ProviderFamily::Gemini => Self {
                bypass: true,
                request_keys: None,
                response_keys: None,
                ..base
            },
            // Responses-shaped upstreams default to bypass; the env override
            // can re-enable the strict filter.
            ProviderFamily::Responses => Self {
                bypass: true,
                request_keys: None,
                response_keys: None,
                ..base
            },
            ProviderFamily::Openai => base,
        }
    }

    pub fn with_bypass(mut self, bypass: bool) -> Self {
        self.bypass = bypass;
        self
    }
}
