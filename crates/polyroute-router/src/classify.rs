use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::target::RouteCategory;

/// Longer than this routes to the longcontext pool.
const LONGCONTEXT_TOKENS: u64 = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleField {
    Model,
    ModelLower,
    TokenCount,
    HasTools,
    HasThinking,
    ToolTypes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOp {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
    GreaterThan,
    LessThan,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCondition {
    pub field: RuleField,
    pub op: RuleOp,
    pub value: Value,
}

/// One configured classification rule; all conditions must hold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyRule {
    pub priority: i64,
    pub category: RouteCategory,
    pub conditions: Vec<RuleCondition>,
}

/// Model-name glob fallback (`*haiku*`, `gpt-4*`, …).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPattern {
    pub pattern: String,
    pub category: RouteCategory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationSource {
    Rule,
    Pattern,
    Inference,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct Classification {
    pub category: RouteCategory,
    pub confidence: f32,
    pub source: ClassificationSource,
}

/// Extracted request features the rules evaluate against.
#[derive(Debug, Clone)]
struct Features {
    model: String,
    token_count: u64,
    has_tools: bool,
    has_thinking: bool,
    tool_types: Vec<String>,
}

/// Deterministic, I/O-free request classifier.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    rules: Vec<ClassifyRule>,
    patterns: Vec<ModelPattern>,
}

impl Classifier {
    pub fn new(mut rules: Vec<ClassifyRule>, patterns: Vec<ModelPattern>) -> Self {
        // Higher priority wins; evaluate in descending order.
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { rules, patterns }
    }

    pub fn classify(&self, payload: &Value) -> Classification {
        let features = extract_features(payload);

        for rule in &self.rules {
            if rule
                .conditions
                .iter()
                .all(|condition| matches(condition, &features))
            {
                return Classification {
                    category: rule.category,
                    confidence: 1.0,
                    source: ClassificationSource::Rule,
                };
            }
        }

        let model_lower = features.model.to_ascii_lowercase();
        for pattern in &self.patterns {
            if glob_matches(&pattern.pattern, &model_lower) {
                return Classification {
                    category: pattern.category,
                    confidence: 0.8,
                    source: ClassificationSource::Pattern,
                };
            }
        }

        if let Some(category) = infer(&features) {
            return Classification {
                category,
                confidence: 0.6,
                source: ClassificationSource::Inference,
            };
        }

        Classification {
            category: RouteCategory::Default,
            confidence: 0.3,
            source: ClassificationSource::Fallback,
        }
    }
}

fn infer(features: &Features) -> Option<RouteCategory> {
    if features.token_count > LONGCONTEXT_TOKENS {
        return Some(RouteCategory::Longcontext);
    }
    if features.has_thinking {
        return Some(RouteCategory::Thinking);
    }
    if features
        .tool_types
        .iter()
        .any(|kind| kind.contains("web_search") || kind.contains("websearch"))
    {
        return Some(RouteCategory::Websearch);
    }
    if features
        .tool_types
        .iter()
        .any(|kind| kind.contains("code") || kind.contains("shell") || kind.contains("exec"))
    {
        return Some(RouteCategory::Coding);
    }
    None
}

fn matches(condition: &RuleCondition, features: &Features) -> bool {
    match condition.field {
        RuleField::Model => match_text(condition, &features.model),
        RuleField::ModelLower => {
            match_text(condition, &features.model.to_ascii_lowercase())
        }
        RuleField::TokenCount => match_number(condition, features.token_count),
        RuleField::HasTools => condition.value.as_bool() == Some(features.has_tools),
        RuleField::HasThinking => condition.value.as_bool() == Some(features.has_thinking),
        RuleField::ToolTypes => features
            .tool_types
            .iter()
            .any(|kind| match_text(condition, kind)),
    }
}

fn match_text(condition: &RuleCondition, actual: &str) -> bool {
    let Some(expected) = condition.value.as_str() else {
        return false;
    };
    match condition.op {
        RuleOp::Equals => actual == expected,
        RuleOp::Contains => actual.contains(expected),
        RuleOp::StartsWith => actual.starts_with(expected),
        RuleOp::EndsWith => actual.ends_with(expected),
        RuleOp::Regex => regex::Regex::new(expected)
            .map(|re| re.is_match(actual))
            .unwrap_or(false),
        RuleOp::GreaterThan | RuleOp::LessThan => false,
    }
}

fn match_number(condition: &RuleCondition, actual: u64) -> bool {
    let Some(expected) = condition.value.as_u64() else {
        return false;
    };
    match condition.op {
        RuleOp::Equals => actual == expected,
        RuleOp::GreaterThan => actual > expected,
        RuleOp::LessThan => actual < expected,
        _ => false,
    }
}

fn glob_matches(pattern: &str, text: &str) -> bool {
    let mut regex_src = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => regex_src.push_str(".*"),
            '?' => regex_src.push('.'),
            other => regex_src.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex_src.push('$');
    regex::Regex::new(&regex_src)
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

fn extract_features(payload: &Value) -> Features {
    let model = payload
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let tools = payload.get("tools").and_then(Value::as_array);
    let has_tools = tools.is_some_and(|tools| !tools.is_empty());
    let tool_types = tools
        .map(|tools| {
            tools
                .iter()
                .flat_map(|tool| {
                    [
                        tool.get("type").and_then(Value::as_str),
                        tool.get("function")
                            .and_then(|function| function.get("name"))
                            .and_then(Value::as_str),
                        tool.get("name").and_then(Value::as_str),
                    ]
                })
                .flatten()
                .map(|kind| kind.to_ascii_lowercase())
                .collect()
        })
        .unwrap_or_default();

    let has_thinking = payload.get("thinking").is_some()
        || payload.get("reasoning").is_some()
        || payload.get("reasoning_effort").is_some();

    Features {
        token_count: estimate_tokens(payload),
        model,
        has_tools,
        has_thinking,
        tool_types,
    }
}

/// Token estimate over all textual content. Exact enough for routing: BPE
/// where the tokenizer loads, chars/4 otherwise.
fn estimate_tokens(payload: &Value) -> u64 {
    let mut text = String::new();
    collect_text(payload.get("messages"), &mut text);
    collect_text(payload.get("input"), &mut text);
    collect_text(payload.get("system"), &mut text);
    collect_text(payload.get("instructions"), &mut text);
    if text.is_empty() {
        return 0;
    }

    static BPE: OnceLock<Option<tiktoken_rs::CoreBPE>> = OnceLock::new();
    let bpe = BPE.get_or_init(|| tiktoken_rs::cl100k_base().ok());
    match bpe {
        Some(bpe) => bpe.encode_ordinary(&text).len() as u64,
        None => (text.len() / 4) as u64,
    }
}

fn collect_text(value: Option<&Value>, out: &mut String) {
    match value {
        Some(Value::String(text)) => {
            out.push_str(text);
            out.push('\n');
        }
        Some(Value::Array(items)) => {
            for item in items {
                collect_text(item.get("content"), out);
                collect_text(item.get("text"), out);
                if let Some(text) = item.as_str() {
                    out.push_str(text);
                    out.push('\n');
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rules_beat_patterns_and_priority_orders_rules() {
        let classifier = Classifier::new(
            vec![
                ClassifyRule {
                    priority: 1,
                    category: RouteCategory::Coding,
                    conditions: vec![RuleCondition {
                        field: RuleField::ModelLower,
                        op: RuleOp::Contains,
                        value: json!("coder"),
                    }],
                },
                ClassifyRule {
                    priority: 10,
                    category: RouteCategory::Background,
                    conditions: vec![RuleCondition {
                        field: RuleField::ModelLower,
                        op: RuleOp::Contains,
                        value: json!("coder"),
                    }],
                },
            ],
            vec![ModelPattern {
                pattern: "*coder*".to_string(),
                category: RouteCategory::Tools,
            }],
        );
        let result = classifier.classify(&json!({"model": "Qwen-Coder", "messages": []}));
        assert_eq!(result.category, RouteCategory::Background);
        assert_eq!(result.source, ClassificationSource::Rule);
    }

    #[test]
    fn glob_patterns_apply_when_no_rule_matches() {
        let classifier = Classifier::new(
            Vec::new(),
            vec![ModelPattern {
                pattern: "gpt-4*".to_string(),
                category: RouteCategory::Thinking,
            }],
        );
        let result = classifier.classify(&json!({"model": "gpt-4-turbo", "messages": []}));
        assert_eq!(result.category, RouteCategory::Thinking);
        assert_eq!(result.source, ClassificationSource::Pattern);
    }

    #[test]
    fn contextual_inference_covers_thinking_and_tools() {
        let classifier = Classifier::default();
        let thinking = classifier.classify(&json!({
            "model": "m",
            "messages": [],
            "thinking": {"type": "enabled"}
        }));
        assert_eq!(thinking.category, RouteCategory::Thinking);

        let websearch = classifier.classify(&json!({
            "model": "m",
            "messages": [],
            "tools": [{"type": "web_search_preview"}]
        }));
        assert_eq!(websearch.category, RouteCategory::Websearch);

        let fallback = classifier.classify(&json!({"model": "m", "messages": []}));
        assert_eq!(fallback.category, RouteCategory::Default);
        assert_eq!(fallback.source, ClassificationSource::Fallback);
    }

    #[test]
    fn classification_is_deterministic() {
        let classifier = Classifier::default();
        let payload = json!({"model": "mystery", "messages": [{"role": "user", "content": "hi"}]});
        let a = classifier.classify(&payload);
        let b = classifier.classify(&payload);
        assert_eq!(a.category, b.category);
        assert_eq!(a.source, b.source);
    }
}
