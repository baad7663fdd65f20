use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Declarative per-message rule, evaluated in order against each message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRule {
    pub when: RuleWhen,
    pub action: RuleAction,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleWhen {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub has_tool_calls: Option<bool>,
    /// When true, the last matching message is exempt.
    #[serde(default)]
    pub except_last: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "set")]
pub enum RuleAction {
    Drop,
    Keep,
    Set(Map<String, Value>),
}

impl RuleWhen {
    fn matches(&self, message: &Value) -> bool {
        if let Some(role) = &self.role
            && message.get("role").and_then(Value::as_str) != Some(role.as_str())
        {
            return false;
        }
        if let Some(wants_calls) = self.has_tool_calls {
            let has = message
                .get("tool_calls")
                .and_then(Value::as_array)
                .is_some_and(|calls| !calls.is_empty());
            if has != wants_calls {
                return false;
            }
        }
        true
    }
}

/// Apply the rule list to `messages`, in place.
pub fn apply_rules(rules: &[MessageRule], messages: &mut Vec<Value>) {
    for rule in rules {
        let matching: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, message)| rule.when.matches(message))
            .map(|(index, _)| index)
            .collect();
        let exempt = if rule.when.except_last {
            matching.last().copied()
        } else {
            None
        };

        match &rule.action {
            RuleAction::Drop => {
                let mut index = 0;
                messages.retain(|_| {
                    let drop = matching.contains(&index) && Some(index) != exempt;
                    index += 1;
                    !drop
                });
            }
            RuleAction::Keep => {
                let mut index = 0;
                messages.retain(|_| {
                    let keep = matching.contains(&index) || Some(index) == exempt;
                    index += 1;
                    keep
                });
            }
            RuleAction::Set(overrides) => {
                for index in matching {
                    if Some(index) == exempt {
                        continue;
                    }
                    if let Some(map) = messages[index].as_object_mut() {
                        for (key, value) in overrides {
                            map.insert(key.clone(), value.clone());
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn drop_except_last_keeps_newest_tool_turn() {
        let rules = vec![MessageRule {
            when: RuleWhen {
                role: Some("assistant".to_string()),
                has_tool_calls: Some(true),
                except_last: true,
            },
            action: RuleAction::Drop,
        }];
        let mut messages = vec![
            json!({"role": "assistant", "tool_calls": [{"id": "a"}]}),
            json!({"role": "user", "content": "x"}),
            json!({"role": "assistant", "tool_calls": [{"id": "b"}]}),
        ];
        apply_rules(&rules, &mut messages);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1]["tool_calls"][0]["id"], "b");
    }

    #[test]
    fn set_overrides_matching_messages() {
        let rules = vec![MessageRule {
            when: RuleWhen {
                role: Some("user".to_string()),
                has_tool_calls: None,
                except_last: false,
            },
            action: RuleAction::Set(
                json!({"name": "end_user"})
                    .as_object()
                    .cloned()
                    .unwrap(),
            ),
        }];
        let mut messages = vec![json!({"role": "user", "content": "x"})];
        apply_rules(&rules, &mut messages);
        assert_eq!(messages[0]["name"], "end_user");
    }
}
