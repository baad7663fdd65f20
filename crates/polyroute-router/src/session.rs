use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::directive::{Directive, DisableSpec};

const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(6 * 60 * 60);

/// Force/prefer selector remembered for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSelector {
    pub provider: String,
    pub key: Option<String>,
    pub model: Option<String>,
}

impl TargetSelector {
    pub fn is_fully_qualified(&self) -> bool {
        self.key.is_some() && self.model.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopMessage {
    pub text: String,
    pub max_repeats: u32,
    pub used: u32,
}

/// Per-session routing overrides. Sessions never observe each other's state.
#[derive(Debug, Clone, Default)]
pub struct SessionRoutingState {
    pub forced: Option<TargetSelector>,
    pub sticky: Option<TargetSelector>,
    pub disabled_providers: HashSet<String>,
    pub disabled_keys: HashMap<String, HashSet<String>>,
    pub disabled_models: HashMap<String, HashSet<String>>,
    pub stop_message: Option<StopMessage>,
}

impl SessionRoutingState {
    fn apply(&mut self, directive: &Directive) {
        match directive {
            Directive::Force {
                provider,
                key,
                model,
            } => {
                self.forced = Some(TargetSelector {
                    provider: provider.clone(),
                    key: key.clone(),
                    model: model.clone(),
                });
            }
            Directive::Prefer { provider } => {
                self.sticky = Some(TargetSelector {
                    provider: provider.clone(),
                    key: None,
                    model: None,
                });
            }
            Directive::Disable { specs } => {
                // A new `#` replaces the previous disable set.
                self.disabled_providers.clear();
                self.disabled_keys.clear();
                self.disabled_models.clear();
                for DisableSpec { provider, part } in specs {
                    match part {
                        None => {
                            self.disabled_providers.insert(provider.clone());
                        }
                        Some(part) => {
                            // A part names either a key alias or a model id;
                            // record it as both and let candidate filtering
                            // match whichever exists.
                            self.disabled_keys
                                .entry(provider.clone())
                                .or_default()
                                .insert(part.clone());
                            self.disabled_models
                                .entry(provider.clone())
                                .or_default()
                                .insert(part.clone());
                        }
                    }
                }
            }
            Directive::Clear => *self = SessionRoutingState::default(),
            Directive::StopMessage { text, max_repeats } => {
                self.stop_message = Some(StopMessage {
                    text: text.clone(),
                    max_repeats: *max_repeats,
                    used: 0,
                });
            }
            Directive::ClearStopMessage => self.stop_message = None,
        }
    }

    pub fn is_target_disabled(&self, provider: &str, key_alias: &str, model: &str) -> bool {
        if self.disabled_providers.contains(provider) {
            return true;
        }
        if let Some(keys) = self.disabled_keys.get(provider)
            && keys.contains(key_alias)
        {
            return true;
        }
        if let Some(models) = self.disabled_models.get(provider)
            && models.contains(model)
        {
            return true;
        }
        false
    }
}

struct Entry {
    state: SessionRoutingState,
    touched_at: Instant,
}

/// Process-wide session state, keyed by session id (or tmux scope). Writes
/// per session are serialized behind the store lock; reads hand out
/// snapshots.
pub struct SessionStore {
    entries: RwLock<HashMap<String, Entry>>,
    ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL)
    }
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn apply(&self, session_id: &str, directives: &[Directive]) {
        if directives.is_empty() {
            return;
        }
        let mut entries = self.entries.write().await;
        let entry = entries.entry(session_id.to_string()).or_insert(Entry {
            state: SessionRoutingState::default(),
            touched_at: Instant::now(),
        });
        for directive in directives {
            entry.state.apply(directive);
        }
        entry.touched_at = Instant::now();
    }

    pub async fn snapshot(&self, session_id: &str) -> SessionRoutingState {
        self.entries
            .read()
            .await
            .get(session_id)
            .map(|entry| entry.state.clone())
            .unwrap_or_default()
    }

    /// Consume one stop-message injection if the budget allows.
    pub async fn take_stop_message(&self, session_id: &str) -> Option<String> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(session_id)?;
        let stop = entry.state.stop_message.as_mut()?;
        if stop.used >= stop.max_repeats {
            return None;
        }
        stop.used += 1;
        Some(stop.text.clone())
    }

    /// Migrate state when a scope is renamed (tmux session rebind).
    pub async fn rebind(&self, old_id: &str, new_id: &str) {
        if old_id == new_id {
            return;
        }
        let mut entries = self.entries.write().await;
        if let Some(mut entry) = entries.remove(old_id) {
            entry.touched_at = Instant::now();
            entries.insert(new_id.to_string(), entry);
        }
    }

    /// Drop sessions idle past the TTL.
    pub async fn sweep(&self) {
        let Some(cutoff) = Instant::now().checked_sub(self.ttl) else {
            return;
        };
        self.entries
            .write()
            .await
            .retain(|_, entry| entry.touched_at > cutoff);
    }
}
