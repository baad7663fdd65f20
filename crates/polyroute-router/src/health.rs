use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub max_consecutive_errors: u32,
    pub error_threshold: u32,
    /// Two 429s in a row disable the target immediately.
    pub consecutive_429_limit: u32,
    pub recovery_window: Duration,
    pub auto_recovery: bool,
    pub check_interval: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_consecutive_errors: 3,
            error_threshold: 10,
            consecutive_429_limit: 2,
            recovery_window: Duration::from_secs(300),
            auto_recovery: true,
            check_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HealthState {
    pub is_healthy: bool,
    pub consecutive_errors: u32,
    pub consecutive_429: u32,
    pub error_count: u64,
    pub success_count: u64,
    pub last_error: Option<String>,
    pub last_error_at: Option<OffsetDateTime>,
    pub disabled: bool,
    pub disabled_at: Option<OffsetDateTime>,
    pub disabled_reason: Option<String>,
    pub recovery_at: Option<Instant>,
}

impl HealthState {
    fn fresh() -> Self {
        Self {
            is_healthy: true,
            ..Self::default()
        }
    }
}

/// Per-target health bookkeeping keyed by runtime key. A background ticker
/// recovers disabled targets whose recovery deadline has passed.
pub struct HealthManager {
    states: Arc<RwLock<HashMap<String, HealthState>>>,
    config: HealthConfig,
}

impl HealthManager {
    pub fn new(config: HealthConfig) -> Arc<Self> {
        Arc::new(Self {
            states: Arc::new(RwLock::new(HashMap::new())),
            config,
        })
    }

    pub async fn record_success(&self, runtime_key: &str) {
        let mut states = self.states.write().await;
        let state = states
            .entry(runtime_key.to_string())
            .or_insert_with(HealthState::fresh);
        state.success_count += 1;
        state.consecutive_errors = 0;
        state.consecutive_429 = 0;
        if state.disabled && self.config.auto_recovery {
            state.disabled = false;
            state.disabled_reason = None;
            state.recovery_at = None;
            state.is_healthy = true;
            tracing::info!(target = runtime_key, "target recovered on success");
        }
    }

    pub async fn record_error(&self, runtime_key: &str, affects_health: bool, message: &str) {
        if !affects_health {
            return;
        }
        let mut states = self.states.write().await;
        let state = states
            .entry(runtime_key.to_string())
            .or_insert_with(HealthState::fresh);
        state.error_count += 1;
        state.consecutive_errors += 1;
        state.consecutive_429 = 0;
        state.last_error = Some(message.to_string());
        state.last_error_at = Some(OffsetDateTime::now_utc());
        if state.consecutive_errors >= self.config.max_consecutive_errors
            || state.error_count >= self.config.error_threshold as u64
        {
            disable(state, "consecutive errors", self.config.recovery_window);
        }
    }

    pub async fn record_429(&self, runtime_key: &str, message: &str) {
        let mut states = self.states.write().await;
        let state = states
            .entry(runtime_key.to_string())
            .or_insert_with(HealthState::fresh);
        state.error_count += 1;
        state.consecutive_429 += 1;
        state.last_error = Some(message.to_string());
        state.last_error_at = Some(OffsetDateTime::now_utc());
        if state.consecutive_429 >= self.config.consecutive_429_limit {
            disable(state, "repeated 429", self.config.recovery_window);
        }
    }

    /// Disable outright with an explicit recovery window (daily-quota 429).
    pub async fn force_disable(&self, runtime_key: &str, window: Duration, reason: &str) {
        let mut states = self.states.write().await;
        let state = states
            .entry(runtime_key.to_string())
            .or_insert_with(HealthState::fresh);
        disable(state, reason, window);
    }

    /// Availability check; also performs lazy recovery when the window has
    /// elapsed.
    pub async fn is_available(&self, runtime_key: &str) -> bool {
        {
            let states = self.states.read().await;
            match states.get(runtime_key) {
                None => return true,
                Some(state) if !state.disabled => return true,
                Some(state) => {
                    let due = state
                        .recovery_at
                        .is_some_and(|recovery_at| Instant::now() >= recovery_at);
                    if !due || !self.config.auto_recovery {
                        return false;
                    }
                }
            }
        }
        self.recover(runtime_key).await;
        true
    }

    pub async fn snapshot(&self) -> HashMap<String, HealthState> {
        self.states.read().await.clone()
    }

    async fn recover(&self, runtime_key: &str) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(runtime_key) {
            let due = state
                .recovery_at
                .is_some_and(|recovery_at| Instant::now() >= recovery_at);
            if state.disabled && due {
                state.disabled = false;
                state.disabled_reason = None;
                state.recovery_at = None;
                state.consecutive_errors = 0;
                state.consecutive_429 = 0;
                state.is_healthy = true;
                tracing::info!(target = runtime_key, "target recovery window elapsed");
            }
        }
    }

    /// Background scan recovering disabled targets whose window has passed.
    pub fn spawn_recovery_task(self: &Arc<Self>) {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.config.check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let due: Vec<String> = {
                    let states = manager.states.read().await;
                    let now = Instant::now();
                    states
                        .iter()
                        .filter(|(_, state)| {
                            state.disabled
                                && state.recovery_at.is_some_and(|recovery_at| now >= recovery_at)
                        })
                        .map(|(key, _)| key.clone())
                        .collect()
                };
                for key in due {
                    manager.recover(&key).await;
                }
            }
        });
    }
}

fn disable(state: &mut HealthState, reason: &str, window: Duration) {
    state.disabled = true;
    state.is_healthy = false;
    state.disabled_at = Some(OffsetDateTime::now_utc());
    state.disabled_reason = Some(reason.to_string());
    state.recovery_at = Some(Instant::now() + window);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HealthConfig {
        HealthConfig {
            max_consecutive_errors: 3,
            error_threshold: 100,
            consecutive_429_limit: 2,
            recovery_window: Duration::from_millis(50),
            auto_recovery: true,
            check_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn consecutive_errors_disable_and_success_recovers() {
        let manager = HealthManager::new(config());
        for _ in 0..3 {
            manager.record_error("t", true, "boom").await;
        }
        assert!(!manager.is_available("t").await);

        manager.record_success("t").await;
        let state = manager.snapshot().await.remove("t").unwrap();
        assert!(!state.disabled);
        assert_eq!(state.consecutive_errors, 0);
        assert!(manager.is_available("t").await);
    }

    #[tokio::test]
    async fn two_429s_disable_immediately() {
        let manager = HealthManager::new(config());
        manager.record_429("t", "slow down").await;
        assert!(manager.is_available("t").await);
        manager.record_429("t", "slow down").await;
        assert!(!manager.is_available("t").await);
    }

    #[tokio::test]
    async fn recovery_window_elapses() {
        let manager = HealthManager::new(config());
        manager.force_disable("t", Duration::from_millis(30), "quota").await;
        assert!(!manager.is_available("t").await);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(manager.is_available("t").await);
    }

    #[tokio::test]
    async fn errors_that_do_not_affect_health_are_ignored() {
        let manager = HealthManager::new(config());
        for _ in 0..10 {
            manager.record_error("t", false, "network blip").await;
        }
        assert!(manager.is_available("t").await);
        assert!(manager.snapshot().await.get("t").is_none());
    }
}
