use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CooldownReason {
    Transient429,
    DailyQuota429,
    Network,
}

#[derive(Debug, Clone)]
pub struct CooldownEntry {
    pub reason: CooldownReason,
    pub started_at: Instant,
    pub duration: Duration,
}

impl CooldownEntry {
    pub fn until(&self) -> Instant {
        self.started_at + self.duration
    }

    pub fn is_active(&self) -> bool {
        Instant::now() < self.until()
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub short_cooldown: Duration,
    /// Daily-quota 429s sit out much longer; must be at least an hour.
    pub daily_cooldown: Duration,
    pub network_cooldown: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            short_cooldown: Duration::from_secs(30),
            daily_cooldown: Duration::from_secs(2 * 60 * 60),
            network_cooldown: Duration::from_secs(10),
        }
    }
}

type CooldownKey = (String, String);

/// Cooldown windows per (provider key, model). A transient 429 suppresses the
/// pair briefly while leaving the target healthy; daily-quota exhaustion
/// escalates to a forced long cooldown.
pub struct RateLimitManager {
    cooldowns: RwLock<HashMap<CooldownKey, CooldownEntry>>,
    config: RateLimitConfig,
}

impl RateLimitManager {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            cooldowns: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn daily_cooldown(&self) -> Duration {
        self.config.daily_cooldown
    }

    /// Record a 429. Returns true when the message indicates daily-quota
    /// exhaustion and the failure was escalated.
    pub async fn register_failure(
        &self,
        provider_key: &str,
        model: &str,
        message: &str,
    ) -> bool {
        let daily = is_daily_quota_message(message);
        if daily {
            self.force_failure(provider_key, model).await;
            return true;
        }
        self.insert(
            provider_key,
            model,
            CooldownReason::Transient429,
            self.config.short_cooldown,
        )
        .await;
        false
    }

    /// Long cooldown for daily-quota exhaustion.
    pub async fn force_failure(&self, provider_key: &str, model: &str) {
        self.insert(
            provider_key,
            model,
            CooldownReason::DailyQuota429,
            self.config.daily_cooldown,
        )
        .await;
    }

    pub async fn register_network_failure(&self, provider_key: &str, model: &str) {
        self.insert(
            provider_key,
            model,
            CooldownReason::Network,
            self.config.network_cooldown,
        )
        .await;
    }

    pub async fn cooldown_until(&self, provider_key: &str, model: &str) -> Option<Instant> {
        let cooldowns = self.cooldowns.read().await;
        cooldowns
            .get(&(provider_key.to_string(), model.to_string()))
            .filter(|entry| entry.is_active())
            .map(CooldownEntry::until)
    }

    pub async fn is_cooling(&self, provider_key: &str, model: &str) -> bool {
        self.cooldown_until(provider_key, model).await.is_some()
    }

    /// Drop expired entries; called opportunistically by the engine.
    pub async fn sweep(&self) {
        self.cooldowns
            .write()
            .await
            .retain(|_, entry| entry.is_active());
    }

    async fn insert(
        &self,
        provider_key: &str,
        model: &str,
        reason: CooldownReason,
        duration: Duration,
    ) {
        tracing::debug!(
            provider_key,
            model,
            ?reason,
            secs = duration.as_secs(),
            "cooldown installed"
        );
        self.cooldowns.write().await.insert(
            (provider_key.to_string(), model.to_string()),
            CooldownEntry {
                reason,
                started_at: Instant::now(),
                duration,
            },
        );
    }
}

fn is_daily_quota_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("quota") || lower.contains("daily") || lower.contains("exceeded today")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> RateLimitManager {
        RateLimitManager::new(RateLimitConfig {
            short_cooldown: Duration::from_millis(40),
            daily_cooldown: Duration::from_secs(3600),
            network_cooldown: Duration::from_millis(20),
        })
    }

    #[tokio::test]
    async fn transient_429_cools_down_briefly() {
        let manager = manager();
        let escalated = manager
            .register_failure("openai.k1", "gpt-4", "Too many requests")
            .await;
        assert!(!escalated);
        assert!(manager.is_cooling("openai.k1", "gpt-4").await);
        assert!(!manager.is_cooling("openai.k1", "gpt-3.5").await);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!manager.is_cooling("openai.k1", "gpt-4").await);
    }

    #[tokio::test]
    async fn daily_quota_escalates_to_long_cooldown() {
        let manager = manager();
        let escalated = manager
            .register_failure("glm.k1", "glm-4", "You have exceeded today's limit")
            .await;
        assert!(escalated);
        let until = manager.cooldown_until("glm.k1", "glm-4").await.unwrap();
        // at least an hour out
        assert!(until - Instant::now() >= Duration::from_secs(3500));
    }

    #[tokio::test]
    async fn sweep_drops_expired_entries() {
        let manager = manager();
        manager.register_network_failure("a.k", "m").await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        manager.sweep().await;
        assert!(manager.cooldowns.read().await.is_empty());
    }
}
