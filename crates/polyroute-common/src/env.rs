use std::time::Duration;

/// Environment-variable controls, read once at startup.
///
/// Defaults match the documented operational defaults; every field can be
/// overridden per process without touching the config file.
#[derive(Debug, Clone)]
pub struct EnvOverrides {
    /// Per-provider upstream timeout.
    pub provider_timeout: Duration,
    /// Streaming idle timeout (no bytes from upstream).
    pub stream_idle_timeout: Duration,
    /// Time allowed for upstream response headers.
    pub stream_headers_timeout: Duration,
    pub stats_enabled: bool,
    /// OpenAI-chat → Anthropic stream conversion toggle.
    pub o2a_stream_enabled: bool,
    /// Bypass the compat filter for responses-protocol upstreams.
    pub responses_compat_bypass: bool,
    /// System-prompt override source.
    pub system_prompt_source: SystemPromptSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemPromptSource {
    Codex,
    Claude,
}

impl Default for EnvOverrides {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(300),
            stream_idle_timeout: Duration::from_secs(90),
            stream_headers_timeout: Duration::from_secs(30),
            stats_enabled: false,
            o2a_stream_enabled: true,
            responses_compat_bypass: true,
            system_prompt_source: SystemPromptSource::Codex,
        }
    }
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        let mut overrides = Self::default();
        if let Some(secs) = read_u64("POLYROUTE_PROVIDER_TIMEOUT_SECS") {
            overrides.provider_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = read_u64("POLYROUTE_STREAM_IDLE_TIMEOUT_SECS") {
            overrides.stream_idle_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = read_u64("POLYROUTE_STREAM_HEADERS_TIMEOUT_SECS") {
            overrides.stream_headers_timeout = Duration::from_secs(secs);
        }
        if let Some(flag) = read_flag("POLYROUTE_STATS") {
            overrides.stats_enabled = flag;
        }
        if let Some(flag) = read_flag("POLYROUTE_O2A_STREAM") {
            overrides.o2a_stream_enabled = flag;
        }
        if let Some(flag) = read_flag("POLYROUTE_RESPONSES_COMPAT_BYPASS") {
            overrides.responses_compat_bypass = flag;
        }
        if let Ok(value) = std::env::var("POLYROUTE_SYSTEM_PROMPT_SOURCE") {
            overrides.system_prompt_source = match value.trim() {
                "claude" => SystemPromptSource::Claude,
                _ => SystemPromptSource::Codex,
            };
        }
        overrides
    }
}

fn read_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.trim().parse().ok()
}

fn read_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim() {
        "1" | "true" | "on" => Some(true),
        "0" | "false" | "off" => Some(false),
        _ => None,
    }
}
