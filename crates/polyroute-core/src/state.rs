use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use polyroute_common::EnvOverrides;
use polyroute_provider::{HttpTransport, SnapshotWriter};
use polyroute_provider::transport::TransportConfig;
use polyroute_router::{
    HealthConfig, HealthManager, RateLimitConfig, RateLimitManager, SessionStore,
};

use crate::config::{ConfigDocument, ConfigError, RouterTable};
use crate::pipeline::PipelineAssembler;
use crate::registry::ModuleRegistry;
use crate::stream::StreamingManager;

const SWEEP_INTERVAL: Duration = Duration::from_secs(600);

/// Process-wide shared state. The routing table swaps atomically on reload;
/// health, cooldowns, and session state survive reloads.
pub struct AppState {
    table: ArcSwap<RouterTable>,
    pub health: Arc<HealthManager>,
    pub ratelimit: Arc<RateLimitManager>,
    pub sessions: Arc<SessionStore>,
    pub registry: ModuleRegistry,
    pub assembler: PipelineAssembler,
    pub streaming: StreamingManager,
    pub env: EnvOverrides,
    state_dir: PathBuf,
}

impl AppState {
    pub fn new(
        document: &ConfigDocument,
        env: EnvOverrides,
        state_dir: PathBuf,
    ) -> Result<Arc<Self>, ConfigError> {
        let health = HealthManager::new(HealthConfig::default());
        let ratelimit = Arc::new(RateLimitManager::new(RateLimitConfig::default()));
        let sessions = Arc::new(SessionStore::default());
        let registry = ModuleRegistry::new();

        let transport = Arc::new(HttpTransport::new(TransportConfig {
            connect_timeout: Duration::from_secs(10),
            stream_idle_timeout: env.stream_idle_timeout,
            headers_timeout: env.stream_headers_timeout,
        }));
        let snapshots = env
            .stats_enabled
            .then(|| SnapshotWriter::new(state_dir.join("codex-samples")));
        let assembler = PipelineAssembler::new(
            registry.clone(),
            transport,
            snapshots,
            env.responses_compat_bypass,
        );
        let streaming = StreamingManager::new(env.stream_idle_timeout);

        let table = RouterTable::build(
            document,
            &state_dir,
            env.provider_timeout,
            health.clone(),
            ratelimit.clone(),
            sessions.clone(),
        )?;

        Ok(Arc::new(Self {
            table: ArcSwap::from_pointee(table),
            health,
            ratelimit,
            sessions,
            registry,
            assembler,
            streaming,
            env,
            state_dir,
        }))
    }

    pub fn table(&self) -> Arc<RouterTable> {
        self.table.load_full()
    }

    pub fn state_dir(&self) -> &PathBuf {
        &self.state_dir
    }

    /// Swap in a new configuration atomically. In-flight requests keep the
    /// table they loaded; module instances for unchanged providers survive.
    pub fn reload(&self, document: &ConfigDocument) -> Result<(), ConfigError> {
        let table = RouterTable::build(
            document,
            &self.state_dir,
            self.env.provider_timeout,
            self.health.clone(),
            self.ratelimit.clone(),
            self.sessions.clone(),
        )?;
        let live_hashes: Vec<String> = table
            .providers
            .values()
            .map(|provider| provider.config_hash.clone())
            .collect();
        self.table.store(Arc::new(table));
        self.registry.retain_adapters(&live_hashes);
        tracing::info!("configuration reloaded");
        Ok(())
    }

    /// Start the recovery ticker and periodic sweepers. Called once after
    /// the runtime is up.
    pub fn spawn_background_tasks(self: &Arc<Self>) {
        self.health.spawn_recovery_task();
        let state = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                state.sessions.sweep().await;
                state.ratelimit.sweep().await;
            }
        });
    }
}
