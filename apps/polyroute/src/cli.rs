use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "polyroute", about = "Multi-protocol LLM routing proxy")]
pub struct Cli {
    /// Path to the configuration document (JSON).
    #[arg(long, env = "POLYROUTE_CONFIG", default_value = "polyroute.json")]
    pub config: PathBuf,

    #[arg(long, env = "POLYROUTE_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, env = "POLYROUTE_PORT", default_value_t = 5520)]
    pub port: u16,

    /// State directory for auth tokens, logs, and lifecycle markers.
    /// Defaults to ~/.polyroute.
    #[arg(long, env = "POLYROUTE_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Log filter, e.g. `info` or `polyroute_core=debug,info`.
    #[arg(long, env = "POLYROUTE_LOG", default_value = "info")]
    pub log: String,
}

impl Cli {
    pub fn resolved_state_dir(&self) -> PathBuf {
        if let Some(dir) = &self.state_dir {
            return dir.clone();
        }
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".polyroute")
    }
}
