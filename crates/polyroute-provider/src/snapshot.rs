use std::path::PathBuf;

use serde_json::Value;

/// Optional debug snapshots of outbound payloads, written under the state
/// directory (`codex-samples/`). Failures are logged and ignored; snapshots
/// must never affect the request path.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub async fn write(&self, request_id: &str, provider_id: &str, payload: &Value) {
        let path = self.dir.join(format!("{request_id}-{provider_id}.json"));
        let Ok(raw) = serde_json::to_vec_pretty(payload) else {
            return;
        };
        if let Err(err) = tokio::fs::create_dir_all(&self.dir).await {
            tracing::debug!(error = %err, "snapshot dir create failed");
            return;
        }
        if let Err(err) = tokio::fs::write(&path, raw).await {
            tracing::debug!(error = %err, path = %path.display(), "snapshot write failed");
        }
    }
}
