use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Process-lifecycle markers under the state directory:
/// `logs/process-lifecycle.jsonl` (append-only event log) and
/// `state/runtime-lifecycle/server-<port>.json` (crash detection).
pub struct Lifecycle {
    log_path: PathBuf,
    marker_path: PathBuf,
    port: u16,
}

impl Lifecycle {
    pub fn new(state_dir: &Path, port: u16) -> Self {
        Self {
            log_path: state_dir.join("logs").join("process-lifecycle.jsonl"),
            marker_path: state_dir
                .join("state")
                .join("runtime-lifecycle")
                .join(format!("server-{port}.json")),
            port,
        }
    }

    /// Record startup. A leftover marker from a previous run means that run
    /// never shut down cleanly.
    pub fn on_start(&self) {
        if self.marker_path.exists() {
            tracing::warn!(port = self.port, "previous run did not shut down cleanly");
            self.append("crash-detected");
        }
        self.append("start");
        if let Some(parent) = self.marker_path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let marker = json!({
            "pid": std::process::id(),
            "port": self.port,
            "startedAt": now(),
        });
        if let Err(err) = fs::write(&self.marker_path, marker.to_string()) {
            tracing::warn!(error = %err, "runtime marker write failed");
        }
    }

    pub fn on_stop(&self) {
        self.append("stop");
        let _ = fs::remove_file(&self.marker_path);
    }

    fn append(&self, event: &str) {
        if let Some(parent) = self.log_path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let line = json!({
            "event": event,
            "at": now(),
            "pid": std::process::id(),
            "port": self.port,
        });
        let entry = format!("{line}\n");
        let result = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .and_then(|mut file| std::io::Write::write_all(&mut file, entry.as_bytes()));
        if let Err(err) = result {
            tracing::warn!(error = %err, "lifecycle log append failed");
        }
    }
}

fn now() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}
