//! Structured event logging for pipeline runs.
//!
//! Writes append-only JSONL to `{store_dir}/runs/{run_id}/events.jsonl`.

use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

// ── Event types ──

/// A pipeline event. Serialized as tagged JSON (`"type": "run_start"`, etc.).
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    RunStart {
        target: String,
        mode: String,
    },
    Scored {
        score: f64,
        hook_count: usize,
    },
    NothingToPost,
    Selected {
        template: String,
        hook: String,
        bucket: u8,
    },
    Rendered {
        artifact: String,
    },
    DispatchSucceeded {
        post_id: String,
        post_ref: String,
        submit_attempts: u32,
    },
    DispatchFailed {
        post_id: String,
        error: String,
    },
    DraftSaved {
        post_id: String,
    },
    DispatchAborted {
        post_id: String,
    },
    AmplifyScheduled {
        task_id: String,
        parent_post_id: String,
        fire_at: String,
    },
    RunFailed {
        stage: String,
        error: String,
    },
    RunCompleted,
}

/// Wrapper that adds sequence number and timestamp to each event.
#[derive(Debug, Serialize)]
pub struct FullEvent {
    pub seq: u32,
    pub ts: String,
    #[serde(flatten)]
    pub event: Event,
}

// ── EventLogger ──

/// Append-only JSONL event writer.
pub struct EventLogger {
    jsonl_path: PathBuf,
    seq: u32,
}

impl EventLogger {
    /// Create a new logger. Path: `{store_dir}/runs/{run_id}/events.jsonl`.
    pub fn new(store_dir: &Path, run_id: &str) -> Self {
        let jsonl_path = store_dir.join("runs").join(run_id).join("events.jsonl");
        Self { jsonl_path, seq: 0 }
    }

    /// Record an event. Best-effort: silently ignores write failures.
    pub fn record(&mut self, event: Event) {
        let full = FullEvent {
            seq: self.seq,
            ts: now_rfc3339(),
            event,
        };
        self.seq += 1;

        if let Ok(line) = serde_json::to_string(&full) {
            let _ = append_line(&self.jsonl_path, &line);
        }
    }
}

/// Append a single line to a file, creating parent dirs if needed.
fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}
