//! What happens after a decision: the access log and award notification.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use facegate_core::IdentityDecision;
use serde::{Deserialize, Serialize};

/// Receives every granted award.
pub trait AwardSink {
    fn grant(&mut self, decision: &IdentityDecision, contact: Option<&str>);
}

/// Records awards as structured log events.
#[derive(Debug, Default)]
pub struct LogAwardSink {
    granted: u64,
}

impl LogAwardSink {
    pub fn granted(&self) -> u64 {
        self.granted
    }
}

impl AwardSink for LogAwardSink {
    fn grant(&mut self, decision: &IdentityDecision, contact: Option<&str>) {
        self.granted += 1;
        tracing::info!(
            target: "facegate::award",
            name = decision.display_name(),
            confidence = ?decision.confidence,
            contact = contact.unwrap_or("-"),
            "award granted"
        );
    }
}

/// One line of `access_log.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessEntry {
    pub time: String,
    pub name: String,
    pub matched: bool,
    pub confidence: Option<f64>,
}

impl AccessEntry {
    pub fn from_decision(decision: &IdentityDecision) -> Self {
        Self {
            time: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            name: decision.display_name().to_string(),
            matched: decision.matched,
            confidence: decision.confidence,
        }
    }
}

/// Append-only JSON Lines log of identification decisions.
#[derive(Debug, Clone)]
pub struct AccessLog {
    path: PathBuf,
}

impl AccessLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &AccessEntry) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(&line)
    }
}
