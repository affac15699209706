//! State Management - status snapshot and decision journal on disk

use chrono::NaiveDate;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Writes `state/now.json` and `journal/decisions/<day>.jsonl`
pub struct StateManager {
    state_dir: PathBuf,
    journal_dir: PathBuf,
}

impl StateManager {
    pub fn new(workspace_dir: impl AsRef<Path>) -> Self {
        let base = workspace_dir.as_ref();
        Self {
            state_dir: base.join("state"),
            journal_dir: base.join("journal").join("decisions"),
        }
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.state_dir).await?;
        fs::create_dir_all(&self.journal_dir).await?;
        Ok(())
    }

    pub fn now_path(&self) -> PathBuf {
        self.state_dir.join("now.json")
    }

    pub fn journal_path(&self, day: NaiveDate) -> PathBuf {
        self.journal_dir.join(format!("{}.jsonl", day.format("%Y-%m-%d")))
    }

    /// Replace the current status snapshot
    pub async fn write_now<T: Serialize>(&self, state: &T) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(state)?;
        fs::write(self.now_path(), json).await?;
        debug!("Wrote state/now.json");
        Ok(())
    }

    /// Append one entry to the day's decision journal
    pub async fn append_decision<T: Serialize>(&self, day: NaiveDate, entry: &T) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.journal_path(day))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_write_now_and_journal() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateManager::new(dir.path());
        state.init().await.unwrap();

        state.write_now(&json!({"cycles": 1})).await.unwrap();
        state.write_now(&json!({"cycles": 2})).await.unwrap();
        let now: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(state.now_path()).unwrap()).unwrap();
        assert_eq!(now["cycles"], 2);

        let day = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        state.append_decision(day, &json!({"action": "HOLD"})).await.unwrap();
        state.append_decision(day, &json!({"action": "SWAP"})).await.unwrap();

        let journal = std::fs::read_to_string(state.journal_path(day)).unwrap();
        let lines: Vec<&str> = journal.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("SWAP"));
        assert!(state.journal_path(day).ends_with("journal/decisions/2026-04-01.jsonl"));
    }
}
