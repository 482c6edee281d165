use std::{
    fs::{File, OpenOptions, create_dir_all},
    io::{BufRead, BufReader, Write},
    path::PathBuf,
};

use fd_lock::RwLock;

use crate::error::{Context, Result};

/// Append-only JSONL transcript storage with file locking.
///
/// One file per session key; every line is a complete JSON message. Writes
/// take an exclusive lock so concurrent appends from unrelated delivery
/// calls land as whole lines.
pub struct TranscriptStore {
    base_dir: PathBuf,
}

impl TranscriptStore {
    #[must_use]
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Sanitize a session key for use as a filename.
    fn key_to_filename(key: &str) -> String {
        key.replace([':', '/'], "_")
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}.jsonl", Self::key_to_filename(key)))
    }

    /// Append one message as a single line to the session file.
    pub async fn append(&self, key: &str, message: &serde_json::Value) -> Result<()> {
        let path = self.path_for(key);
        let line = serde_json::to_string(message)?;

        tokio::task::spawn_blocking(move || -> Result<()> {
            if let Some(parent) = path.parent() {
                create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            let mut lock = RwLock::new(file);
            let mut guard = lock.write().context("transcript write lock")?;
            writeln!(*guard, "{line}")?;
            Ok(())
        })
        .await
        .context("transcript append task")??;

        Ok(())
    }

    /// Read all messages from a session file. Malformed lines are skipped
    /// with a warning rather than poisoning the whole transcript.
    pub async fn read(&self, key: &str) -> Result<Vec<serde_json::Value>> {
        let path = self.path_for(key);

        tokio::task::spawn_blocking(move || -> Result<Vec<serde_json::Value>> {
            if !path.exists() {
                return Ok(Vec::new());
            }
            let reader = BufReader::new(File::open(&path)?);
            let mut messages = Vec::new();
            for line in reader.lines() {
                let line = line?;
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str(trimmed) {
                    Ok(value) => messages.push(value),
                    Err(e) => tracing::warn!("skipping malformed transcript line: {e}"),
                }
            }
            Ok(messages)
        })
        .await
        .context("transcript read task")?
    }
}
