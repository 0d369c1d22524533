//! Append-only record journal with file-based persistence.
//!
//! Records are stored as newline-delimited JSON (JSONL) for simplicity
//! and easy debugging/inspection, one directory per root process
//! instance. An advisory lock on the instance directory keeps two engines
//! from writing the same journal.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::domain::Record;

/// File-based journal for one root process instance.
pub struct Journal {
    instance_dir: PathBuf,
    records_path: PathBuf,
    /// Held for the lifetime of the journal
    _lock: File,
}

impl Journal {
    /// Create or open the journal of a root process instance.
    pub async fn open(home: &Path, instance_key: u64) -> Result<Self> {
        let instance_dir = home.join("instances").join(instance_key.to_string());
        fs::create_dir_all(&instance_dir).await.with_context(|| {
            format!("Failed to create instance directory: {}", instance_dir.display())
        })?;

        let lock_path = instance_dir.join("lock");
        let lock = File::create(&lock_path)
            .with_context(|| format!("Failed to create lock file: {}", lock_path.display()))?;
        lock.try_lock_exclusive().with_context(|| {
            format!("Journal already locked by another process: {}", instance_dir.display())
        })?;

        let records_path = instance_dir.join("records.jsonl");

        Ok(Self {
            instance_dir,
            records_path,
            _lock: lock,
        })
    }

    pub fn instance_dir(&self) -> &Path {
        &self.instance_dir
    }

    pub fn records_path(&self) -> &Path {
        &self.records_path
    }

    /// Append a batch of records to the log.
    pub async fn append_batch(&self, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.records_path)
            .await
            .with_context(|| {
                format!("Failed to open records file: {}", self.records_path.display())
            })?;

        let mut buffer = String::new();
        for record in records {
            let json = serde_json::to_string(record).context("Failed to serialize record")?;
            buffer.push_str(&json);
            buffer.push('\n');
        }
        file.write_all(buffer.as_bytes())
            .await
            .context("Failed to write records")?;
        file.flush().await.context("Failed to flush records")?;

        Ok(())
    }

    /// Replay all records in order.
    pub async fn replay(&self) -> Result<Vec<Record>> {
        if !self.records_path.exists() {
            return Ok(Vec::new());
        }

        let file = tokio::fs::File::open(&self.records_path)
            .await
            .with_context(|| {
                format!("Failed to open records file: {}", self.records_path.display())
            })?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut records = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let record: Record = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse record: {}", line))?;
            records.push(record);
        }

        Ok(records)
    }

    /// List all journaled instance keys under a home directory.
    pub async fn list(home: &Path) -> Result<Vec<u64>> {
        let instances_dir = home.join("instances");
        if !instances_dir.exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&instances_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(key) = name.parse::<u64>() {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort_unstable();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Record, RecordBody};
    use serde_json::json;
    use tempfile::TempDir;

    fn variable_record(position: u64, name: &str) -> Record {
        Record::new(
            position,
            RecordBody::VariableSet {
                scope_key: 1,
                name: name.to_string(),
                value: json!(position),
            },
        )
    }

    #[tokio::test]
    async fn test_append_and_replay() {
        let temp = TempDir::new().unwrap();
        let journal = Journal::open(temp.path(), 1).await.unwrap();

        journal
            .append_batch(&[variable_record(1, "a"), variable_record(2, "b")])
            .await
            .unwrap();
        journal.append_batch(&[variable_record(3, "c")]).await.unwrap();

        let records = journal.replay().await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(
            records.iter().map(|r| r.position).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[tokio::test]
    async fn test_replay_empty_journal() {
        let temp = TempDir::new().unwrap();
        let journal = Journal::open(temp.path(), 7).await.unwrap();
        assert!(journal.replay().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lock_rejects_second_writer() {
        let temp = TempDir::new().unwrap();
        let _journal = Journal::open(temp.path(), 1).await.unwrap();

        assert!(Journal::open(temp.path(), 1).await.is_err());
        // a different instance is fine
        assert!(Journal::open(temp.path(), 2).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_instances() {
        let temp = TempDir::new().unwrap();
        let a = Journal::open(temp.path(), 3).await.unwrap();
        let b = Journal::open(temp.path(), 1).await.unwrap();
        drop((a, b));

        let keys = Journal::list(temp.path()).await.unwrap();
        assert_eq!(keys, vec![1, 3]);
    }
}
