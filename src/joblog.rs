//! Append-only per-job progress logs.
//!
//! Each job owns one log file, written by the step/stop/finalize paths and
//! tailed by the progress stream through a byte offset. Log IO is strictly
//! best-effort: a failed append must never fail the job it narrates.

use std::path::PathBuf;

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct JobLog {
    dir: PathBuf,
}

impl JobLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, job_id: Uuid) -> PathBuf {
        self.dir.join(format!("{job_id}.log"))
    }

    /// Append one timestamped line. Embedded newlines are flattened so the
    /// line framing stays intact for the tailing reader.
    pub async fn append(&self, job_id: Uuid, line: &str) {
        if let Err(err) = self.try_append(job_id, line).await {
            warn!(job_id = %job_id, error = %err, "failed to append job log line");
        }
    }

    async fn try_append(&self, job_id: Uuid, line: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.path(job_id))
            .await?;
        let entry = format!(
            "{} {}\n",
            Utc::now().to_rfc3339(),
            line.replace('\n', " ")
        );
        file.write_all(entry.as_bytes()).await
    }

    /// Complete lines appended after `offset`, plus the next offset to poll
    /// from. A missing file or a read failure reads as "nothing new yet".
    pub async fn read_from(&self, job_id: Uuid, offset: u64) -> (Vec<String>, u64) {
        let bytes = match tokio::fs::read(self.path(job_id)).await {
            Ok(bytes) => bytes,
            Err(_) => return (Vec::new(), offset),
        };

        let offset = offset as usize;
        if bytes.len() <= offset {
            return (Vec::new(), offset as u64);
        }

        let tail = &bytes[offset..];
        // Only consume up to the last complete line; a write may be mid-way.
        let Some(last_newline) = tail.iter().rposition(|b| *b == b'\n') else {
            return (Vec::new(), offset as u64);
        };

        let complete = &tail[..=last_newline];
        let lines = String::from_utf8_lossy(complete)
            .lines()
            .map(str::to_string)
            .collect();
        (lines, (offset + last_newline + 1) as u64)
    }
}
