use crate::types::{TaskKind, TaskState};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vertex_core::{ErrorReport, Priority};

/// `[audit]` configuration table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Write `audit.jsonl` at all.
    #[serde(default)]
    pub enabled: bool,
    /// Directory holding `audit.jsonl`.
    #[serde(default = "default_audit_dir")]
    pub dir: PathBuf,
}

fn default_audit_dir() -> PathBuf {
    PathBuf::from("audit")
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_audit_dir(),
        }
    }
}

/// One line of `audit.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
    /// Absent for rejected submissions, which never receive an id.
    pub task_id: Option<Uuid>,
    /// What happened.
    pub action: AuditAction,
    /// Shape of the task.
    pub kind: TaskKind,
    /// Submitted priority.
    pub priority: Priority,
    /// State after the event. Absent for rejections.
    pub state: Option<TaskState>,
    /// Rejection or failure cause.
    pub error: Option<ErrorReport>,
    /// Event-specific extras.
    pub details: serde_json::Value,
}

/// Lifecycle event an [`AuditEntry`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    /// Admitted and queued.
    Submitted,
    /// Refused at admission.
    Rejected,
    /// Reached a terminal state.
    Finished,
}

/// Append-only task history. Entries are written to `audit.jsonl` by a
/// background task in the order they were logged.
///
/// Clones share one writer. [`AuditLog::close`] flushes everything logged so
/// far and stops it; entries logged afterwards are discarded.
#[derive(Clone)]
pub struct AuditLog {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<AuditEntry>>>>,
    writer: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl AuditLog {
    /// Spawn the writer appending to `dir/audit.jsonl`. Must be called from
    /// within a Tokio runtime.
    pub fn open(dir: PathBuf) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditEntry>();

        let writer = tokio::spawn(async move {
            if let Err(e) = tokio::fs::create_dir_all(&dir).await {
                warn!(dir = %dir.display(), error = %e, "Cannot create audit directory");
                return;
            }
            let path = dir.join("audit.jsonl");
            let mut file = match tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
            {
                Ok(f) => f,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot open audit log");
                    return;
                }
            };

            while let Some(entry) = rx.recv().await {
                let Ok(line) = serde_json::to_string(&entry) else {
                    continue;
                };
                let line = format!("{line}\n");
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    warn!(error = %e, "Audit write failed");
                    continue;
                }
                let _ = file.flush().await;
            }
        });

        Self {
            tx: Arc::new(Mutex::new(Some(tx))),
            writer: Arc::new(Mutex::new(Some(writer))),
        }
    }

    /// Stop accepting entries and wait until every queued one is on disk.
    /// Later calls return immediately.
    pub async fn close(&self) {
        drop(self.tx.lock().take());
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                warn!(error = %e, "Audit writer ended abnormally");
            }
            debug!("Audit log closed");
        }
    }

    /// Queue `entry` for the writer. Dropped with a warning once closed.
    pub fn log(&self, entry: AuditEntry) {
        info!(
            task_id = ?entry.task_id,
            action = ?entry.action,
            state = ?entry.state,
            "audit"
        );
        match self.tx.lock().as_ref() {
            Some(tx) => {
                let _ = tx.send(entry);
            }
            None => warn!(task_id = ?entry.task_id, "Audit log closed, entry dropped"),
        }
    }

    /// Record an admitted task.
    pub fn submitted(&self, task_id: Uuid, kind: TaskKind, priority: Priority, details: serde_json::Value) {
        self.log(AuditEntry {
            timestamp: Utc::now(),
            task_id: Some(task_id),
            action: AuditAction::Submitted,
            kind,
            priority,
            state: Some(TaskState::Queued),
            error: None,
            details,
        });
    }

    /// Record a refused submission.
    pub fn rejected(&self, kind: TaskKind, priority: Priority, error: ErrorReport) {
        self.log(AuditEntry {
            timestamp: Utc::now(),
            task_id: None,
            action: AuditAction::Rejected,
            kind,
            priority,
            state: None,
            error: Some(error),
            details: serde_json::Value::Null,
        });
    }

    /// Record a terminal transition.
    pub fn finished(
        &self,
        task_id: Uuid,
        kind: TaskKind,
        priority: Priority,
        state: TaskState,
        error: Option<ErrorReport>,
        details: serde_json::Value,
    ) {
        self.log(AuditEntry {
            timestamp: Utc::now(),
            task_id: Some(task_id),
            action: AuditAction::Finished,
            kind,
            priority,
            state: Some(state),
            error,
            details,
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_entries_written_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("nested"));
        let id = Uuid::new_v4();
        log.submitted(id, TaskKind::Chain, Priority::HIGH, json!({"steps": 2}));
        log.rejected(
            TaskKind::Single,
            Priority::LOW,
            ErrorReport {
                kind: "ResourceExhaustedError".into(),
                message: "throttled".into(),
            },
        );
        log.finished(id, TaskKind::Chain, Priority::HIGH, TaskState::Completed, None, json!({}));
        log.close().await;

        let text = std::fs::read_to_string(dir.path().join("nested/audit.jsonl")).unwrap();
        let entries: Vec<AuditEntry> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].action, AuditAction::Submitted);
        assert_eq!(entries[1].action, AuditAction::Rejected);
        assert!(entries[1].task_id.is_none());
        assert_eq!(entries[2].state, Some(TaskState::Completed));
    }

    #[tokio::test]
    async fn test_close_flushes_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path().to_path_buf());
        let clone = log.clone();
        for _ in 0..50 {
            clone.submitted(Uuid::new_v4(), TaskKind::Single, Priority::MEDIUM, json!(null));
        }
        log.close().await;
        clone.close().await;
        // Dropped, not written.
        clone.submitted(Uuid::new_v4(), TaskKind::Single, Priority::MEDIUM, json!(null));

        let text = std::fs::read_to_string(dir.path().join("audit.jsonl")).unwrap();
        assert_eq!(text.lines().count(), 50);
    }
}
