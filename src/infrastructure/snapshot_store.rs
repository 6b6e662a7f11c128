use crate::domain::models::TimerSnapshot;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::parse_stored_timestamp;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Durable record of an in-flight timer, one entry per task.
///
/// `save` overwrites and `clear` ignores missing keys, so callers may repeat
/// either without checking what is stored.
pub trait SnapshotStore: Send + Sync {
    fn save(&self, task_id: &str, snapshot: &TimerSnapshot) -> Result<(), InfraError>;
    fn load(&self, task_id: &str) -> Result<Option<TimerSnapshot>, InfraError>;
    /// The most recently saved snapshot of any task.
    fn latest(&self) -> Result<Option<TimerSnapshot>, InfraError>;
    fn clear(&self, task_id: &str) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteSnapshotStore {
    db_path: PathBuf,
}

impl SqliteSnapshotStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

type SnapshotRow = (String, Option<String>, String, i64, i64, bool, String, String);

const SELECT_SNAPSHOT: &str = "SELECT task_id, session_id, deadline, total_duration_seconds,
        remaining_seconds, is_paused, started_at, saved_at
 FROM focus_snapshots";

fn read_snapshot_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SnapshotRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn snapshot_from_row(row: SnapshotRow) -> Result<TimerSnapshot, InfraError> {
    let (task_id, session_id, deadline, total, remaining, is_paused, started_at, saved_at) = row;
    let snapshot = TimerSnapshot {
        task_id,
        session_id,
        deadline: parse_stored_timestamp(&deadline, "focus_snapshots.deadline")?,
        total_duration_seconds: total.max(0) as u64,
        remaining_seconds: remaining.max(0) as u64,
        is_paused,
        started_at: parse_stored_timestamp(&started_at, "focus_snapshots.started_at")?,
        saved_at: parse_stored_timestamp(&saved_at, "focus_snapshots.saved_at")?,
    };
    snapshot.validate().map_err(InfraError::InvalidConfig)?;
    Ok(snapshot)
}

impl SnapshotStore for SqliteSnapshotStore {
    fn save(&self, task_id: &str, snapshot: &TimerSnapshot) -> Result<(), InfraError> {
        let task_id = normalized_task_id(task_id)?;
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO focus_snapshots (
               task_id, session_id, deadline, total_duration_seconds,
               remaining_seconds, is_paused, started_at, saved_at
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(task_id) DO UPDATE SET
               session_id = excluded.session_id,
               deadline = excluded.deadline,
               total_duration_seconds = excluded.total_duration_seconds,
               remaining_seconds = excluded.remaining_seconds,
               is_paused = excluded.is_paused,
               started_at = excluded.started_at,
               saved_at = excluded.saved_at",
            params![
                task_id,
                snapshot.session_id,
                snapshot.deadline.to_rfc3339(),
                snapshot.total_duration_seconds as i64,
                snapshot.remaining_seconds as i64,
                snapshot.is_paused,
                snapshot.started_at.to_rfc3339(),
                snapshot.saved_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn load(&self, task_id: &str) -> Result<Option<TimerSnapshot>, InfraError> {
        let task_id = normalized_task_id(task_id)?;
        let connection = self.connect()?;
        let row = connection
            .query_row(
                &format!("{SELECT_SNAPSHOT} WHERE task_id = ?1"),
                params![task_id],
                read_snapshot_row,
            )
            .optional()?;
        row.map(snapshot_from_row).transpose()
    }

    fn latest(&self) -> Result<Option<TimerSnapshot>, InfraError> {
        let connection = self.connect()?;
        let row = connection
            .query_row(
                &format!("{SELECT_SNAPSHOT} ORDER BY saved_at DESC, rowid DESC LIMIT 1"),
                [],
                read_snapshot_row,
            )
            .optional()?;
        row.map(snapshot_from_row).transpose()
    }

    fn clear(&self, task_id: &str) -> Result<(), InfraError> {
        let task_id = normalized_task_id(task_id)?;
        let connection = self.connect()?;
        connection.execute(
            "DELETE FROM focus_snapshots WHERE task_id = ?1",
            params![task_id],
        )?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Mutex<HashMap<String, TimerSnapshot>>,
}

impl InMemorySnapshotStore {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, TimerSnapshot>>, InfraError> {
        self.snapshots
            .lock()
            .map_err(|error| InfraError::InvalidState(format!("snapshot store lock poisoned: {error}")))
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn save(&self, task_id: &str, snapshot: &TimerSnapshot) -> Result<(), InfraError> {
        let task_id = normalized_task_id(task_id)?;
        self.lock()?.insert(task_id.to_string(), snapshot.clone());
        Ok(())
    }

    fn load(&self, task_id: &str) -> Result<Option<TimerSnapshot>, InfraError> {
        let task_id = normalized_task_id(task_id)?;
        Ok(self.lock()?.get(task_id).cloned())
    }

    fn latest(&self) -> Result<Option<TimerSnapshot>, InfraError> {
        Ok(self
            .lock()?
            .values()
            .max_by_key(|snapshot| snapshot.saved_at)
            .cloned())
    }

    fn clear(&self, task_id: &str) -> Result<(), InfraError> {
        let task_id = normalized_task_id(task_id)?;
        self.lock()?.remove(task_id);
        Ok(())
    }
}

fn normalized_task_id(task_id: &str) -> Result<&str, InfraError> {
    let normalized = task_id.trim();
    if normalized.is_empty() {
        return Err(InfraError::InvalidInput(
            "task_id must not be empty".to_string(),
        ));
    }
    Ok(normalized)
}
