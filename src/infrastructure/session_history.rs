use crate::domain::models::{FocusLogEntry, FocusOutcome};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::parse_stored_timestamp;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait SessionHistoryRepository: Send + Sync {
    fn append(&self, entry: &FocusLogEntry) -> Result<(), InfraError>;
    fn list_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<FocusLogEntry>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteSessionHistoryRepository {
    db_path: PathBuf,
}

impl SqliteSessionHistoryRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

type LogRow = (String, Option<String>, String, String, String, i64, i64);

impl SessionHistoryRepository for SqliteSessionHistoryRepository {
    fn append(&self, entry: &FocusLogEntry) -> Result<(), InfraError> {
        entry.validate().map_err(InfraError::InvalidInput)?;
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO focus_log (
               task_id, session_id, outcome, started_at, ended_at,
               planned_seconds, focused_seconds
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.task_id,
                entry.session_id,
                entry.outcome.as_str(),
                entry.started_at.to_rfc3339(),
                entry.ended_at.to_rfc3339(),
                entry.planned_seconds as i64,
                entry.focused_seconds as i64,
            ],
        )?;
        Ok(())
    }

    fn list_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<FocusLogEntry>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(
            "SELECT task_id, session_id, outcome, started_at, ended_at,
                    planned_seconds, focused_seconds
             FROM focus_log
             WHERE started_at >= ?1 AND started_at <= ?2
             ORDER BY started_at ASC, id ASC",
        )?;
        let rows = statement
            .query_map(params![start.to_rfc3339(), end.to_rfc3339()], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?
            .collect::<Result<Vec<LogRow>, _>>()?;

        rows.into_iter()
            .map(|(task_id, session_id, outcome, started_at, ended_at, planned, focused)| {
                Ok(FocusLogEntry {
                    task_id,
                    session_id,
                    outcome: parse_outcome(&outcome)?,
                    started_at: parse_stored_timestamp(&started_at, "focus_log.started_at")?,
                    ended_at: parse_stored_timestamp(&ended_at, "focus_log.ended_at")?,
                    planned_seconds: planned.max(0) as u64,
                    focused_seconds: focused.max(0) as u64,
                })
            })
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct InMemorySessionHistoryRepository {
    entries: Mutex<Vec<FocusLogEntry>>,
}

impl SessionHistoryRepository for InMemorySessionHistoryRepository {
    fn append(&self, entry: &FocusLogEntry) -> Result<(), InfraError> {
        entry.validate().map_err(InfraError::InvalidInput)?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|error| InfraError::InvalidState(format!("history lock poisoned: {error}")))?;
        entries.push(entry.clone());
        Ok(())
    }

    fn list_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<FocusLogEntry>, InfraError> {
        let entries = self
            .entries
            .lock()
            .map_err(|error| InfraError::InvalidState(format!("history lock poisoned: {error}")))?;
        Ok(entries
            .iter()
            .filter(|entry| entry.started_at >= start && entry.started_at <= end)
            .cloned()
            .collect())
    }
}

fn parse_outcome(value: &str) -> Result<FocusOutcome, InfraError> {
    match value.trim() {
        "completed" => Ok(FocusOutcome::Completed),
        "quit" => Ok(FocusOutcome::Quit),
        other => Err(InfraError::InvalidConfig(format!(
            "unsupported focus_log.outcome: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::initialize_database;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_DB: AtomicUsize = AtomicUsize::new(0);

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn entry(started_at: &str, outcome: FocusOutcome) -> FocusLogEntry {
        let started_at = fixed_time(started_at);
        FocusLogEntry {
            task_id: "tsk-1".to_string(),
            session_id: None,
            outcome,
            started_at,
            ended_at: started_at + chrono::Duration::minutes(25),
            planned_seconds: 1500,
            focused_seconds: 1500,
        }
    }

    #[test]
    fn sqlite_history_filters_by_start_time() {
        let sequence = NEXT_TEMP_DB.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "focusblock-history-tests-{}-{}",
            std::process::id(),
            sequence
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join("focusblock.sqlite");
        initialize_database(&path).expect("initialize database");

        let repository = SqliteSessionHistoryRepository::new(&path);
        repository
            .append(&entry("2026-02-16T09:00:00Z", FocusOutcome::Completed))
            .expect("append first");
        repository
            .append(&entry("2026-02-18T09:00:00Z", FocusOutcome::Quit))
            .expect("append second");
        repository
            .append(&entry("2026-02-16T23:59:59.250Z", FocusOutcome::Quit))
            .expect("append late");
        repository
            .append(&entry("2026-02-15T23:59:59.999Z", FocusOutcome::Completed))
            .expect("append early");

        let listed = repository
            .list_between(
                fixed_time("2026-02-16T00:00:00Z"),
                fixed_time("2026-02-17T00:00:00Z"),
            )
            .expect("list");
        assert_eq!(
            listed,
            vec![
                entry("2026-02-16T09:00:00Z", FocusOutcome::Completed),
                entry("2026-02-16T23:59:59.250Z", FocusOutcome::Quit),
            ]
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn history_rejects_inverted_entry() {
        let repository = InMemorySessionHistoryRepository::default();
        let mut invalid = entry("2026-02-16T09:00:00Z", FocusOutcome::Completed);
        invalid.ended_at = fixed_time("2026-02-16T08:00:00Z");
        assert!(repository.append(&invalid).is_err());
    }
}
