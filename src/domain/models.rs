use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound for any single duration the timer will accept, local or remote.
pub const MAX_SESSION_SECONDS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Paused,
    Completed,
    Quit,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Quit => "quit",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Quit)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FocusSession {
    pub id: Option<String>,
    pub task_id: String,
    pub status: SessionStatus,
    pub total_duration_seconds: u64,
    pub deadline: Option<DateTime<Utc>>,
    pub remaining_seconds: u64,
    pub started_at: DateTime<Utc>,
}

impl FocusSession {
    pub fn running(
        task_id: impl Into<String>,
        duration_seconds: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            task_id: task_id.into(),
            status: SessionStatus::Running,
            total_duration_seconds: duration_seconds,
            deadline: Some(now + seconds(duration_seconds)),
            remaining_seconds: duration_seconds,
            started_at: now,
        }
    }

    pub fn is_local_only(&self) -> bool {
        self.id.is_none()
    }

    /// Remaining time as seen at `now`. Running sessions derive it from the
    /// deadline; every other status reports the frozen value.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> u64 {
        match (self.status, self.deadline) {
            (SessionStatus::Running, Some(deadline)) => remaining_seconds_until(deadline, now),
            _ => self.remaining_seconds,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.task_id, "session.task_id")?;
        if let Some(id) = self.id.as_deref() {
            validate_non_empty(id, "session.id")?;
        }
        if self.total_duration_seconds == 0 {
            return Err("session.total_duration_seconds must be > 0".to_string());
        }
        match (self.status, self.deadline) {
            (SessionStatus::Running, None) => {
                Err("session.deadline is required while running".to_string())
            }
            (status, Some(_)) if status != SessionStatus::Running => {
                Err("session.deadline must be cleared unless running".to_string())
            }
            _ => Ok(()),
        }
    }

    pub fn to_snapshot(&self, saved_at: DateTime<Utc>) -> Option<TimerSnapshot> {
        let (deadline, is_paused) = match self.status {
            SessionStatus::Running => (self.deadline?, false),
            SessionStatus::Paused => (saved_at + seconds(self.remaining_seconds), true),
            SessionStatus::Completed | SessionStatus::Quit => return None,
        };
        Some(TimerSnapshot {
            task_id: self.task_id.clone(),
            session_id: self.id.clone(),
            deadline,
            total_duration_seconds: self.total_duration_seconds,
            remaining_seconds: self.remaining_at(saved_at),
            is_paused,
            started_at: self.started_at,
            saved_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub task_id: String,
    pub session_id: Option<String>,
    pub deadline: DateTime<Utc>,
    pub total_duration_seconds: u64,
    pub remaining_seconds: u64,
    pub is_paused: bool,
    pub started_at: DateTime<Utc>,
    pub saved_at: DateTime<Utc>,
}

impl TimerSnapshot {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.task_id, "snapshot.task_id")?;
        if self.total_duration_seconds == 0 {
            return Err("snapshot.total_duration_seconds must be > 0".to_string());
        }
        Ok(())
    }

    /// Paused snapshots keep their frozen remaining time; running ones are
    /// only trusted through their deadline.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> u64 {
        if self.is_paused {
            self.remaining_seconds
        } else {
            remaining_seconds_until(self.deadline, now)
        }
    }

    pub fn into_session(self, now: DateTime<Utc>) -> FocusSession {
        let remaining_seconds = self.remaining_at(now);
        let (status, deadline) = if self.is_paused {
            (SessionStatus::Paused, None)
        } else {
            (SessionStatus::Running, Some(self.deadline))
        };
        FocusSession {
            id: self.session_id,
            task_id: self.task_id,
            status,
            total_duration_seconds: self.total_duration_seconds,
            deadline,
            remaining_seconds,
            started_at: self.started_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FocusOutcome {
    Completed,
    Quit,
}

impl FocusOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Quit => "quit",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FocusLogEntry {
    pub task_id: String,
    pub session_id: Option<String>,
    pub outcome: FocusOutcome,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub planned_seconds: u64,
    pub focused_seconds: u64,
}

impl FocusLogEntry {
    pub fn from_session(session: &FocusSession, ended_at: DateTime<Utc>) -> Option<Self> {
        let outcome = match session.status {
            SessionStatus::Completed => FocusOutcome::Completed,
            SessionStatus::Quit => FocusOutcome::Quit,
            SessionStatus::Running | SessionStatus::Paused => return None,
        };
        Some(Self {
            task_id: session.task_id.clone(),
            session_id: session.id.clone(),
            outcome,
            started_at: session.started_at,
            ended_at,
            planned_seconds: session.total_duration_seconds,
            focused_seconds: session
                .total_duration_seconds
                .saturating_sub(session.remaining_seconds),
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.task_id, "focus_log.task_id")?;
        if self.ended_at < self.started_at {
            return Err("focus_log.ended_at must be >= focus_log.started_at".to_string());
        }
        if self.focused_seconds > self.planned_seconds {
            return Err("focus_log.focused_seconds must be <= planned_seconds".to_string());
        }
        Ok(())
    }
}

/// Whole seconds left until `deadline`, rounded up so a fresh session reports
/// its full duration and zero is only reached once the deadline has passed.
pub fn remaining_seconds_until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (deadline - now).num_milliseconds();
    if millis <= 0 {
        return 0;
    }
    ((millis + 999) / 1000) as u64
}

pub fn seconds(value: u64) -> Duration {
    Duration::seconds(value.min(MAX_SESSION_SECONDS) as i64)
}

pub fn validate_duration(value: u64, field_name: &str) -> Result<(), String> {
    if value == 0 {
        return Err(format!("{field_name} must be > 0"));
    }
    if value > MAX_SESSION_SECONDS {
        return Err(format!("{field_name} must be <= {MAX_SESSION_SECONDS}"));
    }
    Ok(())
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
