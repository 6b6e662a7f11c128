use crate::domain::models::{FocusLogEntry, FocusOutcome};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::session_history::SessionHistoryRepository;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectionSummary {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub completed_count: u32,
    pub quit_count: u32,
    pub total_focus_seconds: u64,
    pub entries: Vec<FocusLogEntry>,
}

pub fn reflection_summary<H>(
    history: &H,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<ReflectionSummary, InfraError>
where
    H: SessionHistoryRepository + ?Sized,
{
    if end <= start {
        return Err(InfraError::InvalidInput(
            "end must be greater than start".to_string(),
        ));
    }
    let entries = history.list_between(start, end)?;
    Ok(summarize(entries, start, end))
}

pub fn summarize(
    entries: Vec<FocusLogEntry>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> ReflectionSummary {
    let completed_count = entries
        .iter()
        .filter(|entry| entry.outcome == FocusOutcome::Completed)
        .count() as u32;
    let quit_count = entries
        .iter()
        .filter(|entry| entry.outcome == FocusOutcome::Quit)
        .count() as u32;
    let total_focus_seconds = entries.iter().map(|entry| entry.focused_seconds).sum();

    ReflectionSummary {
        start,
        end,
        completed_count,
        quit_count,
        total_focus_seconds,
        entries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::session_history::InMemorySessionHistoryRepository;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn entry(outcome: FocusOutcome, started_at: &str, focused_seconds: u64) -> FocusLogEntry {
        let started_at = fixed_time(started_at);
        FocusLogEntry {
            task_id: "tsk-1".to_string(),
            session_id: None,
            outcome,
            started_at,
            ended_at: started_at + chrono::Duration::seconds(focused_seconds as i64),
            planned_seconds: 1500,
            focused_seconds,
        }
    }

    #[test]
    fn summary_counts_outcomes_within_range() {
        let history = InMemorySessionHistoryRepository::default();
        history
            .append(&entry(FocusOutcome::Completed, "2026-02-16T09:00:00Z", 1500))
            .expect("append");
        history
            .append(&entry(FocusOutcome::Quit, "2026-02-16T10:00:00Z", 300))
            .expect("append");
        history
            .append(&entry(FocusOutcome::Completed, "2026-02-18T09:00:00Z", 1500))
            .expect("append");

        let summary = reflection_summary(
            &history,
            fixed_time("2026-02-16T00:00:00Z"),
            fixed_time("2026-02-17T00:00:00Z"),
        )
        .expect("summary");

        assert_eq!(summary.completed_count, 1);
        assert_eq!(summary.quit_count, 1);
        assert_eq!(summary.total_focus_seconds, 1800);
        assert_eq!(summary.entries.len(), 2);
    }

    #[test]
    fn summary_rejects_inverted_range() {
        let history = InMemorySessionHistoryRepository::default();
        let at = fixed_time("2026-02-16T00:00:00Z");
        assert!(matches!(
            reflection_summary(&history, at, at),
            Err(InfraError::InvalidInput(_))
        ));
    }
}
