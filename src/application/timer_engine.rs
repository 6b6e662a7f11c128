use crate::domain::models::remaining_seconds_until;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Running { remaining_seconds: u64 },
    /// Emitted once per started deadline, on the evaluation that first sees zero.
    Elapsed,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Idle,
    Running { deadline: DateTime<Utc> },
    Finished,
}

/// Countdown that never stores a counter: every evaluation recomputes the
/// remaining time from the absolute deadline, so missed or late ticks and
/// process suspension cannot make it drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTimerEngine {
    state: EngineState,
}

impl Default for LocalTimerEngine {
    fn default() -> Self {
        Self {
            state: EngineState::Idle,
        }
    }
}

impl LocalTimerEngine {
    pub fn start(&mut self, deadline: DateTime<Utc>) {
        self.state = EngineState::Running { deadline };
    }

    pub fn stop(&mut self) {
        self.state = EngineState::Idle;
    }

    pub fn evaluate(&mut self, now: DateTime<Utc>) -> TickOutcome {
        let EngineState::Running { deadline } = self.state else {
            return TickOutcome::Idle;
        };
        let remaining_seconds = remaining_seconds_until(deadline, now);
        if remaining_seconds == 0 {
            self.state = EngineState::Finished;
            return TickOutcome::Elapsed;
        }
        TickOutcome::Running { remaining_seconds }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickUpdate {
    Running { task_id: String, remaining_seconds: u64 },
    Completed { task_id: String },
    Idle,
}

#[async_trait]
pub trait TickTarget: Send + Sync {
    async fn tick(&self) -> Result<TickUpdate, InfraError>;
}

/// Wakes a parked ticker once a session is running again.
///
/// A permit is kept when nobody waits, so arming just before the ticker parks
/// is not lost.
#[derive(Debug, Default)]
pub struct TickSignal {
    notify: Notify,
}

impl TickSignal {
    pub fn arm(&self) {
        self.notify.notify_one();
    }

    async fn armed(&self) {
        self.notify.notified().await;
    }
}

/// Drives `target` every `period` while it reports a running session.
///
/// When the target completes or idles the loop parks until `signal` is armed,
/// so one task serves every session of the process. Late ticks are skipped
/// rather than bunched; the target recomputes from its deadline anyway.
pub fn spawn_ticker<T, F>(
    target: Arc<T>,
    signal: Arc<TickSignal>,
    period: Duration,
    on_tick: F,
) -> JoinHandle<()>
where
    T: TickTarget + 'static,
    F: Fn(&TickUpdate) + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut ticks = interval(period.max(Duration::from_millis(1)));
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticks.tick().await;
            match target.tick().await {
                Ok(update) => {
                    on_tick(&update);
                    if matches!(update, TickUpdate::Running { .. }) {
                        continue;
                    }
                }
                Err(error) => {
                    // the deadline may still be pending; try again next period
                    tracing::warn!("focus timer tick failed: {error}");
                    continue;
                }
            }
            signal.armed().await;
            ticks.reset_immediately();
        }
    })
}
