use crate::application::completion::CompletionNotifier;
use crate::application::timer_engine::{LocalTimerEngine, TickOutcome, TickUpdate};
use crate::domain::models::{
    seconds, validate_duration, FocusLogEntry, FocusSession, SessionStatus, MAX_SESSION_SECONDS,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::session_gateway::{
    ActiveRemoteSession, RemainingUpdate, RemoteSessionStatus, StartedRemoteSession,
};
use crate::infrastructure::session_history::SessionHistoryRepository;
use crate::infrastructure::snapshot_store::SnapshotStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Remote remaining times within this distance of the local value are
/// treated as request latency, not disagreement.
const REMOTE_DRIFT_TOLERANCE_SECONDS: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteRequest {
    Start {
        task_id: String,
        duration_seconds: u64,
    },
    Pause {
        session_id: String,
    },
    Resume {
        session_id: String,
    },
    AddTime {
        session_id: String,
        seconds: u64,
    },
    Complete {
        session_id: String,
    },
    Quit {
        session_id: String,
    },
}

impl RemoteRequest {
    pub fn action(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Pause { .. } => "pause",
            Self::Resume { .. } => "resume",
            Self::AddTime { .. } => "add-time",
            Self::Complete { .. } => "complete",
            Self::Quit { .. } => "quit",
        }
    }
}

/// Identifies the local state a remote request was issued against.
/// `lineage` changes whenever a new session is installed, `revision` on every
/// local mutation of that session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteTicket {
    lineage: u64,
    revision: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRemote {
    pub ticket: RemoteTicket,
    pub request: RemoteRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteReply {
    Started(StartedRemoteSession),
    Remaining(RemainingUpdate),
    Acknowledged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub session: FocusSession,
    pub remote: Vec<PendingRemote>,
    pub persistence_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    Applied {
        session: FocusSession,
        follow_ups: Vec<PendingRemote>,
        persistence_error: Option<String>,
    },
    /// The reply belongs to a session that has since ended or been replaced.
    Stale { follow_ups: Vec<PendingRemote> },
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalResume {
    Resumed(Transition),
    /// Nothing to restore. `remote` carries the calls owed by a previous
    /// session that was completed on the way.
    Missing {
        remote: Vec<PendingRemote>,
        persistence_error: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    pub update: TickUpdate,
    pub transition: Option<Transition>,
}

#[derive(Debug)]
struct ActiveSession {
    session: FocusSession,
    lineage: u64,
    revision: u64,
    completion_fired: bool,
}

/// Focus session state machine. Every transition is applied locally first;
/// remote calls come back as [`PendingRemote`] values for the caller to run
/// and hand back through [`SessionController::apply_remote`].
pub struct SessionController<S, N, H>
where
    S: SnapshotStore,
    N: CompletionNotifier,
    H: SessionHistoryRepository,
{
    snapshot_store: Arc<S>,
    notifier: Arc<N>,
    history: Arc<H>,
    now_provider: NowProvider,
    engine: LocalTimerEngine,
    active: Option<ActiveSession>,
    bound_task_id: Option<String>,
    next_lineage: u64,
}

impl<S, N, H> SessionController<S, N, H>
where
    S: SnapshotStore,
    N: CompletionNotifier,
    H: SessionHistoryRepository,
{
    pub fn new(snapshot_store: Arc<S>, notifier: Arc<N>, history: Arc<H>) -> Self {
        Self {
            snapshot_store,
            notifier,
            history,
            now_provider: Arc::new(Utc::now),
            engine: LocalTimerEngine::default(),
            active: None,
            bound_task_id: None,
            next_lineage: 0,
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn bound_task_id(&self) -> Option<&str> {
        self.bound_task_id.as_deref()
    }

    pub fn start(&mut self, task_id: &str, duration_seconds: u64) -> Result<Transition, InfraError> {
        let task_id = normalize_task_id(task_id)?;
        validate_duration(duration_seconds, "duration_seconds").map_err(InfraError::InvalidInput)?;
        let settled = self.settle_elapsed()?;
        self.ensure_no_live_session()?;

        let session = FocusSession::running(task_id.clone(), duration_seconds, self.now());
        self.install(session);
        let persistence_error = self.persist();
        let remote = self
            .pending(RemoteRequest::Start {
                task_id,
                duration_seconds,
            })
            .into_iter()
            .collect();

        Ok(merge_settled(
            settled,
            Transition {
                session: self.active_view()?,
                remote,
                persistence_error,
            },
        ))
    }

    /// Rebuilds the task's session from memory or from its snapshot without
    /// touching the network.
    pub fn resume_local(&mut self, task_id: &str) -> Result<LocalResume, InfraError> {
        let task_id = normalize_task_id(task_id)?;
        if let Some(active) = self.active.as_ref() {
            if !active.session.status.is_terminal() && active.session.task_id == task_id {
                return self.reconciled_view().map(LocalResume::Resumed);
            }
        }
        let settled = self.settle_elapsed()?;
        self.ensure_no_live_session()?;

        self.bound_task_id = Some(task_id.clone());
        let snapshot = match self.snapshot_store.load(&task_id) {
            Ok(Some(snapshot)) => snapshot,
            missing => {
                let (remote, settled_error) = match settled {
                    Some(transition) => (transition.remote, transition.persistence_error),
                    None => (Vec::new(), None),
                };
                let load_error = missing.err().map(|error| {
                    tracing::warn!(task_id = %task_id, "failed to load focus snapshot: {error}");
                    error.to_string()
                });
                return Ok(LocalResume::Missing {
                    remote,
                    persistence_error: join_errors(settled_error, load_error),
                });
            }
        };

        let session = snapshot.into_session(self.now());
        self.install(session);
        let transition = self.reconciled_view()?;
        Ok(LocalResume::Resumed(merge_settled(settled, transition)))
    }

    pub fn adopt_remote(
        &mut self,
        task_id: &str,
        remote: &ActiveRemoteSession,
    ) -> Result<Option<Transition>, InfraError> {
        let task_id = normalize_task_id(task_id)?;
        let status = match remote.status {
            RemoteSessionStatus::Running => SessionStatus::Running,
            RemoteSessionStatus::Paused => SessionStatus::Paused,
            RemoteSessionStatus::Completed | RemoteSessionStatus::Quit => return Ok(None),
        };
        let session_id = remote.id.trim();
        if session_id.is_empty() {
            return Ok(None);
        }
        let settled = self.settle_elapsed()?;
        self.ensure_no_live_session()?;

        let now = self.now();
        let remaining = remote.current_remaining_time.min(MAX_SESSION_SECONDS);
        let total = remote
            .total_duration
            .min(MAX_SESSION_SECONDS)
            .max(remaining)
            .max(1);
        let finished_remotely = status == SessionStatus::Running
            && remote.finishes_at.is_some_and(|finishes_at| finishes_at <= now);
        let deadline = match status {
            SessionStatus::Running if finished_remotely => Some(now),
            SessionStatus::Running => Some(now + seconds(remaining)),
            _ => None,
        };

        let session = FocusSession {
            id: Some(session_id.to_string()),
            task_id,
            status,
            total_duration_seconds: total,
            deadline,
            remaining_seconds: remaining,
            started_at: now - seconds(total - remaining),
        };
        session.validate().map_err(InfraError::Remote)?;
        self.install(session);
        if self.is_elapsed() {
            let transition = self.complete_internal()?;
            return Ok(Some(merge_settled(settled, transition)));
        }

        let persistence_error = self.persist();
        Ok(Some(merge_settled(
            settled,
            Transition {
                session: self.active_view()?,
                remote: Vec::new(),
                persistence_error,
            },
        )))
    }

    pub fn pause(&mut self) -> Result<Transition, InfraError> {
        if self.is_elapsed() {
            return self.complete_internal();
        }
        let now = self.now();
        let active = self.session_in(SessionStatus::Running, "pause")?;
        active.session.remaining_seconds = active.session.remaining_at(now);
        active.session.status = SessionStatus::Paused;
        active.session.deadline = None;
        active.revision = active.revision.saturating_add(1);
        self.engine.stop();

        let persistence_error = self.persist();
        let remote = self.session_request(|session_id| RemoteRequest::Pause { session_id });
        Ok(Transition {
            session: self.active_view()?,
            remote,
            persistence_error,
        })
    }

    pub fn resume(&mut self) -> Result<Transition, InfraError> {
        if self.is_elapsed() {
            return self.complete_internal();
        }
        let now = self.now();
        let active = self.session_in(SessionStatus::Paused, "resume")?;
        let deadline = now + seconds(active.session.remaining_seconds);
        active.session.status = SessionStatus::Running;
        active.session.deadline = Some(deadline);
        active.revision = active.revision.saturating_add(1);
        self.engine.start(deadline);

        let persistence_error = self.persist();
        let remote = self.session_request(|session_id| RemoteRequest::Resume { session_id });
        Ok(Transition {
            session: self.active_view()?,
            remote,
            persistence_error,
        })
    }

    pub fn add_time(&mut self, delta_seconds: u64) -> Result<Transition, InfraError> {
        validate_duration(delta_seconds, "delta_seconds").map_err(InfraError::InvalidInput)?;
        if self.is_elapsed() {
            return self.complete_internal();
        }
        let active = self.live_session("add time")?;
        let total = active
            .session
            .total_duration_seconds
            .saturating_add(delta_seconds);
        if total > MAX_SESSION_SECONDS {
            return Err(InfraError::InvalidInput(format!(
                "total_duration_seconds must be <= {MAX_SESSION_SECONDS}"
            )));
        }

        let mut extended_deadline = None;
        match (active.session.status, active.session.deadline) {
            (SessionStatus::Running, Some(deadline)) => {
                let deadline = deadline + seconds(delta_seconds);
                active.session.deadline = Some(deadline);
                extended_deadline = Some(deadline);
            }
            _ => {
                active.session.remaining_seconds =
                    active.session.remaining_seconds.saturating_add(delta_seconds);
            }
        }
        active.session.total_duration_seconds = total;
        active.revision = active.revision.saturating_add(1);
        if let Some(deadline) = extended_deadline {
            self.engine.start(deadline);
        }

        let persistence_error = self.persist();
        let remote = self.session_request(|session_id| RemoteRequest::AddTime {
            session_id,
            seconds: delta_seconds,
        });
        Ok(Transition {
            session: self.active_view()?,
            remote,
            persistence_error,
        })
    }

    /// Ends the session locally no matter what the backend says.
    pub fn quit(&mut self) -> Result<Transition, InfraError> {
        if self.is_elapsed() {
            return self.complete_internal();
        }
        let now = self.now();
        let Some(active) = self.active.as_mut() else {
            return Err(InfraError::InvalidState(
                "no focus session to quit".to_string(),
            ));
        };

        if active.session.status.is_terminal() {
            let task_id = active.session.task_id.clone();
            let persistence_error = self.clear_snapshot(&task_id);
            return Ok(Transition {
                session: self.active_view()?,
                remote: Vec::new(),
                persistence_error,
            });
        }

        active.session.remaining_seconds = active.session.remaining_at(now);
        active.session.status = SessionStatus::Quit;
        active.session.deadline = None;
        active.revision = active.revision.saturating_add(1);
        let session = active.session.clone();
        self.engine.stop();

        let mut persistence_error = self.clear_snapshot(&session.task_id);
        if let Some(error) = self.record_history(&session, now) {
            persistence_error = persistence_error.or(Some(error));
        }
        let remote = self.session_request(|session_id| RemoteRequest::Quit { session_id });
        tracing::info!(task_id = %session.task_id, "focus session quit");
        Ok(Transition {
            session,
            remote,
            persistence_error,
        })
    }

    /// Idempotent: a session completes, and notifies, at most once.
    pub fn complete(&mut self) -> Result<Transition, InfraError> {
        self.complete_internal()
    }

    pub fn tick(&mut self) -> Result<Tick, InfraError> {
        let now = self.now();
        match self.engine.evaluate(now) {
            TickOutcome::Running { remaining_seconds } => {
                let Some(active) = self.active.as_mut() else {
                    return Ok(Tick {
                        update: TickUpdate::Idle,
                        transition: None,
                    });
                };
                active.session.remaining_seconds = remaining_seconds;
                Ok(Tick {
                    update: TickUpdate::Running {
                        task_id: active.session.task_id.clone(),
                        remaining_seconds,
                    },
                    transition: None,
                })
            }
            TickOutcome::Elapsed => {
                let transition = self.complete_internal()?;
                Ok(Tick {
                    update: TickUpdate::Completed {
                        task_id: transition.session.task_id.clone(),
                    },
                    transition: Some(transition),
                })
            }
            TickOutcome::Idle => Ok(Tick {
                update: TickUpdate::Idle,
                transition: None,
            }),
        }
    }

    /// Reconciled read: an elapsed session is completed before it is returned.
    pub fn current(&mut self) -> Result<Option<Transition>, InfraError> {
        if self.active.is_none() {
            return Ok(None);
        }
        self.reconciled_view().map(Some)
    }

    pub fn on_background(&mut self) -> Result<Option<Transition>, InfraError> {
        if !self.has_live_session() {
            return Ok(None);
        }
        if self.is_elapsed() {
            return self.complete_internal().map(Some);
        }
        let persistence_error = self.persist();
        Ok(Some(Transition {
            session: self.active_view()?,
            remote: Vec::new(),
            persistence_error,
        }))
    }

    pub fn on_foreground(&mut self) -> Result<Option<Transition>, InfraError> {
        if self.has_live_session() {
            return self.reconciled_view().map(Some);
        }
        if self.active.is_some() {
            return Ok(None);
        }
        // relaunched process: rebuild from the bound or most recent snapshot
        let Some(task_id) = self
            .bound_task_id
            .clone()
            .or_else(|| self.last_persisted_task())
        else {
            return Ok(None);
        };
        match self.resume_local(&task_id)? {
            LocalResume::Resumed(transition) => Ok(Some(transition)),
            LocalResume::Missing { .. } => Ok(None),
        }
    }

    pub fn apply_remote(
        &mut self,
        ticket: RemoteTicket,
        reply: RemoteReply,
    ) -> Result<Reconciliation, InfraError> {
        let live_status = self
            .active
            .as_ref()
            .filter(|active| active.lineage == ticket.lineage)
            .map(|active| active.session.status);

        match reply {
            RemoteReply::Acknowledged => Ok(Reconciliation::Ignored),
            RemoteReply::Started(started) => match live_status {
                Some(status) if !status.is_terminal() => self.attach_started(ticket, started),
                Some(SessionStatus::Completed) => Ok(Reconciliation::Stale {
                    follow_ups: vec![PendingRemote {
                        ticket,
                        request: RemoteRequest::Complete {
                            session_id: started.id,
                        },
                    }],
                }),
                _ => Ok(Reconciliation::Stale {
                    follow_ups: vec![PendingRemote {
                        ticket,
                        request: RemoteRequest::Quit {
                            session_id: started.id,
                        },
                    }],
                }),
            },
            RemoteReply::Remaining(update) => match live_status {
                Some(status) if !status.is_terminal() => self.apply_remaining(ticket, update),
                _ => Ok(Reconciliation::Ignored),
            },
        }
    }

    fn attach_started(
        &mut self,
        ticket: RemoteTicket,
        started: StartedRemoteSession,
    ) -> Result<Reconciliation, InfraError> {
        let now = self.now();
        let Some(active) = self.active.as_mut() else {
            return Ok(Reconciliation::Ignored);
        };
        active.session.id = Some(started.id.clone());

        let mut follow_ups = Vec::new();
        if ticket.revision == active.revision {
            let remote_total = started.total_duration.min(MAX_SESSION_SECONDS);
            if remote_total > 0 {
                active.session.total_duration_seconds = remote_total;
            }
            if let Some(deadline) = drifted_deadline(&active.session, started.remaining_time, now) {
                active.session.deadline = Some(deadline);
                self.engine.start(deadline);
            }
        } else {
            // Local edits made before the id existed never reached the backend.
            let current = RemoteTicket {
                lineage: active.lineage,
                revision: active.revision,
            };
            if active.session.status == SessionStatus::Paused {
                follow_ups.push(PendingRemote {
                    ticket: current,
                    request: RemoteRequest::Pause {
                        session_id: started.id.clone(),
                    },
                });
            }
            let missing = active
                .session
                .total_duration_seconds
                .saturating_sub(started.total_duration);
            if missing > 0 {
                follow_ups.push(PendingRemote {
                    ticket: current,
                    request: RemoteRequest::AddTime {
                        session_id: started.id,
                        seconds: missing,
                    },
                });
            }
        }

        self.finish_reconciliation(follow_ups)
    }

    fn apply_remaining(
        &mut self,
        ticket: RemoteTicket,
        update: RemainingUpdate,
    ) -> Result<Reconciliation, InfraError> {
        let now = self.now();
        let Some(active) = self.active.as_mut() else {
            return Ok(Reconciliation::Ignored);
        };
        if ticket.revision != active.revision {
            tracing::debug!(
                task_id = %active.session.task_id,
                "discarding remote reply superseded by a newer local change"
            );
            return Ok(Reconciliation::Ignored);
        }

        let remote_remaining = update.current_remaining_time.min(MAX_SESSION_SECONDS);
        match active.session.status {
            SessionStatus::Running => {
                if let Some(deadline) = drifted_deadline(&active.session, remote_remaining, now) {
                    active.session.deadline = Some(deadline);
                    self.engine.start(deadline);
                }
            }
            SessionStatus::Paused => {
                if active.session.remaining_seconds.abs_diff(remote_remaining)
                    > REMOTE_DRIFT_TOLERANCE_SECONDS
                {
                    active.session.remaining_seconds = remote_remaining;
                }
            }
            SessionStatus::Completed | SessionStatus::Quit => {}
        }
        if let Some(total) = update.total_duration.filter(|total| *total > 0) {
            active.session.total_duration_seconds = total.min(MAX_SESSION_SECONDS);
        }

        self.finish_reconciliation(Vec::new())
    }

    fn finish_reconciliation(
        &mut self,
        mut follow_ups: Vec<PendingRemote>,
    ) -> Result<Reconciliation, InfraError> {
        if self.is_elapsed() {
            let transition = self.complete_internal()?;
            follow_ups.extend(transition.remote);
            return Ok(Reconciliation::Applied {
                session: transition.session,
                follow_ups,
                persistence_error: transition.persistence_error,
            });
        }
        let persistence_error = self.persist();
        Ok(Reconciliation::Applied {
            session: self.active_view()?,
            follow_ups,
            persistence_error,
        })
    }

    fn complete_internal(&mut self) -> Result<Transition, InfraError> {
        let now = self.now();
        let Some(active) = self.active.as_mut() else {
            return Err(InfraError::InvalidState(
                "no focus session to complete".to_string(),
            ));
        };
        if active.completion_fired || active.session.status.is_terminal() {
            return Ok(Transition {
                session: self.active_view()?,
                remote: Vec::new(),
                persistence_error: None,
            });
        }

        active.completion_fired = true;
        active.session.remaining_seconds = active.session.remaining_at(now);
        active.session.status = SessionStatus::Completed;
        active.session.deadline = None;
        active.revision = active.revision.saturating_add(1);
        let session = active.session.clone();
        self.engine.stop();

        let mut persistence_error = self.clear_snapshot(&session.task_id);
        self.notifier.on_complete(&session.task_id);
        if let Some(error) = self.record_history(&session, now) {
            persistence_error = persistence_error.or(Some(error));
        }
        let remote = self.session_request(|session_id| RemoteRequest::Complete { session_id });
        tracing::info!(task_id = %session.task_id, "focus session completed");
        Ok(Transition {
            session,
            remote,
            persistence_error,
        })
    }

    /// Completes a running session whose deadline passed without being
    /// observed, so it cannot block the next operation.
    fn settle_elapsed(&mut self) -> Result<Option<Transition>, InfraError> {
        if !self.is_elapsed() {
            return Ok(None);
        }
        self.complete_internal().map(Some)
    }

    fn last_persisted_task(&self) -> Option<String> {
        match self.snapshot_store.latest() {
            Ok(snapshot) => snapshot.map(|snapshot| snapshot.task_id),
            Err(error) => {
                tracing::warn!("failed to load latest focus snapshot: {error}");
                None
            }
        }
    }

    fn reconciled_view(&mut self) -> Result<Transition, InfraError> {
        if self.is_elapsed() {
            return self.complete_internal();
        }
        Ok(Transition {
            session: self.active_view()?,
            remote: Vec::new(),
            persistence_error: None,
        })
    }

    fn is_elapsed(&self) -> bool {
        self.active.as_ref().is_some_and(|active| {
            !active.completion_fired
                && !active.session.status.is_terminal()
                && active.session.remaining_at(self.now()) == 0
        })
    }

    fn install(&mut self, session: FocusSession) {
        self.next_lineage = self.next_lineage.saturating_add(1);
        match (session.status, session.deadline) {
            (SessionStatus::Running, Some(deadline)) => self.engine.start(deadline),
            _ => self.engine.stop(),
        }
        self.bound_task_id = Some(session.task_id.clone());
        self.active = Some(ActiveSession {
            session,
            lineage: self.next_lineage,
            revision: 0,
            completion_fired: false,
        });
    }

    fn has_live_session(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.session.status.is_terminal())
    }

    fn ensure_no_live_session(&self) -> Result<(), InfraError> {
        match self.active.as_ref() {
            Some(active) if !active.session.status.is_terminal() => {
                Err(InfraError::InvalidState(format!(
                    "focus session already active for task {}",
                    active.session.task_id
                )))
            }
            _ => Ok(()),
        }
    }

    fn session_in(
        &mut self,
        expected: SessionStatus,
        action: &str,
    ) -> Result<&mut ActiveSession, InfraError> {
        match self.active.as_mut() {
            Some(active) if active.session.status == expected => Ok(active),
            Some(active) => Err(InfraError::InvalidState(format!(
                "cannot {action} a {} focus session",
                active.session.status.as_str()
            ))),
            None => Err(InfraError::InvalidState(format!(
                "no focus session to {action}"
            ))),
        }
    }

    fn live_session(&mut self, action: &str) -> Result<&mut ActiveSession, InfraError> {
        match self.active.as_mut() {
            Some(active) if !active.session.status.is_terminal() => Ok(active),
            Some(active) => Err(InfraError::InvalidState(format!(
                "cannot {action} a {} focus session",
                active.session.status.as_str()
            ))),
            None => Err(InfraError::InvalidState(format!(
                "no focus session to {action}"
            ))),
        }
    }

    fn active_view(&self) -> Result<FocusSession, InfraError> {
        let active = self
            .active
            .as_ref()
            .ok_or_else(|| InfraError::InvalidState("no focus session".to_string()))?;
        let mut session = active.session.clone();
        session.remaining_seconds = session.remaining_at(self.now());
        Ok(session)
    }

    fn pending(&self, request: RemoteRequest) -> Option<PendingRemote> {
        let active = self.active.as_ref()?;
        Some(PendingRemote {
            ticket: RemoteTicket {
                lineage: active.lineage,
                revision: active.revision,
            },
            request,
        })
    }

    /// Local-only sessions have nothing to tell the backend.
    fn session_request<F>(&self, build: F) -> Vec<PendingRemote>
    where
        F: FnOnce(String) -> RemoteRequest,
    {
        self.active
            .as_ref()
            .and_then(|active| active.session.id.clone())
            .and_then(|session_id| self.pending(build(session_id)))
            .into_iter()
            .collect()
    }

    fn persist(&self) -> Option<String> {
        let active = self.active.as_ref()?;
        let snapshot = active.session.to_snapshot(self.now())?;
        match self.snapshot_store.save(&active.session.task_id, &snapshot) {
            Ok(()) => None,
            Err(error) => {
                tracing::warn!(
                    task_id = %active.session.task_id,
                    "failed to persist focus snapshot: {error}"
                );
                Some(error.to_string())
            }
        }
    }

    fn clear_snapshot(&self, task_id: &str) -> Option<String> {
        match self.snapshot_store.clear(task_id) {
            Ok(()) => None,
            Err(error) => {
                tracing::warn!(task_id, "failed to clear focus snapshot: {error}");
                Some(error.to_string())
            }
        }
    }

    fn record_history(&self, session: &FocusSession, ended_at: DateTime<Utc>) -> Option<String> {
        let entry = FocusLogEntry::from_session(session, ended_at)?;
        match self.history.append(&entry) {
            Ok(()) => None,
            Err(error) => {
                tracing::warn!(task_id = %session.task_id, "failed to record focus history: {error}");
                Some(error.to_string())
            }
        }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }
}

fn drifted_deadline(
    session: &FocusSession,
    remote_remaining: u64,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if session.status != SessionStatus::Running {
        return None;
    }
    let local_remaining = session.remaining_at(now);
    if local_remaining.abs_diff(remote_remaining) <= REMOTE_DRIFT_TOLERANCE_SECONDS {
        return None;
    }
    Some(now + seconds(remote_remaining))
}

/// Puts the calls and storage errors of a settled session ahead of the
/// transition that displaced it.
fn merge_settled(settled: Option<Transition>, mut transition: Transition) -> Transition {
    let Some(settled) = settled else {
        return transition;
    };
    let mut remote = settled.remote;
    remote.append(&mut transition.remote);
    transition.remote = remote;
    transition.persistence_error =
        join_errors(settled.persistence_error, transition.persistence_error);
    transition
}

pub(crate) fn join_errors(first: Option<String>, second: Option<String>) -> Option<String> {
    match (first, second) {
        (Some(first), Some(second)) => Some(format!("{first}; {second}")),
        (first, second) => first.or(second),
    }
}

fn normalize_task_id(task_id: &str) -> Result<String, InfraError> {
    let normalized = task_id.trim();
    if normalized.is_empty() {
        return Err(InfraError::InvalidInput(
            "task_id must not be empty".to_string(),
        ));
    }
    Ok(normalized.to_string())
}
