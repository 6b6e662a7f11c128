use crate::application::completion::CompletionNotifier;
use crate::application::lifecycle::LifecycleObserver;
use crate::application::session_controller::{
    join_errors, LocalResume, PendingRemote, Reconciliation, RemoteReply, RemoteRequest,
    SessionController, Transition,
};
use crate::application::timer_engine::{spawn_ticker, TickSignal, TickTarget, TickUpdate};
use crate::domain::models::{validate_duration, FocusSession, SessionStatus};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::session_gateway::{ActiveRemoteSession, RemoteSessionGateway};
use crate::infrastructure::session_history::SessionHistoryRepository;
use crate::infrastructure::snapshot_store::SnapshotStore;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration as TokioDuration};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 200,
        }
    }
}

/// Result of a user-visible timer operation. The session is always the local
/// truth; remote and storage problems are reported next to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerOutcome {
    pub session: FocusSession,
    pub remote_error: Option<String>,
    pub persistence_error: Option<String>,
}

pub struct FocusTimerService<G, S, N, H>
where
    G: RemoteSessionGateway,
    S: SnapshotStore,
    N: CompletionNotifier,
    H: SessionHistoryRepository,
{
    gateway: Arc<G>,
    controller: Mutex<SessionController<S, N, H>>,
    lookup_policy: RetryPolicy,
    tick_signal: Arc<TickSignal>,
}

impl<G, S, N, H> FocusTimerService<G, S, N, H>
where
    G: RemoteSessionGateway,
    S: SnapshotStore,
    N: CompletionNotifier,
    H: SessionHistoryRepository,
{
    pub fn new(gateway: Arc<G>, controller: SessionController<S, N, H>) -> Self {
        Self {
            gateway,
            controller: Mutex::new(controller),
            lookup_policy: RetryPolicy::default(),
            tick_signal: Arc::new(TickSignal::default()),
        }
    }

    pub fn with_lookup_policy(mut self, lookup_policy: RetryPolicy) -> Self {
        self.lookup_policy = lookup_policy;
        self
    }

    pub async fn start(&self, task_id: &str, duration_seconds: u64) -> Result<TimerOutcome, InfraError> {
        let transition = self.with_controller(|controller| controller.start(task_id, duration_seconds))?;
        Ok(self.finish(transition).await)
    }

    /// Local memory, then the snapshot, then the backend, then a fresh start.
    pub async fn resume_active_or_start(
        &self,
        task_id: &str,
        duration_seconds: u64,
    ) -> Result<TimerOutcome, InfraError> {
        validate_duration(duration_seconds, "duration_seconds").map_err(InfraError::InvalidInput)?;
        let (mut owed, storage_error) =
            match self.with_controller(|controller| controller.resume_local(task_id))? {
                LocalResume::Resumed(transition) => return Ok(self.finish(transition).await),
                LocalResume::Missing {
                    remote,
                    persistence_error,
                } => (remote, persistence_error),
            };

        let (adopted, lookup_error) = match self.lookup_active_with_retry(task_id).await {
            Ok(Some(remote)) => (
                self.with_controller(|controller| controller.adopt_remote(task_id, &remote))?,
                None,
            ),
            Ok(None) => (None, None),
            Err(error) => {
                tracing::warn!(task_id, "active focus session lookup failed: {error}");
                (None, Some(error.to_string()))
            }
        };

        let mut transition = match adopted {
            Some(transition) => transition,
            None => self.with_controller(|controller| controller.start(task_id, duration_seconds))?,
        };
        owed.append(&mut transition.remote);
        transition.remote = owed;
        let mut outcome = self.finish(transition).await;
        outcome.remote_error = join_errors(lookup_error, outcome.remote_error);
        outcome.persistence_error = join_errors(storage_error, outcome.persistence_error);
        Ok(outcome)
    }

    pub async fn pause(&self) -> Result<TimerOutcome, InfraError> {
        let transition = self.with_controller(|controller| controller.pause())?;
        Ok(self.finish(transition).await)
    }

    pub async fn resume(&self) -> Result<TimerOutcome, InfraError> {
        let transition = self.with_controller(|controller| controller.resume())?;
        Ok(self.finish(transition).await)
    }

    pub async fn add_time(&self, delta_seconds: u64) -> Result<TimerOutcome, InfraError> {
        let transition = self.with_controller(|controller| controller.add_time(delta_seconds))?;
        Ok(self.finish(transition).await)
    }

    pub async fn quit(&self) -> Result<TimerOutcome, InfraError> {
        let transition = self.with_controller(|controller| controller.quit())?;
        Ok(self.finish(transition).await)
    }

    pub async fn complete(&self) -> Result<TimerOutcome, InfraError> {
        let transition = self.with_controller(|controller| controller.complete())?;
        Ok(self.finish(transition).await)
    }

    pub async fn current(&self) -> Result<Option<TimerOutcome>, InfraError> {
        match self.with_controller(|controller| controller.current())? {
            Some(transition) => Ok(Some(self.finish(transition).await)),
            None => Ok(None),
        }
    }

    fn with_controller<T, F>(&self, operation: F) -> Result<T, InfraError>
    where
        F: FnOnce(&mut SessionController<S, N, H>) -> Result<T, InfraError>,
    {
        let mut controller = self.controller.lock().map_err(|error| {
            InfraError::InvalidState(format!("focus controller lock poisoned: {error}"))
        })?;
        operation(&mut controller)
    }

    async fn finish(&self, transition: Transition) -> TimerOutcome {
        let Transition {
            session,
            remote,
            persistence_error,
        } = transition;
        let mut outcome = TimerOutcome {
            session,
            remote_error: None,
            persistence_error,
        };
        if outcome.session.status == SessionStatus::Running {
            self.tick_signal.arm();
        }
        self.dispatch(remote, &mut outcome).await;
        outcome
    }

    /// Runs queued gateway calls one by one with the controller unlocked and
    /// feeds each reply back under the lock.
    async fn dispatch(&self, pending: Vec<PendingRemote>, outcome: &mut TimerOutcome) {
        let mut queue = VecDeque::from(pending);
        let mut errors = Vec::new();

        while let Some(PendingRemote { ticket, request }) = queue.pop_front() {
            let reply = match self.call_gateway(&request).await {
                Ok(reply) => reply,
                Err(error) => {
                    tracing::warn!(
                        action = request.action(),
                        "focus session remote call failed: {error}"
                    );
                    errors.push(error.to_string());
                    continue;
                }
            };

            match self.with_controller(|controller| controller.apply_remote(ticket, reply)) {
                Ok(Reconciliation::Applied {
                    session,
                    follow_ups,
                    persistence_error,
                }) => {
                    outcome.session = session;
                    outcome.persistence_error =
                        join_errors(outcome.persistence_error.take(), persistence_error);
                    queue.extend(follow_ups);
                }
                Ok(Reconciliation::Stale { follow_ups }) => queue.extend(follow_ups),
                Ok(Reconciliation::Ignored) => {}
                Err(error) => {
                    tracing::warn!(
                        action = request.action(),
                        "failed to reconcile remote reply: {error}"
                    );
                    errors.push(error.to_string());
                }
            }
        }

        if !errors.is_empty() {
            outcome.remote_error = Some(errors.join("; "));
        }
    }

    async fn call_gateway(&self, request: &RemoteRequest) -> Result<RemoteReply, InfraError> {
        match request {
            RemoteRequest::Start {
                task_id,
                duration_seconds,
            } => self
                .gateway
                .start_session(task_id, *duration_seconds)
                .await
                .map(RemoteReply::Started),
            RemoteRequest::Pause { session_id } => self
                .gateway
                .pause_session(session_id)
                .await
                .map(|_| RemoteReply::Acknowledged),
            RemoteRequest::Resume { session_id } => self
                .gateway
                .resume_session(session_id)
                .await
                .map(RemoteReply::Remaining),
            RemoteRequest::AddTime {
                session_id,
                seconds,
            } => self
                .gateway
                .add_time(session_id, *seconds)
                .await
                .map(RemoteReply::Remaining),
            RemoteRequest::Complete { session_id } => self
                .gateway
                .complete_session(session_id)
                .await
                .map(|_| RemoteReply::Acknowledged),
            RemoteRequest::Quit { session_id } => self
                .gateway
                .quit_session(session_id)
                .await
                .map(|_| RemoteReply::Acknowledged),
        }
    }

    async fn lookup_active_with_retry(
        &self,
        task_id: &str,
    ) -> Result<Option<ActiveRemoteSession>, InfraError> {
        let max_attempts = self.lookup_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match self.gateway.get_active_session(task_id).await {
                Ok(found) => return Ok(found),
                Err(error) if should_retry(&error) && attempt + 1 < max_attempts => {
                    let delay = self
                        .lookup_policy
                        .base_delay_ms
                        .saturating_mul(2u64.saturating_pow(attempt as u32));
                    sleep(TokioDuration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }
}

impl<G, S, N, H> FocusTimerService<G, S, N, H>
where
    G: RemoteSessionGateway + 'static,
    S: SnapshotStore + 'static,
    N: CompletionNotifier + 'static,
    H: SessionHistoryRepository + 'static,
{
    /// Starts the tick driver for this service. It parks while no session is
    /// running and wakes whenever a transition leaves one running.
    pub fn spawn_ticker<F>(self: &Arc<Self>, period: TokioDuration, on_tick: F) -> JoinHandle<()>
    where
        F: Fn(&TickUpdate) + Send + Sync + 'static,
    {
        spawn_ticker(Arc::clone(self), Arc::clone(&self.tick_signal), period, on_tick)
    }
}

#[async_trait]
impl<G, S, N, H> TickTarget for FocusTimerService<G, S, N, H>
where
    G: RemoteSessionGateway + 'static,
    S: SnapshotStore + 'static,
    N: CompletionNotifier + 'static,
    H: SessionHistoryRepository + 'static,
{
    async fn tick(&self) -> Result<TickUpdate, InfraError> {
        let tick = self.with_controller(|controller| controller.tick())?;
        if let Some(transition) = tick.transition {
            self.finish(transition).await;
        }
        Ok(tick.update)
    }
}

#[async_trait]
impl<G, S, N, H> LifecycleObserver for FocusTimerService<G, S, N, H>
where
    G: RemoteSessionGateway + 'static,
    S: SnapshotStore + 'static,
    N: CompletionNotifier + 'static,
    H: SessionHistoryRepository + 'static,
{
    async fn on_foreground(&self) -> Result<Option<TimerOutcome>, InfraError> {
        match self.with_controller(|controller| controller.on_foreground())? {
            Some(transition) => Ok(Some(self.finish(transition).await)),
            None => Ok(None),
        }
    }

    async fn on_background(&self) -> Result<Option<TimerOutcome>, InfraError> {
        match self.with_controller(|controller| controller.on_background())? {
            Some(transition) => Ok(Some(self.finish(transition).await)),
            None => Ok(None),
        }
    }
}

fn should_retry(error: &InfraError) -> bool {
    match error {
        InfraError::Remote(message) => {
            let message = message.to_ascii_lowercase();
            message.contains("network error")
                || message.contains("timeout")
                || message.contains("timed out")
                || message.contains("temporarily unavailable")
                || message.contains("connection reset")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::SessionStatus;
    use crate::infrastructure::session_gateway::{
        RemainingUpdate, RemoteSessionStatus, StartedRemoteSession,
    };
    use crate::infrastructure::session_history::InMemorySessionHistoryRepository;
    use crate::infrastructure::snapshot_store::InMemorySnapshotStore;
    use crate::application::session_controller::NowProvider;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    #[derive(Clone)]
    struct FakeClock(Arc<Mutex<DateTime<Utc>>>);

    impl FakeClock {
        fn new() -> Self {
            Self(Arc::new(Mutex::new(fixed_time("2026-02-16T09:00:00Z"))))
        }

        fn advance(&self, secs: i64) {
            let mut now = self.0.lock().expect("clock lock poisoned");
            *now += chrono::Duration::seconds(secs);
        }

        fn provider(&self) -> NowProvider {
            let clock = Arc::clone(&self.0);
            Arc::new(move || *clock.lock().expect("clock lock poisoned"))
        }
    }

    #[derive(Default)]
    struct CountingNotifier {
        count: AtomicUsize,
    }

    impl CompletionNotifier for CountingNotifier {
        fn on_complete(&self, _task_id: &str) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeGateway {
        started: Mutex<VecDeque<Result<StartedRemoteSession, InfraError>>>,
        active: Mutex<VecDeque<Result<Option<ActiveRemoteSession>, InfraError>>>,
        remaining: Mutex<VecDeque<RemainingUpdate>>,
        offline: AtomicBool,
        hold_start: AtomicBool,
        start_entered: Notify,
        start_release: Notify,
        lookup_calls: AtomicUsize,
        calls: Mutex<Vec<String>>,
    }

    impl FakeGateway {
        fn record(&self, call: String) {
            self.calls.lock().expect("calls lock poisoned").push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls lock poisoned").clone()
        }

        fn network_check(&self, action: &str) -> Result<(), InfraError> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(InfraError::Remote(format!(
                    "network error while {action}: connection refused"
                )));
            }
            Ok(())
        }

        fn next_remaining(&self, action: &str) -> Result<RemainingUpdate, InfraError> {
            self.remaining
                .lock()
                .expect("remaining lock poisoned")
                .pop_front()
                .ok_or_else(|| InfraError::Remote(format!("no scripted reply for {action}")))
        }
    }

    #[async_trait]
    impl RemoteSessionGateway for FakeGateway {
        async fn start_session(
            &self,
            task_id: &str,
            duration_seconds: u64,
        ) -> Result<StartedRemoteSession, InfraError> {
            self.record(format!("start:{task_id}"));
            self.start_entered.notify_one();
            if self.hold_start.load(Ordering::SeqCst) {
                self.start_release.notified().await;
            }
            self.network_check("starting session")?;
            self.started
                .lock()
                .expect("started lock poisoned")
                .pop_front()
                .unwrap_or_else(|| {
                    Ok(StartedRemoteSession {
                        id: "ses-1".to_string(),
                        remaining_time: duration_seconds,
                        total_duration: duration_seconds,
                    })
                })
        }

        async fn get_active_session(
            &self,
            _task_id: &str,
        ) -> Result<Option<ActiveRemoteSession>, InfraError> {
            self.lookup_calls.fetch_add(1, Ordering::SeqCst);
            self.active
                .lock()
                .expect("active lock poisoned")
                .pop_front()
                .unwrap_or(Ok(None))
        }

        async fn pause_session(&self, session_id: &str) -> Result<(), InfraError> {
            self.record(format!("pause:{session_id}"));
            self.network_check("sending pause")
        }

        async fn resume_session(&self, session_id: &str) -> Result<RemainingUpdate, InfraError> {
            self.record(format!("resume:{session_id}"));
            self.network_check("sending resume")?;
            self.next_remaining("resume")
        }

        async fn add_time(
            &self,
            session_id: &str,
            seconds: u64,
        ) -> Result<RemainingUpdate, InfraError> {
            self.record(format!("add-time:{session_id}:{seconds}"));
            self.network_check("adding time")?;
            self.next_remaining("add-time")
        }

        async fn complete_session(&self, session_id: &str) -> Result<(), InfraError> {
            self.record(format!("complete:{session_id}"));
            self.network_check("sending complete")
        }

        async fn quit_session(&self, session_id: &str) -> Result<(), InfraError> {
            self.record(format!("quit:{session_id}"));
            self.network_check("sending quit")
        }
    }

    type TestService = FocusTimerService<
        FakeGateway,
        InMemorySnapshotStore,
        CountingNotifier,
        InMemorySessionHistoryRepository,
    >;

    struct Fixture {
        service: Arc<TestService>,
        gateway: Arc<FakeGateway>,
        store: Arc<InMemorySnapshotStore>,
        notifier: Arc<CountingNotifier>,
        clock: FakeClock,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = FakeClock::new();
            let gateway = Arc::new(FakeGateway::default());
            let store = Arc::new(InMemorySnapshotStore::default());
            let notifier = Arc::new(CountingNotifier::default());
            let service = Self::service_for(&gateway, &store, &notifier, clock.provider());
            Self {
                service,
                gateway,
                store,
                notifier,
                clock,
            }
        }

        fn service_for(
            gateway: &Arc<FakeGateway>,
            store: &Arc<InMemorySnapshotStore>,
            notifier: &Arc<CountingNotifier>,
            now_provider: NowProvider,
        ) -> Arc<TestService> {
            let controller = SessionController::new(
                Arc::clone(store),
                Arc::clone(notifier),
                Arc::new(InMemorySessionHistoryRepository::default()),
            )
            .with_now_provider(now_provider);
            Arc::new(
                FocusTimerService::new(Arc::clone(gateway), controller).with_lookup_policy(
                    RetryPolicy {
                        max_attempts: 2,
                        base_delay_ms: 1,
                    },
                ),
            )
        }

        fn relaunch(&mut self) {
            self.service =
                Self::service_for(&self.gateway, &self.store, &self.notifier, self.clock.provider());
        }

        fn completions(&self) -> usize {
            self.notifier.count.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn start_attaches_remote_session_id() {
        let fixture = Fixture::new();
        let outcome = fixture.service.start("tsk-1", 1500).await.expect("start");

        assert_eq!(outcome.session.id.as_deref(), Some("ses-1"));
        assert_eq!(outcome.session.status, SessionStatus::Running);
        assert_eq!(outcome.remote_error, None);
        assert_eq!(fixture.gateway.calls(), vec!["start:tsk-1".to_string()]);
        let snapshot = fixture.store.load("tsk-1").expect("load").expect("snapshot");
        assert_eq!(snapshot.session_id.as_deref(), Some("ses-1"));
    }

    #[tokio::test]
    async fn start_without_network_runs_local_only() {
        let fixture = Fixture::new();
        fixture.gateway.offline.store(true, Ordering::SeqCst);

        let outcome = fixture.service.start("tsk-1", 1500).await.expect("start");
        assert_eq!(outcome.session.status, SessionStatus::Running);
        assert!(outcome.session.is_local_only());
        assert!(outcome
            .remote_error
            .as_deref()
            .is_some_and(|message| message.contains("network error")));
        assert!(fixture.store.load("tsk-1").expect("load").is_some());
    }

    #[tokio::test]
    async fn failed_remote_pause_still_pauses_locally() {
        let fixture = Fixture::new();
        fixture.service.start("tsk-1", 1500).await.expect("start");
        fixture.clock.advance(100);
        fixture.gateway.offline.store(true, Ordering::SeqCst);

        let outcome = fixture.service.pause().await.expect("pause");
        assert_eq!(outcome.session.status, SessionStatus::Paused);
        assert_eq!(outcome.session.remaining_seconds, 1400);
        assert!(outcome.remote_error.is_some());

        fixture.clock.advance(600);
        let current = fixture
            .service
            .current()
            .await
            .expect("current")
            .expect("session");
        assert_eq!(current.session.remaining_seconds, 1400);
    }

    #[tokio::test]
    async fn quit_clears_snapshot_when_remote_fails() {
        let fixture = Fixture::new();
        fixture.service.start("tsk-1", 1500).await.expect("start");
        fixture.gateway.offline.store(true, Ordering::SeqCst);

        let outcome = fixture.service.quit().await.expect("quit");
        assert_eq!(outcome.session.status, SessionStatus::Quit);
        assert!(outcome.remote_error.is_some());
        assert!(fixture.store.load("tsk-1").expect("load").is_none());
        assert!(fixture
            .gateway
            .calls()
            .contains(&"quit:ses-1".to_string()));
    }

    #[tokio::test]
    async fn resume_prefers_remote_remaining_when_it_differs() {
        let fixture = Fixture::new();
        fixture.service.start("tsk-1", 1500).await.expect("start");
        fixture.service.pause().await.expect("pause");
        fixture.gateway.remaining.lock().expect("remaining lock").push_back(RemainingUpdate {
            current_remaining_time: 1000,
            total_duration: None,
        });

        let outcome = fixture.service.resume().await.expect("resume");
        assert_eq!(outcome.session.status, SessionStatus::Running);
        assert_eq!(outcome.session.remaining_seconds, 1000);
    }

    #[tokio::test]
    async fn add_time_adopts_remote_totals() {
        let fixture = Fixture::new();
        fixture.service.start("tsk-1", 600).await.expect("start");
        fixture.gateway.remaining.lock().expect("remaining lock").push_back(RemainingUpdate {
            current_remaining_time: 900,
            total_duration: Some(900),
        });

        let outcome = fixture.service.add_time(300).await.expect("add time");
        assert_eq!(outcome.session.total_duration_seconds, 900);
        assert_eq!(outcome.session.remaining_seconds, 900);
        assert!(fixture
            .gateway
            .calls()
            .contains(&"add-time:ses-1:300".to_string()));
    }

    #[tokio::test]
    async fn relaunch_resumes_snapshot_without_network() {
        let mut fixture = Fixture::new();
        fixture.service.start("tsk-1", 600).await.expect("start");
        fixture.service.on_background().await.expect("background");
        fixture.clock.advance(240);
        fixture.relaunch();

        let outcome = fixture
            .service
            .resume_active_or_start("tsk-1", 600)
            .await
            .expect("resume");
        assert_eq!(outcome.session.status, SessionStatus::Running);
        assert_eq!(outcome.session.remaining_seconds, 360);
        assert_eq!(fixture.gateway.lookup_calls.load(Ordering::SeqCst), 0);
        assert_eq!(fixture.gateway.calls(), vec!["start:tsk-1".to_string()]);
    }

    #[tokio::test]
    async fn resume_adopts_active_remote_session() {
        let fixture = Fixture::new();
        fixture
            .gateway
            .active
            .lock()
            .expect("active lock")
            .push_back(Ok(Some(ActiveRemoteSession {
                id: "ses-remote".to_string(),
                status: RemoteSessionStatus::Paused,
                current_remaining_time: 420,
                total_duration: 1500,
                finishes_at: None,
            })));

        let outcome = fixture
            .service
            .resume_active_or_start("tsk-1", 1500)
            .await
            .expect("resume");
        assert_eq!(outcome.session.id.as_deref(), Some("ses-remote"));
        assert_eq!(outcome.session.status, SessionStatus::Paused);
        assert_eq!(outcome.session.remaining_seconds, 420);
        assert!(fixture.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn resume_retries_lookup_then_starts_fresh() {
        let fixture = Fixture::new();
        {
            let mut active = fixture.gateway.active.lock().expect("active lock");
            active.push_back(Err(InfraError::Remote(
                "network error while loading active session: timeout".to_string(),
            )));
            active.push_back(Ok(None));
        }

        let outcome = fixture
            .service
            .resume_active_or_start("tsk-1", 1500)
            .await
            .expect("resume");
        assert_eq!(fixture.gateway.lookup_calls.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.session.id.as_deref(), Some("ses-1"));
        assert_eq!(outcome.remote_error, None);
    }

    #[tokio::test]
    async fn racing_tick_and_foreground_complete_once() {
        let fixture = Fixture::new();
        fixture.service.start("tsk-1", 60).await.expect("start");
        fixture.clock.advance(75);

        let (tick, foreground) =
            tokio::join!(fixture.service.tick(), fixture.service.on_foreground());
        tick.expect("tick");
        foreground.expect("foreground");

        assert_eq!(fixture.completions(), 1);
        let completes = fixture
            .gateway
            .calls()
            .into_iter()
            .filter(|call| call == "complete:ses-1")
            .count();
        assert_eq!(completes, 1);
        assert!(fixture.store.load("tsk-1").expect("load").is_none());
    }

    #[tokio::test]
    async fn background_past_deadline_completes_on_foreground() {
        let fixture = Fixture::new();
        fixture.service.start("tsk-1", 600).await.expect("start");
        fixture.service.on_background().await.expect("background");
        fixture.clock.advance(650);

        let outcome = fixture
            .service
            .on_foreground()
            .await
            .expect("foreground")
            .expect("session");
        assert_eq!(outcome.session.status, SessionStatus::Completed);
        assert_eq!(outcome.session.remaining_seconds, 0);
        assert_eq!(fixture.completions(), 1);
    }

    #[tokio::test]
    async fn late_start_reply_after_quit_closes_orphan_remote_session() {
        let fixture = Fixture::new();
        fixture.gateway.hold_start.store(true, Ordering::SeqCst);

        let service = Arc::clone(&fixture.service);
        let pending_start = tokio::spawn(async move { service.start("tsk-1", 1500).await });
        fixture.gateway.start_entered.notified().await;

        let quit = fixture.service.quit().await.expect("quit");
        assert_eq!(quit.session.status, SessionStatus::Quit);
        fixture.gateway.start_release.notify_one();
        pending_start
            .await
            .expect("start task")
            .expect("start outcome");

        assert_eq!(
            fixture.gateway.calls(),
            vec!["start:tsk-1".to_string(), "quit:ses-1".to_string()]
        );
        let current = fixture
            .service
            .current()
            .await
            .expect("current")
            .expect("session");
        assert_eq!(current.session.status, SessionStatus::Quit);
        assert!(fixture.store.load("tsk-1").expect("load").is_none());
    }

    #[tokio::test]
    async fn foreground_after_relaunch_completes_persisted_session() {
        let mut fixture = Fixture::new();
        fixture.service.start("tsk-1", 600).await.expect("start");
        fixture.clock.advance(650);
        fixture.relaunch();

        let outcome = fixture
            .service
            .on_foreground()
            .await
            .expect("foreground")
            .expect("session");
        assert_eq!(outcome.session.status, SessionStatus::Completed);
        assert_eq!(fixture.completions(), 1);
        assert!(fixture
            .gateway
            .calls()
            .contains(&"complete:ses-1".to_string()));
        assert!(fixture.store.load("tsk-1").expect("load").is_none());
    }

    #[tokio::test]
    async fn overdue_session_is_completed_before_next_task_starts() {
        let fixture = Fixture::new();
        fixture.service.start("tsk-1", 60).await.expect("start");
        fixture.clock.advance(90);

        let outcome = fixture
            .service
            .resume_active_or_start("tsk-2", 60)
            .await
            .expect("resume or start");
        assert_eq!(outcome.session.task_id, "tsk-2");
        assert_eq!(outcome.session.status, SessionStatus::Running);
        assert_eq!(fixture.completions(), 1);
        assert_eq!(
            fixture.gateway.calls(),
            vec![
                "start:tsk-1".to_string(),
                "complete:ses-1".to_string(),
                "start:tsk-2".to_string(),
            ]
        );
    }

    /// Wall clock that follows tokio's paused test clock.
    fn tokio_clock() -> NowProvider {
        let origin = tokio::time::Instant::now();
        let base = fixed_time("2026-02-16T09:00:00Z");
        Arc::new(move || {
            base + chrono::Duration::from_std(origin.elapsed()).expect("elapsed fits")
        })
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_completes_session_resumed_after_pause() {
        let gateway = Arc::new(FakeGateway::default());
        let store = Arc::new(InMemorySnapshotStore::default());
        let notifier = Arc::new(CountingNotifier::default());
        let service = Fixture::service_for(&gateway, &store, &notifier, tokio_clock());
        let ticker = service.spawn_ticker(TokioDuration::from_millis(100), |_| {});

        service.start("tsk-1", 2).await.expect("start");
        sleep(TokioDuration::from_millis(250)).await;
        service.pause().await.expect("pause");
        sleep(TokioDuration::from_secs(5)).await;
        assert_eq!(notifier.count.load(Ordering::SeqCst), 0);

        service.resume().await.expect("resume");
        sleep(TokioDuration::from_secs(3)).await;
        assert_eq!(notifier.count.load(Ordering::SeqCst), 1);
        let current = service.current().await.expect("current").expect("session");
        assert_eq!(current.session.status, SessionStatus::Completed);

        service.start("tsk-2", 1).await.expect("second start");
        sleep(TokioDuration::from_secs(2)).await;
        assert_eq!(notifier.count.load(Ordering::SeqCst), 2);
        assert!(!ticker.is_finished());
        assert_eq!(
            gateway
                .calls()
                .into_iter()
                .filter(|call| call.starts_with("complete:"))
                .count(),
            2
        );

        ticker.abort();
    }

    #[test]
    fn retry_only_on_transient_remote_errors() {
        assert!(should_retry(&InfraError::Remote(
            "network error while sending pause".to_string()
        )));
        assert!(!should_retry(&InfraError::Remote(
            "focus session api error: http 400".to_string()
        )));
        assert!(!should_retry(&InfraError::InvalidState("x".to_string())));
    }
}
