use crate::application::bootstrap::bootstrap_workspace;
use crate::application::completion::{BroadcastCompletionNotifier, CompletionEvent};
use crate::application::focus_service::{FocusTimerService, RetryPolicy, TimerOutcome};
use crate::application::lifecycle::{spawn_lifecycle_bridge, LifecycleEvent, LifecycleObserver};
use crate::application::reflection::reflection_summary;
use crate::application::session_controller::SessionController;
use crate::domain::models::SessionStatus;
use crate::application::timer_engine::TickUpdate;
use crate::infrastructure::config::{load_timer_config_with_lookup, TimerConfig};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::session_gateway::ReqwestSessionGateway;
use crate::infrastructure::session_history::SqliteSessionHistoryRepository;
use crate::infrastructure::snapshot_store::SqliteSnapshotStore;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

const COMPLETION_CHANNEL_CAPACITY: usize = 16;
const REFLECTION_DEFAULT_DAYS: i64 = 7;

pub type AppTimerService = FocusTimerService<
    ReqwestSessionGateway,
    SqliteSnapshotStore,
    BroadcastCompletionNotifier,
    SqliteSessionHistoryRepository,
>;

pub struct AppState {
    config_dir: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    app_name: String,
    timer_config: TimerConfig,
    timer: Arc<AppTimerService>,
    notifier: Arc<BroadcastCompletionNotifier>,
    history: Arc<SqliteSessionHistoryRepository>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    log_guard: Mutex<()>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        Self::with_env_lookup(workspace_root, |key| std::env::var(key).ok())
    }

    pub fn with_env_lookup<F>(workspace_root: PathBuf, lookup: F) -> Result<Self, InfraError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let timer_config = load_timer_config_with_lookup(&bootstrap.config_dir, lookup)?;

        let gateway = ReqwestSessionGateway::new(&timer_config.gateway_settings())?;
        if !gateway.is_configured() {
            tracing::info!("focus session api is not configured; timer runs local-only");
        }
        let notifier = Arc::new(BroadcastCompletionNotifier::new(COMPLETION_CHANNEL_CAPACITY));
        let history = Arc::new(SqliteSessionHistoryRepository::new(&bootstrap.database_path));
        let controller = SessionController::new(
            Arc::new(SqliteSnapshotStore::new(&bootstrap.database_path)),
            Arc::clone(&notifier),
            Arc::clone(&history),
        );
        let timer = FocusTimerService::new(Arc::new(gateway), controller).with_lookup_policy(
            RetryPolicy {
                max_attempts: timer_config.remote.lookup_attempts,
                base_delay_ms: timer_config.remote.lookup_base_delay_ms,
            },
        );

        Ok(Self {
            config_dir: bootstrap.config_dir,
            database_path: bootstrap.database_path,
            logs_dir: bootstrap.logs_dir,
            app_name: bootstrap.app_name,
            timer_config,
            timer: Arc::new(timer),
            notifier,
            history,
            ticker: Mutex::new(None),
            log_guard: Mutex::new(()),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn timer_config(&self) -> &TimerConfig {
        &self.timer_config
    }

    pub fn subscribe_completions(&self) -> broadcast::Receiver<CompletionEvent> {
        self.notifier.subscribe()
    }

    /// Replaces the tick driver with one that reports every tick to `on_tick`.
    /// The driver evaluates the running session every `tickIntervalMs` and
    /// stays parked between sessions.
    pub fn start_ticker<F>(&self, on_tick: F)
    where
        F: Fn(&TickUpdate) + Send + Sync + 'static,
    {
        let Ok(mut slot) = self.ticker.lock() else {
            return;
        };
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        *slot = Some(self.timer.spawn_ticker(self.tick_period(), on_tick));
    }

    /// Spawns a silent tick driver unless one is already alive.
    fn ensure_ticker(&self) {
        let Ok(mut slot) = self.ticker.lock() else {
            return;
        };
        if slot.as_ref().is_some_and(|ticker| !ticker.is_finished()) {
            return;
        }
        *slot = Some(self.timer.spawn_ticker(self.tick_period(), |_| {}));
    }

    fn tick_period(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timer_config.tick_interval_ms)
    }

    pub fn attach_lifecycle(&self, events: mpsc::Receiver<LifecycleEvent>) -> JoinHandle<()> {
        spawn_lifecycle_bridge(Arc::clone(&self.timer), events)
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_warn(&self, command: &str, message: &str) {
        self.append_log("warn", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }
}

impl Drop for AppState {
    fn drop(&mut self) {
        if let Ok(slot) = self.ticker.get_mut() {
            if let Some(ticker) = slot.take() {
                ticker.abort();
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FocusStateResponse {
    pub session_id: Option<String>,
    pub task_id: String,
    pub status: String,
    pub remaining_seconds: u64,
    pub total_duration_seconds: u64,
    pub deadline: Option<String>,
    pub started_at: String,
    pub local_only: bool,
    pub remote_error: Option<String>,
    pub persistence_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReflectionLogItem {
    pub task_id: String,
    pub session_id: Option<String>,
    pub outcome: String,
    pub started_at: String,
    pub ended_at: String,
    pub planned_seconds: u64,
    pub focused_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReflectionSummaryResponse {
    pub start: String,
    pub end: String,
    pub completed_count: u32,
    pub quit_count: u32,
    pub total_focus_seconds: u64,
    pub logs: Vec<ReflectionLogItem>,
}

pub async fn start_focus_impl(
    state: &AppState,
    task_id: String,
    duration_seconds: Option<u64>,
) -> Result<FocusStateResponse, InfraError> {
    let duration_seconds =
        duration_seconds.unwrap_or(state.timer_config.default_duration_seconds);
    let result = state.timer.start(&task_id, duration_seconds).await;
    respond(state, "start_focus", result)
}

pub async fn resume_or_start_focus_impl(
    state: &AppState,
    task_id: String,
    duration_seconds: Option<u64>,
) -> Result<FocusStateResponse, InfraError> {
    let duration_seconds =
        duration_seconds.unwrap_or(state.timer_config.default_duration_seconds);
    let result = state
        .timer
        .resume_active_or_start(&task_id, duration_seconds)
        .await;
    respond(state, "resume_or_start_focus", result)
}

pub async fn pause_focus_impl(state: &AppState) -> Result<FocusStateResponse, InfraError> {
    let result = state.timer.pause().await;
    respond(state, "pause_focus", result)
}

pub async fn resume_focus_impl(state: &AppState) -> Result<FocusStateResponse, InfraError> {
    let result = state.timer.resume().await;
    respond(state, "resume_focus", result)
}

pub async fn add_focus_time_impl(
    state: &AppState,
    seconds: u64,
) -> Result<FocusStateResponse, InfraError> {
    let result = state.timer.add_time(seconds).await;
    respond(state, "add_focus_time", result)
}

pub async fn quit_focus_impl(state: &AppState) -> Result<FocusStateResponse, InfraError> {
    let result = state.timer.quit().await;
    respond(state, "quit_focus", result)
}

pub async fn complete_focus_impl(state: &AppState) -> Result<FocusStateResponse, InfraError> {
    let result = state.timer.complete().await;
    respond(state, "complete_focus", result)
}

pub async fn get_focus_state_impl(
    state: &AppState,
) -> Result<Option<FocusStateResponse>, InfraError> {
    let result = state.timer.current().await;
    respond_optional(state, "get_focus_state", result)
}

pub async fn app_foregrounded_impl(
    state: &AppState,
) -> Result<Option<FocusStateResponse>, InfraError> {
    let result = state.timer.on_foreground().await;
    respond_optional(state, "app_foregrounded", result)
}

pub async fn app_backgrounded_impl(
    state: &AppState,
) -> Result<Option<FocusStateResponse>, InfraError> {
    let result = state.timer.on_background().await;
    respond_optional(state, "app_backgrounded", result)
}

pub fn get_reflection_summary_impl(
    state: &AppState,
    start: Option<String>,
    end: Option<String>,
) -> Result<ReflectionSummaryResponse, InfraError> {
    let start = match start {
        Some(raw) => parse_datetime_input(&raw, "start")?,
        None => Utc::now() - Duration::days(REFLECTION_DEFAULT_DAYS),
    };
    let end = match end {
        Some(raw) => parse_datetime_input(&raw, "end")?,
        None => Utc::now(),
    };

    let summary = reflection_summary(&*state.history, start, end)?;
    let logs = summary
        .entries
        .into_iter()
        .map(|entry| ReflectionLogItem {
            task_id: entry.task_id,
            session_id: entry.session_id,
            outcome: entry.outcome.as_str().to_string(),
            started_at: entry.started_at.to_rfc3339(),
            ended_at: entry.ended_at.to_rfc3339(),
            planned_seconds: entry.planned_seconds,
            focused_seconds: entry.focused_seconds,
        })
        .collect::<Vec<_>>();

    Ok(ReflectionSummaryResponse {
        start: summary.start.to_rfc3339(),
        end: summary.end.to_rfc3339(),
        completed_count: summary.completed_count,
        quit_count: summary.quit_count,
        total_focus_seconds: summary.total_focus_seconds,
        logs,
    })
}

fn respond(
    state: &AppState,
    command: &str,
    result: Result<TimerOutcome, InfraError>,
) -> Result<FocusStateResponse, InfraError> {
    let outcome = result.map_err(|error| {
        state.log_error(command, &error.to_string());
        error
    })?;
    Ok(report(state, command, outcome))
}

fn respond_optional(
    state: &AppState,
    command: &str,
    result: Result<Option<TimerOutcome>, InfraError>,
) -> Result<Option<FocusStateResponse>, InfraError> {
    let outcome = result.map_err(|error| {
        state.log_error(command, &error.to_string());
        error
    })?;
    Ok(outcome.map(|outcome| report(state, command, outcome)))
}

fn report(state: &AppState, command: &str, outcome: TimerOutcome) -> FocusStateResponse {
    if outcome.session.status == SessionStatus::Running {
        state.ensure_ticker();
    }
    let session = &outcome.session;
    state.log_info(
        command,
        &format!(
            "task_id={} status={} remaining_seconds={}",
            session.task_id,
            session.status.as_str(),
            session.remaining_seconds
        ),
    );
    if let Some(error) = outcome.remote_error.as_deref() {
        state.log_warn(command, &format!("remote degraded: {error}"));
    }
    if let Some(error) = outcome.persistence_error.as_deref() {
        state.log_warn(command, &format!("persistence degraded: {error}"));
    }
    to_focus_state_response(outcome)
}

fn to_focus_state_response(outcome: TimerOutcome) -> FocusStateResponse {
    let TimerOutcome {
        session,
        remote_error,
        persistence_error,
    } = outcome;
    FocusStateResponse {
        local_only: session.is_local_only(),
        session_id: session.id,
        task_id: session.task_id,
        status: session.status.as_str().to_string(),
        remaining_seconds: session.remaining_seconds,
        total_duration_seconds: session.total_duration_seconds,
        deadline: session.deadline.map(|value| value.to_rfc3339()),
        started_at: session.started_at.to_rfc3339(),
        remote_error,
        persistence_error,
    }
}

fn parse_datetime_input(value: &str, field_name: &str) -> Result<DateTime<Utc>, InfraError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)));
    }
    Err(InfraError::InvalidInput(format!(
        "{field_name} must be RFC3339 or YYYY-MM-DD"
    )))
}
