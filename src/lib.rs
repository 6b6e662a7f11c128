pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::commands::{
    add_focus_time_impl, app_backgrounded_impl, app_foregrounded_impl, complete_focus_impl,
    get_focus_state_impl, get_reflection_summary_impl, pause_focus_impl, quit_focus_impl,
    resume_focus_impl, resume_or_start_focus_impl, start_focus_impl, AppState, AppTimerService,
    FocusStateResponse, ReflectionLogItem, ReflectionSummaryResponse,
};
pub use application::completion::{BroadcastCompletionNotifier, CompletionEvent, CompletionNotifier};
pub use application::focus_service::{FocusTimerService, RetryPolicy, TimerOutcome};
pub use application::lifecycle::{LifecycleEvent, LifecycleObserver};
pub use application::session_controller::SessionController;
pub use application::timer_engine::{LocalTimerEngine, TickUpdate};
pub use domain::models::{FocusSession, SessionStatus, TimerSnapshot};
pub use infrastructure::error::InfraError;
pub use infrastructure::session_gateway::RemoteSessionGateway;
pub use infrastructure::snapshot_store::SnapshotStore;
