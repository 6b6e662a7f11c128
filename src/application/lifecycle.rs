use crate::application::focus_service::TimerOutcome;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Foreground,
    Background,
}

/// Host application visibility changes, delivered in order.
#[async_trait]
pub trait LifecycleObserver: Send + Sync {
    async fn on_foreground(&self) -> Result<Option<TimerOutcome>, InfraError>;
    async fn on_background(&self) -> Result<Option<TimerOutcome>, InfraError>;
}

/// Forwards platform lifecycle events to `observer` until the sender side is
/// dropped. Failures are logged and do not stop the bridge.
pub fn spawn_lifecycle_bridge<O>(
    observer: Arc<O>,
    mut events: mpsc::Receiver<LifecycleEvent>,
) -> JoinHandle<()>
where
    O: LifecycleObserver + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let result = match event {
                LifecycleEvent::Foreground => observer.on_foreground().await,
                LifecycleEvent::Background => observer.on_background().await,
            };
            if let Err(error) = result {
                tracing::warn!(?event, "lifecycle transition failed: {error}");
            }
        }
    })
}
