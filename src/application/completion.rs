use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// Receives `on_complete(task_id)` once per finished focus session.
pub trait CompletionNotifier: Send + Sync {
    fn on_complete(&self, task_id: &str);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionEvent {
    pub task_id: String,
    pub completed_at: DateTime<Utc>,
}

/// Fans completion out to sound/vibration/notification collaborators.
#[derive(Debug, Clone)]
pub struct BroadcastCompletionNotifier {
    sender: broadcast::Sender<CompletionEvent>,
}

impl BroadcastCompletionNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CompletionEvent> {
        self.sender.subscribe()
    }
}

impl CompletionNotifier for BroadcastCompletionNotifier {
    fn on_complete(&self, task_id: &str) {
        let event = CompletionEvent {
            task_id: task_id.to_string(),
            completed_at: Utc::now(),
        };
        // no subscribers is fine
        if self.sender.send(event).is_err() {
            tracing::debug!(task_id, "focus session completed with no listeners");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_notifier_delivers_to_every_subscriber() {
        let notifier = BroadcastCompletionNotifier::new(4);
        let mut sound = notifier.subscribe();
        let mut banner = notifier.subscribe();

        notifier.on_complete("tsk-1");

        assert_eq!(sound.recv().await.expect("sound event").task_id, "tsk-1");
        assert_eq!(banner.recv().await.expect("banner event").task_id, "tsk-1");
    }

    #[test]
    fn broadcast_notifier_tolerates_missing_listeners() {
        let notifier = BroadcastCompletionNotifier::new(1);
        notifier.on_complete("tsk-1");
    }
}
