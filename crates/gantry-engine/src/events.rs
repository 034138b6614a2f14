//! Run progress events, fanned out over a broadcast channel.
//!
//! Subscribers are optional; emitting with no receivers is a no-op.

use tokio::sync::broadcast;

use gantry_types::StageStatus;

use crate::state::RunStatus;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    RunStarted {
        pipeline: String,
    },
    NodeStarted {
        node_id: String,
        attempt: usize,
    },
    NodeFinished {
        node_id: String,
        status: StageStatus,
    },
    RetryScheduled {
        node_id: String,
        attempt: usize,
    },
    GoalGateRedirect {
        node_id: String,
        target: String,
    },
    BranchStarted {
        key: String,
    },
    BranchFinished {
        key: String,
        status: StageStatus,
    },
    CheckpointSaved {
        next_node_id: String,
    },
    RunFinished {
        status: RunStatus,
    },
}

#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        EventEmitter { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: PipelineEvent) {
        // send fails only when there are no subscribers
        let _ = self.sender.send(event);
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let emitter = EventEmitter::new();
        let mut rx = emitter.subscribe();

        emitter.emit(PipelineEvent::RunStarted {
            pipeline: "demo".to_string(),
        });
        emitter.emit(PipelineEvent::NodeStarted {
            node_id: "plan".to_string(),
            attempt: 1,
        });

        assert!(matches!(
            rx.recv().await.unwrap(),
            PipelineEvent::RunStarted { .. }
        ));
        match rx.recv().await.unwrap() {
            PipelineEvent::NodeStarted { node_id, attempt } => {
                assert_eq!(node_id, "plan");
                assert_eq!(attempt, 1);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn emit_without_subscribers_is_a_noop() {
        let emitter = EventEmitter::new();
        emitter.emit(PipelineEvent::RunFinished {
            status: RunStatus::Completed,
        });
    }
}
