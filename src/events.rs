use crate::state_machine::{FacadeState, Transition};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Event names - centralized for consistency
pub mod event_names {
    pub const STATE_CHANGED: &str = "connect:state-changed";
    pub const PIPE_ATTACHED: &str = "connect:pipe-attached";
    pub const STAGE_FAILED: &str = "connect:stage-failed";
    pub const FINISHED: &str = "connect:finished";
}

/// Number of events a slow subscriber may lag behind before it misses some
const EVENT_BUFFER: usize = 64;

/// Lifecycle notification published by a composite stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FacadeEvent {
    /// The facade moved between lifecycle states
    #[serde(rename_all = "camelCase")]
    StateChanged {
        facade_id: Uuid,
        from: FacadeState,
        to: FacadeState,
        timestamp: String,
    },

    /// An upstream producer was piped into the facade, and so into the head stage
    #[serde(rename_all = "camelCase")]
    PipeAttached {
        facade_id: Uuid,
        source: String,
        head: String,
        timestamp: String,
    },

    /// A stage reported an error
    #[serde(rename_all = "camelCase")]
    StageFailed {
        facade_id: Uuid,
        stage_index: usize,
        stage_name: String,
        error: String,
        timestamp: String,
    },

    /// Both sides finished and the links were torn down
    #[serde(rename_all = "camelCase")]
    Finished {
        facade_id: Uuid,
        error_count: usize,
        timestamp: String,
    },
}

impl FacadeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            FacadeEvent::StateChanged { .. } => event_names::STATE_CHANGED,
            FacadeEvent::PipeAttached { .. } => event_names::PIPE_ATTACHED,
            FacadeEvent::StageFailed { .. } => event_names::STAGE_FAILED,
            FacadeEvent::Finished { .. } => event_names::FINISHED,
        }
    }

    pub fn facade_id(&self) -> Uuid {
        match self {
            FacadeEvent::StateChanged { facade_id, .. }
            | FacadeEvent::PipeAttached { facade_id, .. }
            | FacadeEvent::StageFailed { facade_id, .. }
            | FacadeEvent::Finished { facade_id, .. } => *facade_id,
        }
    }
}

/// Event emitter shared by the halves of one composite stream
///
/// Emitting never blocks and never fails: with no subscriber the event is dropped.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    facade_id: Uuid,
    sender: broadcast::Sender<FacadeEvent>,
}

impl EventEmitter {
    pub fn new(facade_id: Uuid) -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER);
        Self { facade_id, sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FacadeEvent> {
        self.sender.subscribe()
    }

    fn emit(&self, event: FacadeEvent) {
        tracing::trace!(target: "pipeline::events", event = event.name(), facade = %self.facade_id);
        let _ = self.sender.send(event);
    }

    fn timestamp() -> String {
        chrono::Utc::now().to_rfc3339()
    }

    /// Emit state changed event
    pub fn state_changed(&self, transition: Transition) {
        self.emit(FacadeEvent::StateChanged {
            facade_id: self.facade_id,
            from: transition.from,
            to: transition.to,
            timestamp: Self::timestamp(),
        });
    }

    /// Emit pipe attached event
    pub fn pipe_attached(&self, source: &str, head: &str) {
        self.emit(FacadeEvent::PipeAttached {
            facade_id: self.facade_id,
            source: source.to_string(),
            head: head.to_string(),
            timestamp: Self::timestamp(),
        });
    }

    /// Emit stage failed event
    pub fn stage_failed(&self, stage_index: usize, stage_name: &str, error: &str) {
        self.emit(FacadeEvent::StageFailed {
            facade_id: self.facade_id,
            stage_index,
            stage_name: stage_name.to_string(),
            error: error.to_string(),
            timestamp: Self::timestamp(),
        });
    }

    /// Emit finished event
    pub fn finished(&self, error_count: usize) {
        self.emit(FacadeEvent::Finished {
            facade_id: self.facade_id,
            error_count,
            timestamp: Self::timestamp(),
        });
    }
}
