//! Event types for Resonar

use crate::device::HandleId;

/// Notifications from the mixing engine, drained with
/// [`Device::poll_events`](crate::device::Device::poll_events).
///
/// Events are best effort: when the queue is full new events are dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// A handle reached its end and was removed.
    HandleFinished { handle: HandleId },
    /// A handle with `keep` set reached its end and was paused.
    HandlePaused { handle: HandleId },
    /// A looping handle started over. `remaining` is -1 for endless loops.
    HandleLooped { handle: HandleId, remaining: i32 },
    /// The output sink failed; the mixing thread has stopped.
    SinkError { error: String },
}

impl DeviceEvent {
    pub fn handle_id(&self) -> Option<HandleId> {
        match self {
            Self::HandleFinished { handle }
            | Self::HandlePaused { handle }
            | Self::HandleLooped { handle, .. } => Some(*handle),
            Self::SinkError { .. } => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::SinkError { .. })
    }
}
