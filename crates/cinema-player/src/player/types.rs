use crate::engine::EngineEvent;

/// Playback state as seen by collaborators.
///
/// `Ended` and `Error` are terminal for a session: only a fresh `play` leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
    Ended,
    Error,
}

impl PlaybackState {
    /// State after an engine event, or `None` if the event does not move the machine.
    pub fn on_engine_event(self, event: EngineEvent) -> Option<Self> {
        use PlaybackState::{Ended, Error, Paused, Playing, Stopped};

        let next = match (self, event) {
            (_, EngineEvent::Error) => Error,
            (Ended | Error, _) => return None,
            (Stopped | Paused | Playing, EngineEvent::Playing) => Playing,
            (Playing, EngineEvent::Paused) => Paused,
            (Playing | Paused, EngineEvent::Stopped) => Stopped,
            (Playing | Paused, EngineEvent::EndReached) => Ended,
            _ => return None,
        };
        (next != self).then_some(next)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ended | Self::Error)
    }
}

/// Notifications for display widgets and other collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    /// A new picture was uploaded to the texture this tick.
    FrameReady,
    PlaybackStateChanged(PlaybackState),
    QualitiesChanged,
}
