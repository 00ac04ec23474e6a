//! Seam between the player core and whatever decodes the media.
//!
//! An engine owns the demux/decode session and drives the three
//! [`DecoderCallbacks`] from its own thread(s). Everything it wants the
//! controller to know travels through an [`EventSink`].

pub mod synthetic;
#[cfg(feature = "vlc")]
pub mod vlc;

use std::ptr::NonNull;
use std::sync::Arc;

use crossbeam_channel::Sender;
use url::Url;

use crate::error::Result;
use crate::player::format::NegotiatedFormat;

/// Identifies one `play` call. Events from older sessions are ignored.
pub type SessionId = u64;

/// The fixed callback contract a decoder drives per picture.
///
/// Implementations must never panic or block: they run on foreign threads.
pub trait DecoderCallbacks: Send + Sync {
    /// Called before the first picture and whenever the source geometry changes.
    fn negotiate_format(&self, width: u32, height: u32) -> NegotiatedFormat;
    /// Where to write the next picture. `None` means "no destination, do not write".
    fn lock(&self) -> Option<NonNull<u8>>;
    /// The picture written after the last lock is complete.
    fn display(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
    Text,
    Unknown,
}

/// One elementary stream exposed by the engine for the current media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub id: i32,
    pub kind: TrackKind,
    pub width: u32,
    pub height: u32,
}

impl TrackInfo {
    pub fn video(id: i32, width: u32, height: u32) -> Self {
        Self {
            id,
            kind: TrackKind::Video,
            width,
            height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    Playing,
    Paused,
    Stopped,
    EndReached,
    Error,
    StreamAdded(TrackKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEvent {
    pub session: SessionId,
    pub event: EngineEvent,
}

/// Session-tagged sender for engine events. Cheap to clone into engine threads.
#[derive(Debug, Clone)]
pub struct EventSink {
    session: SessionId,
    tx: Sender<SessionEvent>,
}

impl EventSink {
    pub fn new(session: SessionId, tx: Sender<SessionEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn emit(&self, event: EngineEvent) {
        let tagged = SessionEvent {
            session: self.session,
            event,
        };
        if self.tx.try_send(tagged).is_err() {
            log::debug!("Dropping engine event {event:?}: controller gone");
        }
    }
}

/// A decoding session the controller can drive.
///
/// All methods are called from the render thread. `start` must not block on
/// the first picture; state changes are reported through the sink.
pub trait DecoderEngine {
    fn start(
        &mut self,
        locator: &Url,
        callbacks: Arc<dyn DecoderCallbacks>,
        events: EventSink,
    ) -> Result<()>;

    /// Halt the session. When this returns the engine no longer calls
    /// `lock`/`display` for it.
    fn stop(&mut self);

    fn pause(&mut self);
    fn resume(&mut self);
    fn can_pause(&self) -> bool;
    fn is_playing(&self) -> bool;
    fn is_paused(&self) -> bool;

    /// 0–100.
    fn volume(&self) -> u32;
    fn set_volume(&mut self, volume: u32);

    /// Normalised 0.0–1.0.
    fn position(&self) -> f32;
    fn set_position(&mut self, position: f32);

    /// Tracks of the current media, or `Ok(None)` if no media is loaded.
    fn video_tracks(&self) -> Result<Option<Vec<TrackInfo>>>;
    fn current_video_track(&self) -> Option<i32>;
    fn set_video_track(&mut self, id: i32) -> Result<()>;
}
