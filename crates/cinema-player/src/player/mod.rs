pub mod blit;
pub mod callbacks;
pub mod exchange;
pub mod format;
pub mod frame_buffer;
pub mod locator;
pub mod quality;
pub mod types;

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use url::Url;

use self::blit::PixelBlitter;
use self::callbacks::FrameCallbacks;
use self::exchange::FrameExchange;
use self::format::FormatNegotiator;
use self::frame_buffer::FrameBuffer;
use self::locator::parse_locator;
use self::quality::{VideoQuality, build_quality_list, same_tracks, selected_index};
use self::types::{PlaybackState, PlayerEvent};
use crate::engine::{
    DecoderCallbacks, DecoderEngine, EngineEvent, EventSink, SessionEvent, SessionId, TrackKind,
};
use crate::surface::VideoSurface;

/// Collaborator notifications beyond this are dropped until the queue drains.
const EVENT_QUEUE_CAPACITY: usize = 256;

/// Owns the decoding session and turns it into a texture, one render tick at a time.
///
/// Everything here runs on the render thread. The engine's threads only touch
/// the shared frame buffer, format and exchange (through [`FrameCallbacks`])
/// and the engine event channel.
pub struct VideoPlayer<S: VideoSurface> {
    engine: Box<dyn DecoderEngine>,
    surface: S,
    buffer: Arc<FrameBuffer>,
    format: Arc<FormatNegotiator>,
    exchange: Arc<FrameExchange>,
    callbacks: Arc<FrameCallbacks>,
    blitter: PixelBlitter<S::Texture>,
    state: PlaybackState,
    session: Option<SessionId>,
    last_session: SessionId,
    current_url: Option<Url>,
    qualities: Vec<VideoQuality>,
    selected_quality: Option<usize>,
    qualities_need_refresh: bool,
    engine_tx: Sender<SessionEvent>,
    engine_rx: Receiver<SessionEvent>,
    events_tx: Sender<PlayerEvent>,
    events_rx: Receiver<PlayerEvent>,
    disposed: bool,
}

impl<S: VideoSurface> VideoPlayer<S> {
    pub fn new(engine: Box<dyn DecoderEngine>, surface: S) -> Self {
        let buffer = Arc::new(FrameBuffer::new());
        let format = Arc::new(FormatNegotiator::new(Arc::clone(&buffer)));
        let exchange = Arc::new(FrameExchange::new(Arc::clone(&buffer)));
        let callbacks = Arc::new(FrameCallbacks::new(
            Arc::clone(&format),
            Arc::clone(&exchange),
        ));
        let (engine_tx, engine_rx) = crossbeam_channel::unbounded();
        let (events_tx, events_rx) = crossbeam_channel::bounded(EVENT_QUEUE_CAPACITY);

        Self {
            engine,
            surface,
            buffer,
            format,
            exchange,
            callbacks,
            blitter: PixelBlitter::new(),
            state: PlaybackState::Stopped,
            session: None,
            last_session: 0,
            current_url: None,
            qualities: Vec::new(),
            selected_quality: None,
            qualities_need_refresh: false,
            engine_tx,
            engine_rx,
            events_tx,
            events_rx,
            disposed: false,
        }
    }

    /// Receiver for collaborator notifications.
    pub fn events(&self) -> Receiver<PlayerEvent> {
        self.events_rx.clone()
    }

    // --- Transport ---

    /// Start playing `locator`, replacing any current session.
    ///
    /// A malformed locator moves the player to `Error` and leaves everything
    /// else alone. Never blocks: playback state arrives through engine events.
    pub fn play(&mut self, locator: &str) {
        if self.disposed {
            return;
        }
        if locator.trim().is_empty() {
            log::debug!("Ignoring play request with empty locator");
            return;
        }

        let url = match parse_locator(locator) {
            Ok(url) => url,
            Err(e) => {
                log::warn!("Cannot play: {e}");
                self.set_state(PlaybackState::Error);
                return;
            }
        };

        self.teardown_session();
        self.set_state(PlaybackState::Stopped);

        self.last_session += 1;
        let session = self.last_session;
        let sink = EventSink::new(session, self.engine_tx.clone());
        let callbacks: Arc<dyn DecoderCallbacks> = self.callbacks.clone();

        match self.engine.start(&url, callbacks, sink) {
            Ok(()) => {
                log::info!("Playback session {session} started: {url}");
                self.session = Some(session);
                self.current_url = Some(url);
            }
            Err(e) => {
                log::error!("Failed to start playback of {url}: {e}");
                self.set_state(PlaybackState::Error);
            }
        }
    }

    pub fn pause(&mut self) {
        if self.engine.can_pause() {
            self.engine.pause();
        }
    }

    pub fn resume(&mut self) {
        if self.engine.is_paused() {
            self.engine.resume();
        }
    }

    pub fn toggle_pause(&mut self) {
        if self.is_playing() {
            self.pause();
        } else if self.is_paused() {
            self.resume();
        }
    }

    /// Halt the session and clear everything it produced.
    /// `Ended` and `Error` are kept so collaborators still see why playback ended.
    pub fn stop(&mut self) {
        self.teardown_session();
        if !self.state.is_terminal() {
            self.set_state(PlaybackState::Stopped);
        }
    }

    fn teardown_session(&mut self) {
        // Once the engine has stopped, no decoder callback can start a new write.
        self.engine.stop();
        if let Some(session) = self.session.take() {
            log::info!("Playback session {session} stopped");
        }
        self.format.reset();
        self.exchange.reset();
        self.buffer.free();
        self.blitter.release();
        self.current_url = None;
        self.selected_quality = None;
        self.qualities_need_refresh = false;
        if !self.qualities.is_empty() {
            self.qualities.clear();
            self.emit(PlayerEvent::QualitiesChanged);
        }
    }

    // --- Levels ---

    pub fn volume(&self) -> u32 {
        self.engine.volume()
    }

    /// Clamped to 0–100.
    pub fn set_volume(&mut self, volume: i32) {
        self.engine.set_volume(volume.clamp(0, 100) as u32);
    }

    pub fn position(&self) -> f32 {
        self.engine.position()
    }

    /// Clamped to 0.0–1.0.
    pub fn set_position(&mut self, position: f32) {
        if !position.is_finite() {
            log::warn!("Ignoring non-finite seek position {position}");
            return;
        }
        self.engine.set_position(position.clamp(0.0, 1.0));
    }

    // --- Render tick ---

    /// Call exactly once per render tick.
    pub fn update(&mut self) {
        if self.disposed {
            return;
        }

        self.drain_engine_events();

        if std::mem::take(&mut self.qualities_need_refresh) {
            self.refresh_available_qualities();
        }

        let active = self.format.active_format();
        self.blitter
            .sync_texture(&mut self.surface, active.map(|a| a.descriptor));
        if self.blitter.present(&self.exchange, active) {
            self.emit(PlayerEvent::FrameReady);
        }
    }

    fn drain_engine_events(&mut self) {
        while let Ok(SessionEvent { session, event }) = self.engine_rx.try_recv() {
            if self.session != Some(session) {
                log::trace!("Ignoring {event:?} from stale session {session}");
                continue;
            }
            match event {
                EngineEvent::StreamAdded(TrackKind::Video) => self.qualities_need_refresh = true,
                EngineEvent::StreamAdded(_) => {}
                _ => {
                    if event == EngineEvent::Playing {
                        self.qualities_need_refresh = true;
                    }
                    if let Some(next) = self.state.on_engine_event(event) {
                        self.set_state(next);
                    }
                }
            }
        }
    }

    fn set_state(&mut self, next: PlaybackState) {
        if next == self.state {
            return;
        }
        log::info!("Playback state: {:?} -> {next:?}", self.state);
        self.state = next;
        self.emit(PlayerEvent::PlaybackStateChanged(next));
    }

    fn emit(&self, event: PlayerEvent) {
        if self.events_tx.try_send(event).is_err() {
            log::trace!("Event queue full, dropping {event:?}");
        }
    }

    // --- Quality tracks ---

    /// Rebuild the quality list from the engine's current video tracks.
    /// Fires `QualitiesChanged` only if track ids or heights differ from before.
    pub fn refresh_available_qualities(&mut self) {
        let tracks = match self.engine.video_tracks() {
            Ok(Some(tracks)) => tracks,
            Ok(None) => {
                self.qualities.clear();
                self.selected_quality = None;
                return;
            }
            Err(e) => {
                log::debug!("Failed to refresh available qualities: {e}");
                return;
            }
        };
        if tracks.is_empty() {
            return;
        }

        let qualities = build_quality_list(&tracks, self.engine.current_video_track());
        let changed = !same_tracks(&self.qualities, &qualities);
        self.selected_quality = selected_index(&qualities);
        self.qualities = qualities;

        if changed {
            log::debug!(
                "Available qualities: [{}]",
                self.qualities
                    .iter()
                    .map(|q| q.label.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            self.emit(PlayerEvent::QualitiesChanged);
        }
    }

    pub fn set_quality(&mut self, index: usize) {
        let Some(quality) = self.qualities.get(index) else {
            log::warn!(
                "Ignoring quality index {index}: {} available",
                self.qualities.len()
            );
            return;
        };
        let track_id = quality.track_id;
        self.set_quality_by_track_id(track_id);
    }

    pub fn set_quality_by_track_id(&mut self, track_id: i32) {
        if !self.qualities.iter().any(|q| q.track_id == track_id) {
            log::warn!("Ignoring unknown video track id {track_id}");
            return;
        }
        if let Err(e) = self.engine.set_video_track(track_id) {
            log::warn!("Failed to switch to video track {track_id}: {e}");
            return;
        }

        self.selected_quality = None;
        for (i, quality) in self.qualities.iter_mut().enumerate() {
            quality.selected = quality.track_id == track_id;
            if quality.selected {
                self.selected_quality = Some(i);
            }
        }
        self.emit(PlayerEvent::QualitiesChanged);
    }

    // --- Read-only views ---

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.engine.is_playing()
    }

    pub fn is_paused(&self) -> bool {
        self.engine.is_paused()
    }

    pub fn current_url(&self) -> Option<&Url> {
        self.current_url.as_ref()
    }

    pub fn video_width(&self) -> u32 {
        self.format.descriptor().map_or(0, |f| f.width)
    }

    pub fn video_height(&self) -> u32 {
        self.format.descriptor().map_or(0, |f| f.height)
    }

    pub fn available_qualities(&self) -> &[VideoQuality] {
        &self.qualities
    }

    pub fn selected_quality_index(&self) -> Option<usize> {
        self.selected_quality
    }

    pub fn selected_quality(&self) -> Option<&VideoQuality> {
        self.selected_quality.and_then(|i| self.qualities.get(i))
    }

    /// The presentable texture, once the first format has been negotiated.
    pub fn texture(&self) -> Option<&S::Texture> {
        self.blitter.texture()
    }

    pub fn frames_presented(&self) -> u64 {
        self.blitter.frames_presented()
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Stop the engine and release the buffer and texture. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.engine.stop();
        self.session = None;
        self.format.reset();
        self.exchange.reset();
        self.buffer.free();
        self.blitter.release();
        log::debug!("Video player disposed");
    }
}

impl<S: VideoSurface> Drop for VideoPlayer<S> {
    fn drop(&mut self) {
        self.dispose();
    }
}
