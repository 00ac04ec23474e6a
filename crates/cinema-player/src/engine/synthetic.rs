//! Test-pattern decoder. Drives the callback contract from its own thread
//! exactly like a real engine would, without decoding anything.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use url::Url;

use super::{DecoderCallbacks, DecoderEngine, EngineEvent, EventSink, TrackInfo, TrackKind};
use crate::error::{PlayerError, Result};
use crate::player::format::NegotiatedFormat;
use crate::player::frame_buffer::BYTES_PER_PIXEL;

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Streams the fake media exposes. The first video track plays initially.
    pub tracks: Vec<TrackInfo>,
    pub frame_interval: Duration,
    pub pausable: bool,
    /// Emit `EndReached` after this many pictures. `None` plays forever.
    pub total_frames: Option<u64>,
    /// Emit `Error` after this many pictures.
    pub fail_after_frames: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            tracks: vec![
                TrackInfo::video(1, 1920, 1080),
                TrackInfo::video(2, 1280, 720),
                TrackInfo::video(3, 640, 360),
                TrackInfo {
                    id: 10,
                    kind: TrackKind::Audio,
                    width: 0,
                    height: 0,
                },
            ],
            frame_interval: Duration::from_millis(33),
            pausable: true,
            total_frames: None,
            fail_after_frames: None,
        }
    }
}

/// State shared between the engine handle and its decoder thread.
struct Shared {
    shutdown: AtomicBool,
    paused: AtomicBool,
    running: AtomicBool,
    selected: AtomicI32,
    frame: AtomicU64,
}

struct Session {
    shared: Arc<Shared>,
    handle: JoinHandle<()>,
    events: EventSink,
}

pub struct SyntheticEngine {
    config: SyntheticConfig,
    session: Option<Session>,
    volume: u32,
}

impl SyntheticEngine {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            session: None,
            volume: 100,
        }
    }

    fn video_track(&self, id: i32) -> Option<&TrackInfo> {
        self.config
            .tracks
            .iter()
            .find(|t| t.id == id && t.kind == TrackKind::Video)
    }

    fn running(&self) -> Option<&Shared> {
        self.session
            .as_ref()
            .map(|s| s.shared.as_ref())
            .filter(|s| s.running.load(Ordering::Acquire))
    }
}

impl Default for SyntheticEngine {
    fn default() -> Self {
        Self::new(SyntheticConfig::default())
    }
}

impl DecoderEngine for SyntheticEngine {
    fn start(
        &mut self,
        locator: &Url,
        callbacks: Arc<dyn DecoderCallbacks>,
        events: EventSink,
    ) -> Result<()> {
        self.stop();

        let first = self
            .config
            .tracks
            .iter()
            .find(|t| t.kind == TrackKind::Video)
            .ok_or_else(|| PlayerError::Engine("synthetic media has no video track".into()))?;

        let shared = Arc::new(Shared {
            shutdown: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            running: AtomicBool::new(true),
            selected: AtomicI32::new(first.id),
            frame: AtomicU64::new(0),
        });

        let handle = {
            let config = self.config.clone();
            let shared = Arc::clone(&shared);
            let events = events.clone();
            std::thread::Builder::new()
                .name("synthetic-decoder".into())
                .spawn(move || {
                    decode_loop(&config, &shared, callbacks.as_ref(), &events);
                    shared.running.store(false, Ordering::Release);
                    log::debug!("Synthetic decoder thread exiting");
                })
                .map_err(|e| PlayerError::Engine(format!("failed to spawn decoder thread: {e}")))?
        };

        log::info!("Synthetic engine started for {locator}");
        self.session = Some(Session {
            shared,
            handle,
            events,
        });
        Ok(())
    }

    fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        session.shared.shutdown.store(true, Ordering::Release);
        if session.handle.join().is_err() {
            log::error!("Synthetic decoder thread panicked");
        }
        session.events.emit(EngineEvent::Stopped);
    }

    fn pause(&mut self) {
        if !self.can_pause() {
            return;
        }
        if let Some(session) = &self.session {
            session.shared.paused.store(true, Ordering::Release);
            session.events.emit(EngineEvent::Paused);
        }
    }

    fn resume(&mut self) {
        if !self.is_paused() {
            return;
        }
        if let Some(session) = &self.session {
            session.shared.paused.store(false, Ordering::Release);
            session.events.emit(EngineEvent::Playing);
        }
    }

    fn can_pause(&self) -> bool {
        self.config.pausable && self.is_playing()
    }

    fn is_playing(&self) -> bool {
        self.running()
            .is_some_and(|s| !s.paused.load(Ordering::Acquire))
    }

    fn is_paused(&self) -> bool {
        self.running()
            .is_some_and(|s| s.paused.load(Ordering::Acquire))
    }

    fn volume(&self) -> u32 {
        self.volume
    }

    fn set_volume(&mut self, volume: u32) {
        self.volume = volume.min(100);
    }

    fn position(&self) -> f32 {
        let (Some(session), Some(total)) = (&self.session, self.config.total_frames) else {
            return 0.0;
        };
        if total == 0 {
            return 0.0;
        }
        let frame = session.shared.frame.load(Ordering::Acquire).min(total);
        (frame as f64 / total as f64) as f32
    }

    fn set_position(&mut self, position: f32) {
        let (Some(session), Some(total)) = (&self.session, self.config.total_frames) else {
            return;
        };
        let frame = (f64::from(position.clamp(0.0, 1.0)) * total as f64) as u64;
        session.shared.frame.store(frame, Ordering::Release);
    }

    fn video_tracks(&self) -> Result<Option<Vec<TrackInfo>>> {
        Ok(self.session.as_ref().map(|_| self.config.tracks.clone()))
    }

    fn current_video_track(&self) -> Option<i32> {
        self.session
            .as_ref()
            .map(|s| s.shared.selected.load(Ordering::Acquire))
    }

    fn set_video_track(&mut self, id: i32) -> Result<()> {
        if self.video_track(id).is_none() {
            return Err(PlayerError::TrackNotFound(id));
        }
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| PlayerError::Engine("no media loaded".into()))?;
        session.shared.selected.store(id, Ordering::Release);
        Ok(())
    }
}

impl Drop for SyntheticEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn decode_loop(
    config: &SyntheticConfig,
    shared: &Shared,
    callbacks: &dyn DecoderCallbacks,
    events: &EventSink,
) {
    events.emit(EngineEvent::Playing);
    for track in &config.tracks {
        events.emit(EngineEvent::StreamAdded(track.kind));
    }

    let mut current: Option<(i32, NegotiatedFormat)> = None;

    while !shared.shutdown.load(Ordering::Acquire) {
        if shared.paused.load(Ordering::Acquire) {
            std::thread::sleep(config.frame_interval);
            continue;
        }

        let selected = shared.selected.load(Ordering::Acquire);
        let Some(track) = config
            .tracks
            .iter()
            .find(|t| t.id == selected && t.kind == TrackKind::Video)
        else {
            std::thread::sleep(config.frame_interval);
            continue;
        };

        let format = match current {
            Some((id, format)) if id == track.id => format,
            _ => {
                let format = callbacks.negotiate_format(track.width, track.height);
                current = Some((track.id, format));
                format
            }
        };

        let frame = shared.frame.fetch_add(1, Ordering::AcqRel);
        if let Some(ptr) = callbacks.lock() {
            // SAFETY: a successful lock guarantees `pitch * lines` writable bytes
            // until the matching display, and no other thread writes them.
            unsafe { paint(ptr.as_ptr(), track.width, format, frame) };
        }
        callbacks.display();

        let produced = frame + 1;
        if config.fail_after_frames.is_some_and(|n| produced >= n) {
            log::warn!("Synthetic decoder failing after {produced} frames");
            events.emit(EngineEvent::Error);
            return;
        }
        if config.total_frames.is_some_and(|n| produced >= n) {
            events.emit(EngineEvent::EndReached);
            return;
        }

        std::thread::sleep(config.frame_interval);
    }
}

/// Moving gradient: red across, green down, blue cycling with the frame count.
///
/// Writes go through the raw pointer only; the render thread may be reading
/// the same slab, so no Rust reference to the picture is ever formed.
///
/// # Safety
///
/// `picture` must be valid for writes of `format.pitch * format.lines` bytes.
unsafe fn paint(picture: *mut u8, width: u32, format: NegotiatedFormat, frame: u64) {
    let pitch = format.pitch as usize;
    let pixels = (width as usize).min(pitch / BYTES_PER_PIXEL);
    let lines = format.lines.max(1) as usize;
    let blue = (frame % 256) as u8;

    for y in 0..format.lines as usize {
        let green = (y * 255 / lines) as u8;
        for x in 0..pixels {
            let red = (x * 255 / width.max(1) as usize) as u8;
            let px = [red, green, blue, 255];
            // SAFETY: `y < lines` and `x < pitch / 4`, so the 4 bytes at
            // `y * pitch + x * 4` lie inside the caller's picture.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    px.as_ptr(),
                    picture.add(y * pitch + x * BYTES_PER_PIXEL),
                    BYTES_PER_PIXEL,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use crossbeam_channel::Receiver;

    use super::*;
    use crate::engine::SessionEvent;
    use crate::player::callbacks::FrameCallbacks;
    use crate::player::exchange::FrameExchange;
    use crate::player::format::FormatNegotiator;
    use crate::player::frame_buffer::FrameBuffer;

    struct Rig {
        format: Arc<FormatNegotiator>,
        exchange: Arc<FrameExchange>,
        callbacks: Arc<dyn DecoderCallbacks>,
        sink: EventSink,
        events: Receiver<SessionEvent>,
    }

    fn rig() -> Rig {
        let buffer = Arc::new(FrameBuffer::new());
        let format = Arc::new(FormatNegotiator::new(Arc::clone(&buffer)));
        let exchange = Arc::new(FrameExchange::new(buffer));
        let callbacks = Arc::new(FrameCallbacks::new(
            Arc::clone(&format),
            Arc::clone(&exchange),
        ));
        let (tx, events) = crossbeam_channel::unbounded();
        Rig {
            format,
            exchange,
            callbacks,
            sink: EventSink::new(1, tx),
            events,
        }
    }

    fn fast(tracks: Vec<TrackInfo>) -> SyntheticConfig {
        SyntheticConfig {
            tracks,
            frame_interval: Duration::from_millis(1),
            ..SyntheticConfig::default()
        }
    }

    fn url() -> Url {
        Url::parse("synthetic://test").unwrap()
    }

    fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn wait_for_event(rx: &Receiver<SessionEvent>, wanted: EngineEvent) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            let event = rx.recv_timeout(left).expect("event not received");
            if event.event == wanted {
                return;
            }
        }
    }

    #[test]
    fn produces_pictures_at_first_track_geometry() {
        let rig = rig();
        let mut engine = SyntheticEngine::new(fast(vec![TrackInfo::video(4, 8, 4)]));
        engine.start(&url(), rig.callbacks.clone(), rig.sink.clone()).unwrap();

        wait_for(|| rig.exchange.is_dirty());
        assert_eq!(rig.format.descriptor().map(|f| (f.width, f.height)), Some((8, 4)));
        assert!(engine.is_playing());
        assert_eq!(engine.current_video_track(), Some(4));

        engine.stop();
        let mut out = vec![0u8; 8 * 4 * 4];
        assert!(rig.exchange.buffer().copy_with_pitch(&mut out, 8, 4, 8, 4, 32));
        assert_eq!(out[3], 255);

        let events: Vec<_> = rig.events.try_iter().map(|e| e.event).collect();
        assert_eq!(events[0], EngineEvent::Playing);
        assert_eq!(events[1], EngineEvent::StreamAdded(TrackKind::Video));
        assert_eq!(events.last(), Some(&EngineEvent::Stopped));
    }

    #[test]
    fn paints_opaque_gradient() {
        let format = NegotiatedFormat {
            chroma: *b"RGBA",
            pitch: 4 * 4 + 8,
            lines: 2,
        };
        let mut picture = vec![0u8; 24 * 2];
        // SAFETY: the vector holds exactly `pitch * lines` bytes.
        unsafe { paint(picture.as_mut_ptr(), 4, format, 7) };
        assert_eq!(&picture[..4], &[0, 0, 7, 255]);
        assert_eq!(picture[24 + 1], 127);
        // Row padding is left alone.
        assert!(picture[16..24].iter().all(|&b| b == 0));
    }

    #[test]
    fn switching_track_renegotiates() {
        let rig = rig();
        let mut engine = SyntheticEngine::new(fast(vec![
            TrackInfo::video(1, 16, 8),
            TrackInfo::video(2, 8, 4),
        ]));
        engine.start(&url(), rig.callbacks.clone(), rig.sink.clone()).unwrap();
        wait_for(|| rig.format.descriptor().is_some());

        assert!(matches!(
            engine.set_video_track(99),
            Err(PlayerError::TrackNotFound(99))
        ));
        engine.set_video_track(2).unwrap();
        wait_for(|| rig.format.descriptor().is_some_and(|f| f.width == 8));
        assert_eq!(rig.exchange.buffer().capacity(), 8 * 4 * 4);
    }

    #[test]
    fn end_and_error_after_frame_limits() {
        let rig = rig();
        let mut engine = SyntheticEngine::new(SyntheticConfig {
            total_frames: Some(5),
            ..fast(vec![TrackInfo::video(1, 4, 4)])
        });
        engine.start(&url(), rig.callbacks.clone(), rig.sink.clone()).unwrap();
        wait_for_event(&rig.events, EngineEvent::EndReached);
        wait_for(|| !engine.is_playing());
        assert!((engine.position() - 1.0).abs() < f32::EPSILON);

        let rig = self::rig();
        let mut engine = SyntheticEngine::new(SyntheticConfig {
            fail_after_frames: Some(2),
            ..fast(vec![TrackInfo::video(1, 4, 4)])
        });
        engine.start(&url(), rig.callbacks.clone(), rig.sink.clone()).unwrap();
        wait_for_event(&rig.events, EngineEvent::Error);
    }

    #[test]
    fn pause_and_resume() {
        let rig = rig();
        let mut engine = SyntheticEngine::new(fast(vec![TrackInfo::video(1, 4, 4)]));
        engine.start(&url(), rig.callbacks.clone(), rig.sink.clone()).unwrap();

        assert!(engine.can_pause());
        engine.pause();
        assert!(engine.is_paused());
        assert!(!engine.is_playing());
        assert!(!engine.can_pause());
        wait_for_event(&rig.events, EngineEvent::Paused);

        engine.resume();
        assert!(engine.is_playing());
        wait_for_event(&rig.events, EngineEvent::Playing);
    }

    #[test]
    fn not_pausable_when_configured() {
        let rig = rig();
        let mut engine = SyntheticEngine::new(SyntheticConfig {
            pausable: false,
            ..fast(vec![TrackInfo::video(1, 4, 4)])
        });
        engine.start(&url(), rig.callbacks.clone(), rig.sink.clone()).unwrap();
        engine.pause();
        assert!(engine.is_playing());
    }

    #[test]
    fn no_media_before_start() {
        let mut engine = SyntheticEngine::default();
        assert_eq!(engine.video_tracks().unwrap(), None);
        assert_eq!(engine.current_video_track(), None);
        assert!(engine.set_video_track(1).is_err());
        assert!(!engine.is_playing());
        engine.set_volume(250);
        assert_eq!(engine.volume(), 100);
    }

    #[test]
    fn stop_ends_callbacks() {
        let rig = rig();
        let mut engine = SyntheticEngine::new(fast(vec![TrackInfo::video(1, 4, 4)]));
        engine.start(&url(), rig.callbacks.clone(), rig.sink.clone()).unwrap();
        wait_for(|| rig.exchange.is_dirty());
        engine.stop();

        rig.exchange.take_ready();
        std::thread::sleep(Duration::from_millis(20));
        assert!(!rig.exchange.is_dirty());
        assert_eq!(engine.video_tracks().unwrap(), None);
    }

    #[test]
    fn rejects_media_without_video() {
        let rig = rig();
        let mut engine = SyntheticEngine::new(fast(Vec::new()));
        assert!(engine.start(&url(), rig.callbacks.clone(), rig.sink.clone()).is_err());
    }
}
