//! libVLC backend.
//!
//! Each `start` creates a fresh media player whose video output is routed
//! through the `extern "C"` trampolines below into the controller's
//! [`DecoderCallbacks`]. The trampolines never unwind and never block.

pub mod ffi;

pub use ffi::{vlc_available, vlc_search_diagnostics};

use std::ffi::{CString, c_void};
use std::os::raw::{c_char, c_int, c_uint};
use std::ptr;
use std::sync::Arc;

use url::Url;

use self::ffi::{MediaTrack, VideoTrack, VlcEventManager, VlcInstance, VlcLib, VlcMediaPlayer};
use super::{DecoderCallbacks, DecoderEngine, EngineEvent, EventSink, TrackInfo, TrackKind};
use crate::error::{PlayerError, Result};

/// Opaque handed to the video callbacks.
struct CallbackContext {
    callbacks: Arc<dyn DecoderCallbacks>,
}

/// Opaque handed to the event callback.
struct EventContext {
    sink: EventSink,
}

/// Everything owned by one `start` call.
struct VlcSession {
    player: VlcMediaPlayer,
    events: VlcEventManager,
    callbacks: *mut CallbackContext,
    sink: *mut EventContext,
}

pub struct VlcEngine {
    lib: VlcLib,
    instance: VlcInstance,
    session: Option<VlcSession>,
    /// Applied to every new session; libVLC forgets it with the player.
    volume: u32,
}

impl VlcEngine {
    /// Load libVLC and create an instance with the given options
    /// (see `PlayerSettings::engine_args`).
    pub fn new(args: &[String]) -> Result<Self> {
        let lib = VlcLib::load().map_err(PlayerError::EngineUnavailable)?;

        let c_args = args
            .iter()
            .map(|a| CString::new(a.as_str()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| PlayerError::Engine(format!("invalid engine option: {e}")))?;
        let argv: Vec<*const c_char> = c_args.iter().map(|a| a.as_ptr()).collect();

        // SAFETY: `argv` holds `argv.len()` valid C strings that outlive the call.
        let instance = unsafe { (lib.new)(argv.len() as c_int, argv.as_ptr()) };
        if instance.is_null() {
            return Err(PlayerError::EngineUnavailable("libvlc_new failed".into()));
        }
        log::info!("libVLC initialized: {}", args.join(" "));

        Ok(Self {
            lib,
            instance,
            session: None,
            volume: 100,
        })
    }

    fn player(&self) -> Option<VlcMediaPlayer> {
        self.session.as_ref().map(|s| s.player)
    }
}

impl DecoderEngine for VlcEngine {
    fn start(
        &mut self,
        locator: &Url,
        callbacks: Arc<dyn DecoderCallbacks>,
        events: EventSink,
    ) -> Result<()> {
        self.stop();

        let location = CString::new(locator.as_str())
            .map_err(|_| PlayerError::InvalidLocator(locator.to_string()))?;

        // SAFETY: `instance` is live for the engine's lifetime.
        let player = unsafe { (self.lib.player_new)(self.instance) };
        if player.is_null() {
            return Err(PlayerError::Engine("libvlc_media_player_new failed".into()));
        }

        let callbacks = Box::into_raw(Box::new(CallbackContext { callbacks }));
        let sink = Box::into_raw(Box::new(EventContext { sink: events }));

        // SAFETY: `player` was just created; both opaques stay alive until
        // `stop` has stopped and released the player.
        let manager = unsafe {
            (self.lib.video_set_format_callbacks)(player, format_setup, None);
            (self.lib.video_set_callbacks)(
                player,
                lock_picture,
                None,
                display_picture,
                callbacks.cast(),
            );
            let manager = (self.lib.event_manager)(player);
            for kind in ffi::SUBSCRIBED_EVENTS {
                if (self.lib.event_attach)(manager, kind, on_event, sink.cast()) != 0 {
                    log::warn!("Failed to attach libVLC event {kind:#x}");
                }
            }
            manager
        };

        // From here on `stop` owns the cleanup.
        self.session = Some(VlcSession {
            player,
            events: manager,
            callbacks,
            sink,
        });

        // SAFETY: `location` is a valid C string; the media reference is
        // released after the player took its own.
        let started = unsafe {
            let media = (self.lib.media_new_location)(self.instance, location.as_ptr());
            if media.is_null() {
                false
            } else {
                (self.lib.set_media)(player, media);
                (self.lib.media_release)(media);
                (self.lib.audio_set_volume)(player, self.volume as c_int);
                (self.lib.play)(player) == 0
            }
        };

        if !started {
            self.stop();
            return Err(PlayerError::Engine(format!("libVLC refused to play {locator}")));
        }
        log::debug!("libVLC playing {locator}");
        Ok(())
    }

    fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        // SAFETY: stop is synchronous in libVLC 3: once it returns no video
        // callback runs for this player, so the opaques can be freed after
        // the player is released. Event callbacks are detached first.
        unsafe {
            (self.lib.stop)(session.player);
            for kind in ffi::SUBSCRIBED_EVENTS {
                (self.lib.event_detach)(session.events, kind, on_event, session.sink.cast());
            }
            (self.lib.player_release)(session.player);
            drop(Box::from_raw(session.callbacks));
            drop(Box::from_raw(session.sink));
        }
        log::debug!("libVLC session released");
    }

    fn pause(&mut self) {
        if let Some(player) = self.player() {
            // SAFETY: `player` is live while the session is.
            unsafe { (self.lib.set_pause)(player, 1) };
        }
    }

    fn resume(&mut self) {
        if let Some(player) = self.player() {
            // SAFETY: as above.
            unsafe { (self.lib.set_pause)(player, 0) };
        }
    }

    fn can_pause(&self) -> bool {
        // SAFETY: as above.
        self.player()
            .is_some_and(|p| unsafe { (self.lib.can_pause)(p) } != 0)
    }

    fn is_playing(&self) -> bool {
        // SAFETY: as above.
        self.player()
            .is_some_and(|p| unsafe { (self.lib.is_playing)(p) } != 0)
    }

    fn is_paused(&self) -> bool {
        // SAFETY: as above.
        self.player()
            .is_some_and(|p| unsafe { (self.lib.get_state)(p) } == ffi::STATE_PAUSED)
    }

    fn volume(&self) -> u32 {
        // SAFETY: as above.
        let reported = self
            .player()
            .map_or(-1, |p| unsafe { (self.lib.audio_get_volume)(p) });
        // -1 until an audio output exists.
        u32::try_from(reported).unwrap_or(self.volume)
    }

    fn set_volume(&mut self, volume: u32) {
        self.volume = volume.min(100);
        if let Some(player) = self.player() {
            // SAFETY: as above.
            unsafe { (self.lib.audio_set_volume)(player, self.volume as c_int) };
        }
    }

    fn position(&self) -> f32 {
        // SAFETY: as above.
        self.player()
            .map_or(0.0, |p| unsafe { (self.lib.get_position)(p) })
            .max(0.0)
    }

    fn set_position(&mut self, position: f32) {
        if let Some(player) = self.player() {
            // SAFETY: as above.
            unsafe { (self.lib.set_position)(player, position) };
        }
    }

    fn video_tracks(&self) -> Result<Option<Vec<TrackInfo>>> {
        let Some(player) = self.player() else {
            return Ok(None);
        };

        // SAFETY: `get_media` returns a retained reference (or null) that is
        // released below; the track array is read only up to `count` and
        // released with the same count.
        unsafe {
            let media = (self.lib.get_media)(player);
            if media.is_null() {
                return Ok(None);
            }

            let mut tracks: *mut *mut MediaTrack = ptr::null_mut();
            let count = (self.lib.tracks_get)(media, &mut tracks);
            let mut out = Vec::with_capacity(count as usize);
            if !tracks.is_null() {
                for i in 0..count as usize {
                    if let Some(track) = (*tracks.add(i)).as_ref() {
                        out.push(track_info(track));
                    }
                }
                (self.lib.tracks_release)(tracks, count);
            }
            (self.lib.media_release)(media);
            Ok(Some(out))
        }
    }

    fn current_video_track(&self) -> Option<i32> {
        let player = self.player()?;
        // SAFETY: as above.
        let id = unsafe { (self.lib.video_get_track)(player) };
        (id >= 0).then_some(id)
    }

    fn set_video_track(&mut self, id: i32) -> Result<()> {
        let player = self
            .player()
            .ok_or_else(|| PlayerError::Engine("no media loaded".into()))?;
        // SAFETY: as above.
        if unsafe { (self.lib.video_set_track)(player, id) } != 0 {
            return Err(PlayerError::TrackNotFound(id));
        }
        Ok(())
    }
}

impl Drop for VlcEngine {
    fn drop(&mut self) {
        self.stop();
        // SAFETY: no player created from this instance is left.
        unsafe { (self.lib.release)(self.instance) };
        log::info!("libVLC released");
    }
}

fn track_kind(raw: c_int) -> TrackKind {
    match raw {
        ffi::TRACK_AUDIO => TrackKind::Audio,
        ffi::TRACK_VIDEO => TrackKind::Video,
        ffi::TRACK_TEXT => TrackKind::Text,
        _ => TrackKind::Unknown,
    }
}

/// # Safety
/// For video tracks `track.u` must be null or point to a `libvlc_video_track_t`.
unsafe fn track_info(track: &MediaTrack) -> TrackInfo {
    let kind = track_kind(track.i_type);
    let (width, height) = if kind == TrackKind::Video {
        // SAFETY: guaranteed by the caller.
        unsafe { track.u.cast::<VideoTrack>().as_ref() }.map_or((0, 0), |v| (v.i_width, v.i_height))
    } else {
        (0, 0)
    };
    TrackInfo {
        id: track.i_id,
        kind,
        width,
        height,
    }
}

fn engine_event(kind: c_int, es_type: c_int) -> Option<EngineEvent> {
    Some(match kind {
        ffi::EVENT_PLAYING => EngineEvent::Playing,
        ffi::EVENT_PAUSED => EngineEvent::Paused,
        ffi::EVENT_STOPPED => EngineEvent::Stopped,
        ffi::EVENT_END_REACHED => EngineEvent::EndReached,
        ffi::EVENT_ENCOUNTERED_ERROR => EngineEvent::Error,
        ffi::EVENT_ES_ADDED => EngineEvent::StreamAdded(track_kind(es_type)),
        _ => return None,
    })
}

// --- libVLC trampolines ---

unsafe extern "C" fn format_setup(
    opaque: *mut *mut c_void,
    chroma: *mut c_char,
    width: *mut c_uint,
    height: *mut c_uint,
    pitches: *mut c_uint,
    lines: *mut c_uint,
) -> c_uint {
    // SAFETY: libVLC passes valid pointers; `*opaque` is the `CallbackContext`
    // registered with this player, alive until the player is released.
    unsafe {
        let Some(ctx) = (*opaque).cast::<CallbackContext>().as_ref() else {
            return 0;
        };
        let (w, h) = (*width, *height);
        if w == 0 || h == 0 {
            log::debug!("libVLC offered an empty {w}x{h} format");
            return 0;
        }

        let negotiated = ctx.callbacks.negotiate_format(w, h);
        if negotiated.pitch == 0 || negotiated.lines == 0 {
            return 0;
        }
        ptr::copy_nonoverlapping(negotiated.chroma.as_ptr().cast::<c_char>(), chroma, 4);
        *pitches = negotiated.pitch;
        *lines = negotiated.lines;
    }
    // One picture buffer.
    1
}

unsafe extern "C" fn lock_picture(opaque: *mut c_void, planes: *mut *mut c_void) -> *mut c_void {
    // SAFETY: `opaque` is our `CallbackContext`; `planes` has room for at
    // least one plane pointer.
    unsafe {
        let plane = opaque
            .cast::<CallbackContext>()
            .as_ref()
            .and_then(|ctx| ctx.callbacks.lock())
            .map_or(ptr::null_mut(), |p| p.as_ptr().cast::<c_void>());
        *planes = plane;
    }
    ptr::null_mut()
}

unsafe extern "C" fn display_picture(opaque: *mut c_void, _picture: *mut c_void) {
    // SAFETY: `opaque` is our `CallbackContext`.
    if let Some(ctx) = unsafe { opaque.cast::<CallbackContext>().as_ref() } {
        ctx.callbacks.display();
    }
}

unsafe extern "C" fn on_event(event: *const ffi::Event, opaque: *mut c_void) {
    // SAFETY: `event` is valid for the duration of the callback and `opaque`
    // is the `EventContext` attached with it. The ES payload is only read for
    // ES events, where that union member is active.
    unsafe {
        let (Some(event), Some(ctx)) = (event.as_ref(), opaque.cast::<EventContext>().as_ref())
        else {
            return;
        };
        let es_type = if event.i_type == ffi::EVENT_ES_ADDED {
            event.es_changed.i_type
        } else {
            -1
        };
        if let Some(mapped) = engine_event(event.i_type, es_type) {
            ctx.sink.emit(mapped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::callbacks::FrameCallbacks;
    use crate::player::exchange::FrameExchange;
    use crate::player::format::{CHROMA_RGBA, FormatNegotiator};
    use crate::player::frame_buffer::FrameBuffer;

    fn context() -> (Box<CallbackContext>, Arc<FrameExchange>) {
        let buffer = Arc::new(FrameBuffer::new());
        let format = Arc::new(FormatNegotiator::new(Arc::clone(&buffer)));
        let exchange = Arc::new(FrameExchange::new(buffer));
        let callbacks = Arc::new(FrameCallbacks::new(format, Arc::clone(&exchange)));
        (Box::new(CallbackContext { callbacks }), exchange)
    }

    #[test]
    fn maps_player_events() {
        assert_eq!(engine_event(ffi::EVENT_PLAYING, -1), Some(EngineEvent::Playing));
        assert_eq!(engine_event(ffi::EVENT_END_REACHED, -1), Some(EngineEvent::EndReached));
        assert_eq!(
            engine_event(ffi::EVENT_ENCOUNTERED_ERROR, -1),
            Some(EngineEvent::Error)
        );
        assert_eq!(
            engine_event(ffi::EVENT_ES_ADDED, ffi::TRACK_VIDEO),
            Some(EngineEvent::StreamAdded(TrackKind::Video))
        );
        assert_eq!(
            engine_event(ffi::EVENT_ES_ADDED, 42),
            Some(EngineEvent::StreamAdded(TrackKind::Unknown))
        );
        assert_eq!(engine_event(0x10b, -1), None);
    }

    #[test]
    fn video_track_geometry_read_from_union() {
        let mut video = VideoTrack {
            i_height: 720,
            i_width: 1280,
        };
        let track = MediaTrack {
            i_codec: 0,
            i_original_fourcc: 0,
            i_id: 3,
            i_type: ffi::TRACK_VIDEO,
            i_profile: 0,
            i_level: 0,
            u: (&raw mut video).cast(),
            i_bitrate: 0,
            psz_language: ptr::null_mut(),
            psz_description: ptr::null_mut(),
        };
        // SAFETY: `u` points at a live video track.
        assert_eq!(unsafe { track_info(&track) }, TrackInfo::video(3, 1280, 720));

        let audio = MediaTrack {
            i_type: ffi::TRACK_AUDIO,
            u: ptr::null_mut(),
            ..track
        };
        // SAFETY: audio tracks never dereference `u`.
        let info = unsafe { track_info(&audio) };
        assert_eq!((info.kind, info.width, info.height), (TrackKind::Audio, 0, 0));
    }

    #[test]
    fn trampolines_drive_the_exchange() {
        let (ctx, exchange) = context();
        let mut opaque = Box::into_raw(ctx).cast::<c_void>();
        let mut chroma = [0 as c_char; 4];
        let (mut w, mut h, mut pitch, mut lines) = (64, 32, 0, 0);

        // SAFETY: every pointer refers to a live local; `opaque` is a
        // `CallbackContext` reclaimed at the end of the test.
        unsafe {
            let buffers = format_setup(
                &mut opaque,
                chroma.as_mut_ptr(),
                &mut w,
                &mut h,
                &mut pitch,
                &mut lines,
            );
            assert_eq!(buffers, 1);
            assert_eq!(chroma.map(|c| c as u8), CHROMA_RGBA);
            assert_eq!((pitch, lines), (256, 32));

            let mut plane: *mut c_void = ptr::null_mut();
            lock_picture(opaque, &mut plane);
            assert!(!plane.is_null());
            display_picture(opaque, ptr::null_mut());
            assert!(exchange.is_dirty());

            drop(Box::from_raw(opaque.cast::<CallbackContext>()));
        }
    }

    #[test]
    fn empty_format_is_refused() {
        let (ctx, exchange) = context();
        let mut opaque = Box::into_raw(ctx).cast::<c_void>();
        let mut chroma = [0 as c_char; 4];
        let (mut w, mut h, mut pitch, mut lines) = (0, 32, 0, 0);

        // SAFETY: as above.
        unsafe {
            let buffers = format_setup(
                &mut opaque,
                chroma.as_mut_ptr(),
                &mut w,
                &mut h,
                &mut pitch,
                &mut lines,
            );
            assert_eq!(buffers, 0);

            // No buffer yet: the plane is the null sentinel and display is ignored.
            let mut plane: *mut c_void = ptr::null_mut();
            lock_picture(opaque, &mut plane);
            assert!(plane.is_null());
            display_picture(opaque, ptr::null_mut());
            assert!(!exchange.is_dirty());

            drop(Box::from_raw(opaque.cast::<CallbackContext>()));
        }
    }
}
