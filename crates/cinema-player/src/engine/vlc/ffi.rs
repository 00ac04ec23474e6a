//! Raw FFI definitions and runtime loader for libVLC 3.
//! Loads libvlc dynamically at runtime so no build-time SDK dependency is needed.

use std::ffi::c_void;
use std::os::raw::{c_char, c_float, c_int, c_uint};
use std::sync::OnceLock;

/// Opaque libVLC handles.
pub type VlcInstance = *mut c_void;
pub type VlcMediaPlayer = *mut c_void;
pub type VlcMedia = *mut c_void;
pub type VlcEventManager = *mut c_void;

// libvlc_event_e
pub const EVENT_PLAYING: c_int = 0x104;
pub const EVENT_PAUSED: c_int = 0x105;
pub const EVENT_STOPPED: c_int = 0x106;
pub const EVENT_END_REACHED: c_int = 0x109;
pub const EVENT_ENCOUNTERED_ERROR: c_int = 0x10a;
pub const EVENT_ES_ADDED: c_int = 0x114;

/// Events the engine subscribes to.
pub const SUBSCRIBED_EVENTS: [c_int; 6] = [
    EVENT_PLAYING,
    EVENT_PAUSED,
    EVENT_STOPPED,
    EVENT_END_REACHED,
    EVENT_ENCOUNTERED_ERROR,
    EVENT_ES_ADDED,
];

// libvlc_track_type_t
pub const TRACK_AUDIO: c_int = 0;
pub const TRACK_VIDEO: c_int = 1;
pub const TRACK_TEXT: c_int = 2;

// libvlc_state_t
pub const STATE_PAUSED: c_int = 4;

/// `libvlc_media_track_t`. The union member is a pointer to the
/// per-kind track description.
#[repr(C)]
pub struct MediaTrack {
    pub i_codec: u32,
    pub i_original_fourcc: u32,
    pub i_id: c_int,
    pub i_type: c_int,
    pub i_profile: c_int,
    pub i_level: c_int,
    pub u: *mut c_void,
    pub i_bitrate: c_uint,
    pub psz_language: *mut c_char,
    pub psz_description: *mut c_char,
}

/// Leading fields of `libvlc_video_track_t`. Only ever read through a pointer.
#[repr(C)]
pub struct VideoTrack {
    pub i_height: c_uint,
    pub i_width: c_uint,
}

/// Payload of `libvlc_MediaPlayerESAdded`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct EsChanged {
    pub i_type: c_int,
    pub i_id: c_int,
}

/// Leading fields of `libvlc_event_t`. Only ever read through a pointer.
#[repr(C)]
pub struct Event {
    pub i_type: c_int,
    pub p_obj: *mut c_void,
    pub es_changed: EsChanged,
}

pub type LockCb = unsafe extern "C" fn(*mut c_void, *mut *mut c_void) -> *mut c_void;
pub type UnlockCb = unsafe extern "C" fn(*mut c_void, *mut c_void, *const *mut c_void);
pub type DisplayCb = unsafe extern "C" fn(*mut c_void, *mut c_void);
pub type FormatSetupCb = unsafe extern "C" fn(
    *mut *mut c_void,
    *mut c_char,
    *mut c_uint,
    *mut c_uint,
    *mut c_uint,
    *mut c_uint,
) -> c_uint;
pub type FormatCleanupCb = unsafe extern "C" fn(*mut c_void);
pub type EventCb = unsafe extern "C" fn(*const Event, *mut c_void);

/// Type aliases for libVLC function signatures.
type FnNew = unsafe extern "C" fn(c_int, *const *const c_char) -> VlcInstance;
type FnRelease = unsafe extern "C" fn(VlcInstance);
type FnPlayerNew = unsafe extern "C" fn(VlcInstance) -> VlcMediaPlayer;
type FnPlayerRelease = unsafe extern "C" fn(VlcMediaPlayer);
type FnMediaNewLocation = unsafe extern "C" fn(VlcInstance, *const c_char) -> VlcMedia;
type FnMediaRelease = unsafe extern "C" fn(VlcMedia);
type FnSetMedia = unsafe extern "C" fn(VlcMediaPlayer, VlcMedia);
type FnGetMedia = unsafe extern "C" fn(VlcMediaPlayer) -> VlcMedia;
type FnPlay = unsafe extern "C" fn(VlcMediaPlayer) -> c_int;
type FnSetPause = unsafe extern "C" fn(VlcMediaPlayer, c_int);
type FnStop = unsafe extern "C" fn(VlcMediaPlayer);
type FnPlayerInt = unsafe extern "C" fn(VlcMediaPlayer) -> c_int;
type FnSetInt = unsafe extern "C" fn(VlcMediaPlayer, c_int) -> c_int;
type FnGetPosition = unsafe extern "C" fn(VlcMediaPlayer) -> c_float;
type FnSetPosition = unsafe extern "C" fn(VlcMediaPlayer, c_float);
type FnTracksGet = unsafe extern "C" fn(VlcMedia, *mut *mut *mut MediaTrack) -> c_uint;
type FnTracksRelease = unsafe extern "C" fn(*mut *mut MediaTrack, c_uint);
type FnVideoSetCallbacks =
    unsafe extern "C" fn(VlcMediaPlayer, LockCb, Option<UnlockCb>, DisplayCb, *mut c_void);
type FnVideoSetFormatCallbacks =
    unsafe extern "C" fn(VlcMediaPlayer, FormatSetupCb, Option<FormatCleanupCb>);
type FnEventManager = unsafe extern "C" fn(VlcMediaPlayer) -> VlcEventManager;
type FnEventAttach = unsafe extern "C" fn(VlcEventManager, c_int, EventCb, *mut c_void) -> c_int;
type FnEventDetach = unsafe extern "C" fn(VlcEventManager, c_int, EventCb, *mut c_void);

/// Loaded libVLC with resolved function pointers.
pub struct VlcLib {
    _lib: libloading::Library,
    pub new: FnNew,
    pub release: FnRelease,
    pub player_new: FnPlayerNew,
    pub player_release: FnPlayerRelease,
    pub media_new_location: FnMediaNewLocation,
    pub media_release: FnMediaRelease,
    pub set_media: FnSetMedia,
    pub get_media: FnGetMedia,
    pub play: FnPlay,
    pub set_pause: FnSetPause,
    pub stop: FnStop,
    pub can_pause: FnPlayerInt,
    pub is_playing: FnPlayerInt,
    pub get_state: FnPlayerInt,
    pub audio_get_volume: FnPlayerInt,
    pub audio_set_volume: FnSetInt,
    pub get_position: FnGetPosition,
    pub set_position: FnSetPosition,
    pub video_get_track: FnPlayerInt,
    pub video_set_track: FnSetInt,
    pub tracks_get: FnTracksGet,
    pub tracks_release: FnTracksRelease,
    pub video_set_callbacks: FnVideoSetCallbacks,
    pub video_set_format_callbacks: FnVideoSetFormatCallbacks,
    pub event_manager: FnEventManager,
    pub event_attach: FnEventAttach,
    pub event_detach: FnEventDetach,
}

// SAFETY: VlcLib only stores function pointers and a library handle, all thread-safe.
unsafe impl Send for VlcLib {}
// SAFETY: see above; nothing in here is mutated after loading.
unsafe impl Sync for VlcLib {}

/// Resolve `name` from `lib` or fail with a readable message.
macro_rules! symbol {
    ($lib:expr, $ty:ty, $name:literal) => {
        *$lib
            .get::<$ty>(concat!($name, "\0").as_bytes())
            .map_err(|e| format!("{} not found: {e}", $name))?
    };
}

impl VlcLib {
    /// Try to load the libVLC runtime library.
    pub fn load() -> Result<Self, String> {
        let mut diagnostics = Vec::new();
        let lib = load_vlc_library(&mut diagnostics)?;

        // SAFETY: each symbol is resolved with the signature documented in
        // the libVLC 3 headers.
        unsafe {
            Ok(Self {
                new: symbol!(lib, FnNew, "libvlc_new"),
                release: symbol!(lib, FnRelease, "libvlc_release"),
                player_new: symbol!(lib, FnPlayerNew, "libvlc_media_player_new"),
                player_release: symbol!(lib, FnPlayerRelease, "libvlc_media_player_release"),
                media_new_location: symbol!(lib, FnMediaNewLocation, "libvlc_media_new_location"),
                media_release: symbol!(lib, FnMediaRelease, "libvlc_media_release"),
                set_media: symbol!(lib, FnSetMedia, "libvlc_media_player_set_media"),
                get_media: symbol!(lib, FnGetMedia, "libvlc_media_player_get_media"),
                play: symbol!(lib, FnPlay, "libvlc_media_player_play"),
                set_pause: symbol!(lib, FnSetPause, "libvlc_media_player_set_pause"),
                stop: symbol!(lib, FnStop, "libvlc_media_player_stop"),
                can_pause: symbol!(lib, FnPlayerInt, "libvlc_media_player_can_pause"),
                is_playing: symbol!(lib, FnPlayerInt, "libvlc_media_player_is_playing"),
                get_state: symbol!(lib, FnPlayerInt, "libvlc_media_player_get_state"),
                audio_get_volume: symbol!(lib, FnPlayerInt, "libvlc_audio_get_volume"),
                audio_set_volume: symbol!(lib, FnSetInt, "libvlc_audio_set_volume"),
                get_position: symbol!(lib, FnGetPosition, "libvlc_media_player_get_position"),
                set_position: symbol!(lib, FnSetPosition, "libvlc_media_player_set_position"),
                video_get_track: symbol!(lib, FnPlayerInt, "libvlc_video_get_track"),
                video_set_track: symbol!(lib, FnSetInt, "libvlc_video_set_track"),
                tracks_get: symbol!(lib, FnTracksGet, "libvlc_media_tracks_get"),
                tracks_release: symbol!(lib, FnTracksRelease, "libvlc_media_tracks_release"),
                video_set_callbacks: symbol!(lib, FnVideoSetCallbacks, "libvlc_video_set_callbacks"),
                video_set_format_callbacks: symbol!(
                    lib,
                    FnVideoSetFormatCallbacks,
                    "libvlc_video_set_format_callbacks"
                ),
                event_manager: symbol!(lib, FnEventManager, "libvlc_media_player_event_manager"),
                event_attach: symbol!(lib, FnEventAttach, "libvlc_event_attach"),
                event_detach: symbol!(lib, FnEventDetach, "libvlc_event_detach"),
                _lib: lib,
            })
        }
    }
}

/// Cached libVLC availability result with search diagnostics.
struct VlcAvailability {
    available: bool,
    diagnostics: Vec<String>,
}

static VLC_AVAILABILITY: OnceLock<VlcAvailability> = OnceLock::new();

fn availability() -> &'static VlcAvailability {
    VLC_AVAILABILITY.get_or_init(|| {
        let mut diagnostics = Vec::new();
        match load_vlc_library(&mut diagnostics) {
            Ok(_) => {
                log::info!("libVLC runtime library found");
                VlcAvailability {
                    available: true,
                    diagnostics,
                }
            }
            Err(e) => {
                log::info!("libVLC runtime not available: {e}");
                VlcAvailability {
                    available: false,
                    diagnostics,
                }
            }
        }
    })
}

/// Check whether the libVLC runtime is available (cached).
pub fn vlc_available() -> bool {
    availability().available
}

/// Return the paths searched during libVLC discovery.
pub fn vlc_search_diagnostics() -> &'static [String] {
    availability().diagnostics.as_slice()
}

/// Try to load libVLC from a specific directory.
fn try_load_from_dir(
    dir: &std::path::Path,
    diagnostics: &mut Vec<String>,
) -> Option<libloading::Library> {
    for name in platform_lib_names() {
        let full = dir.join(name);
        // SAFETY: loading libVLC runs only its ELF/Mach-O/PE initialisers,
        // which have no preconditions on our side.
        match unsafe { libloading::Library::new(&full) } {
            Ok(lib) => {
                log::info!("libVLC loaded from {}", full.display());
                return Some(lib);
            }
            Err(e) => {
                log::debug!("libVLC: {} failed: {e}", full.display());
                diagnostics.push(format!("{}", full.display()));
            }
        }
    }
    None
}

/// Try to find and load the libVLC shared library.
/// Appends searched paths to `diagnostics`.
fn load_vlc_library(diagnostics: &mut Vec<String>) -> Result<libloading::Library, String> {
    // 1. Explicit override.
    if let Ok(folder) = std::env::var("CINEMA_LIBVLC_DIR") {
        diagnostics.push(format!("CINEMA_LIBVLC_DIR={folder}"));
        if let Some(lib) = try_load_from_dir(std::path::Path::new(&folder), diagnostics) {
            return Ok(lib);
        }
    }

    // 2. Well-known install locations.
    #[cfg(target_os = "windows")]
    for path in &[
        r"C:\Program Files\VideoLAN\VLC",
        r"C:\Program Files (x86)\VideoLAN\VLC",
    ] {
        diagnostics.push(path.to_string());
        if let Some(lib) = try_load_from_dir(std::path::Path::new(path), diagnostics) {
            return Ok(lib);
        }
    }

    #[cfg(target_os = "macos")]
    for path in &["/Applications/VLC.app/Contents/MacOS/lib", "/opt/homebrew/lib"] {
        diagnostics.push(path.to_string());
        if let Some(lib) = try_load_from_dir(std::path::Path::new(path), diagnostics) {
            return Ok(lib);
        }
    }

    // 3. Bare library names via system linker (LD_LIBRARY_PATH, /usr/lib, etc.).
    diagnostics.push("system linker search".to_string());
    for name in platform_lib_names() {
        // SAFETY: as in `try_load_from_dir`.
        match unsafe { libloading::Library::new(name) } {
            Ok(lib) => return Ok(lib),
            Err(e) => {
                log::debug!("libVLC: system linker {name} failed: {e}");
            }
        }
    }

    Err(format!(
        "libVLC not found. Install VLC 3 from https://www.videolan.org/\n\
         Searched: {}",
        diagnostics.join(", ")
    ))
}

fn platform_lib_names() -> &'static [&'static str] {
    #[cfg(target_os = "linux")]
    {
        &["libvlc.so.5", "libvlc.so"]
    }
    #[cfg(target_os = "macos")]
    {
        &["libvlc.dylib", "libvlc.5.dylib"]
    }
    #[cfg(target_os = "windows")]
    {
        &["libvlc.dll"]
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        &[]
    }
}
