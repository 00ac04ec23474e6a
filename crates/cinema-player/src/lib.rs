//! Video frame exchange and playback control.
//!
//! A decoder engine writes raw RGBA pictures into a shared [`FrameBuffer`]
//! from its own threads; once per render tick [`VideoPlayer::update`] moves
//! the newest complete picture into a presentable texture and reports what
//! changed through [`PlayerEvent`]s.
//!
//! [`FrameBuffer`]: player::frame_buffer::FrameBuffer

pub mod engine;
pub mod error;
pub mod player;
pub mod settings;
pub mod surface;

pub use engine::synthetic::{SyntheticConfig, SyntheticEngine};
#[cfg(feature = "vlc")]
pub use engine::vlc::VlcEngine;
pub use engine::{DecoderCallbacks, DecoderEngine, EngineEvent, TrackInfo, TrackKind};
pub use error::{PlayerError, Result};
pub use player::VideoPlayer;
pub use player::quality::VideoQuality;
pub use player::types::{PlaybackState, PlayerEvent};
pub use settings::PlayerSettings;
pub use surface::gpu::{WgpuSurface, WgpuTexture};
pub use surface::{CpuSurface, CpuTexture, VideoSurface, VideoTexture};
