use thiserror::Error;

/// Errors surfaced by the player core.
///
/// None of these ever cross the decoder-callback boundary: callbacks report
/// failure through sentinels and the log instead.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("invalid media locator '{0}'")]
    InvalidLocator(String),
    #[error("decoder engine unavailable: {0}")]
    EngineUnavailable(String),
    #[error("decoder engine error: {0}")]
    Engine(String),
    #[error("video track {0} not found")]
    TrackNotFound(i32),
    #[error("texture upload failed: {0}")]
    Upload(String),
    #[error("GPU unavailable: {0}")]
    Gpu(String),
    #[error("settings I/O failed: {0}")]
    SettingsIo(#[from] std::io::Error),
    #[error("settings format invalid: {0}")]
    SettingsFormat(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PlayerError>;
