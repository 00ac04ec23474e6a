use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Persisted player options. Every field falls back to its default when
/// missing from the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSettings {
    /// Let the engine use hardware decoding when it can.
    pub hardware_acceleration: bool,
    pub network_caching_ms: u32,
    /// Upper bound for adaptive streams.
    pub max_width: u32,
    pub max_height: u32,
    pub preferred_resolution: u32,
    /// Passed to the engine verbatim, after the generated options.
    pub extra_engine_args: Vec<String>,
    /// 0–100.
    pub volume: u32,
    pub last_url: Option<String>,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            hardware_acceleration: true,
            network_caching_ms: 1000,
            max_width: 1920,
            max_height: 1080,
            preferred_resolution: 1080,
            extra_engine_args: Vec::new(),
            volume: 100,
            last_url: None,
        }
    }
}

impl PlayerSettings {
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("cinema").join("settings.json")
    }

    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(mut settings) => {
                    settings.set_volume(settings.volume);
                    log::info!("Loaded player settings from {}", path.display());
                    settings
                }
                Err(e) => {
                    log::warn!("Failed to parse player settings: {e}");
                    Self::default()
                }
            },
            Err(_) => {
                log::info!("No player settings found, using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self) {
        let path = Self::config_path();
        if let Err(e) = self.save_to(&path) {
            log::error!("Failed to save player settings: {e}");
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        log::debug!("Saved player settings to {}", path.display());
        Ok(())
    }

    pub fn set_volume(&mut self, volume: u32) {
        self.volume = volume.min(100);
    }

    /// Startup options for the decoding engine.
    pub fn engine_args(&self) -> Vec<String> {
        let mut args = vec![
            "--no-osd".to_string(),
            format!("--network-caching={}", self.network_caching_ms),
            "--adaptive-logic=highest".to_string(),
            format!("--adaptive-maxwidth={}", self.max_width),
            format!("--adaptive-maxheight={}", self.max_height),
            format!("--preferred-resolution={}", self.preferred_resolution),
        ];
        if self.hardware_acceleration {
            args.push("--avcodec-hw=any".to_string());
        }
        args.extend(self.extra_engine_args.iter().cloned());
        args
    }
}
