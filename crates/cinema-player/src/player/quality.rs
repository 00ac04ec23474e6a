use std::collections::HashSet;
use std::fmt;

use crate::engine::{TrackInfo, TrackKind};

/// One selectable video track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoQuality {
    pub track_id: i32,
    pub width: u32,
    pub height: u32,
    pub label: String,
    pub selected: bool,
}

impl VideoQuality {
    /// Human-readable name derived from the picture height.
    pub fn label_for(_width: u32, height: u32) -> String {
        match height {
            h if h >= 2160 => "4K".to_string(),
            h if h >= 1440 => "1440p".to_string(),
            h if h >= 1080 => "1080p".to_string(),
            h if h >= 720 => "720p".to_string(),
            h if h >= 480 => "480p".to_string(),
            h if h >= 360 => "360p".to_string(),
            0 => "Auto".to_string(),
            h => format!("{h}p"),
        }
    }

    fn from_track(track: &TrackInfo, current: Option<i32>) -> Self {
        Self {
            track_id: track.id,
            width: track.width,
            height: track.height,
            label: Self::label_for(track.width, track.height),
            selected: current == Some(track.id),
        }
    }
}

impl fmt::Display for VideoQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Build the quality list from the engine's tracks: video only, highest
/// resolution first, one entry per label (the first, highest-bitrate one wins).
pub fn build_quality_list(tracks: &[TrackInfo], current: Option<i32>) -> Vec<VideoQuality> {
    let mut qualities: Vec<VideoQuality> = tracks
        .iter()
        .filter(|t| t.kind == TrackKind::Video)
        .map(|t| VideoQuality::from_track(t, current))
        .collect();

    // Stable: equal resolutions keep the engine's order.
    qualities.sort_by(|a, b| b.height.cmp(&a.height).then(b.width.cmp(&a.width)));

    let mut seen = HashSet::new();
    qualities.retain(|q| seen.insert(q.label.clone()));
    qualities
}

pub fn selected_index(qualities: &[VideoQuality]) -> Option<usize> {
    qualities.iter().position(|q| q.selected)
}

/// Lists count as unchanged when track ids and heights match position by
/// position. Width-only differences are deliberately not a change.
pub fn same_tracks(a: &[VideoQuality], b: &[VideoQuality]) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(x, y)| x.track_id == y.track_id && x.height == y.height)
}
