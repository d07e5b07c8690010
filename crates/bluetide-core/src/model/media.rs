use serde::{Deserialize, Serialize};

use crate::address::Address;

/// Playback status reported by the provider's media player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MediaStatus {
    Playing,
    Paused,
    ForwardSeek,
    ReverseSeek,
    #[default]
    Stopped,
}

impl MediaStatus {
    pub fn is_playing(&self) -> bool {
        matches!(self, Self::Playing | Self::ForwardSeek | Self::ReverseSeek)
    }
}

/// Properties of the currently loaded track.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackData {
    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub album: String,

    #[serde(default)]
    pub artist: String,

    /// Track length in milliseconds; 0 when unknown.
    #[serde(default)]
    pub duration: u32,

    #[serde(default)]
    pub track_number: u32,

    #[serde(default)]
    pub total_tracks: u32,
}

/// Media player state for a device. Used for both full and update
/// events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaData {
    pub address: Address,

    #[serde(default)]
    pub status: MediaStatus,

    /// Playback position in milliseconds. Never exceeds the track
    /// duration when the duration is known.
    #[serde(default)]
    pub position: u32,

    #[serde(default, flatten)]
    pub track: TrackData,
}

impl MediaData {
    /// Clamp `position` to the track duration, when known.
    pub fn clamp_position(&mut self) {
        if self.track.duration > 0 && self.position > self.track.duration {
            self.position = self.track.duration;
        }
    }
}

/// A selectable audio profile exposed by the platform audio backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioProfile {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Backend-assigned index of the owning sound card.
    #[serde(default)]
    pub index: u32,

    /// Whether this profile is currently selected.
    #[serde(default)]
    pub active: bool,
}
