//! Media position handshake.
//!
//! DESIGN
//! ======
//! When a video layer mounts on a consumer it asks, once, where playback is:
//!
//! 1. consumer sends `video:request(layer)`
//! 2. relay forwards it to the primary controller only, tagged with the
//!    consumer's connection id
//! 3. the primary reads its own player and answers `video:response`
//! 4. relay forwards the answer to that consumer only, which seeks
//!
//! Exactly one round trip per mount, no periodic re-sync. An unanswered
//! request simply leaves the consumer playing from zero.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::protocol::Command;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Background,
    Foreground,
}

impl Layer {
    pub const ALL: [Layer; 2] = [Layer::Background, Layer::Foreground];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Background => "background",
            Self::Foreground => "foreground",
        }
    }

    fn slot(self) -> usize {
        match self {
            Self::Background => 0,
            Self::Foreground => 1,
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown video layer: {0}")]
pub struct UnknownLayer(pub String);

impl FromStr for Layer {
    type Err = UnknownLayer;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Layer::ALL
            .into_iter()
            .find(|layer| layer.as_str() == s)
            .ok_or_else(|| UnknownLayer(s.to_owned()))
    }
}

/// Playback position of one layer.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PlaybackState {
    pub is_playing: bool,
    /// Seconds from the start of the media.
    pub time: f64,
}

impl PlaybackState {
    /// A position a player can seek to.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.time.is_finite() && self.time >= 0.0
    }
}

/// Local video element(s) of a client surface.
pub trait MediaPlayer {
    /// Current position of `layer`, `None` when nothing is loaded there.
    fn playback(&self, layer: Layer) -> Option<PlaybackState>;

    /// Jump `layer` to `state`.
    fn seek(&mut self, layer: Layer, state: PlaybackState);
}

/// Player for surfaces without video.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoMedia;

impl MediaPlayer for NoMedia {
    fn playback(&self, _layer: Layer) -> Option<PlaybackState> {
        None
    }

    fn seek(&mut self, _layer: Layer, _state: PlaybackState) {}
}

/// One-shot request bookkeeping, one slot per layer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MediaHandshake {
    pending: [bool; 2],
}

impl MediaHandshake {
    /// A layer mounted. Returns the request to send unless one is already
    /// outstanding for that layer.
    pub fn mount(&mut self, layer: Layer) -> Option<Command> {
        let slot = &mut self.pending[layer.slot()];
        if *slot {
            return None;
        }
        *slot = true;
        Some(Command::RequestVideo { layer })
    }

    /// A layer unmounted; a late answer for it is ignored.
    pub fn unmount(&mut self, layer: Layer) {
        self.pending[layer.slot()] = false;
    }

    #[must_use]
    pub fn is_pending(&self, layer: Layer) -> bool {
        self.pending[layer.slot()]
    }

    /// Consume the answer for `layer`. Returns `false` for answers nobody is
    /// waiting for and for unusable positions.
    pub fn accept(&mut self, layer: Layer, state: PlaybackState) -> bool {
        let slot = &mut self.pending[layer.slot()];
        if !*slot || !state.is_valid() {
            return false;
        }
        *slot = false;
        true
    }

    /// Producer side: answer a forwarded request from the local player.
    /// A layer with nothing loaded answers stopped at zero.
    #[must_use]
    pub fn answer(player: &impl MediaPlayer, layer: Layer, consumer: &str) -> Command {
        let state = player
            .playback(layer)
            .filter(PlaybackState::is_valid)
            .unwrap_or_default();
        Command::RespondVideo {
            layer,
            consumer: consumer.to_owned(),
            is_playing: state.is_playing,
            time: state.time,
        }
    }
}

#[cfg(test)]
#[path = "media_test.rs"]
mod tests;
