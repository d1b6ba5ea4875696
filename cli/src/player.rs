//! Wall-clock media player for terminal surfaces.
//!
//! There is no decoder behind it: a loaded layer is a clock that starts at
//! the seeked offset and advances in real time while playing. That is
//! enough to answer and apply video position handshakes.

use std::collections::HashMap;
use std::time::Instant;

use control::media::{Layer, MediaPlayer, PlaybackState};

#[derive(Clone, Copy, Debug)]
struct Track {
    anchor: Instant,
    offset: f64,
    playing: bool,
}

impl Track {
    fn at(state: PlaybackState) -> Self {
        Self { anchor: Instant::now(), offset: state.time, playing: state.is_playing }
    }

    fn time(&self) -> f64 {
        if self.playing { self.offset + self.anchor.elapsed().as_secs_f64() } else { self.offset }
    }
}

#[derive(Debug, Default)]
pub struct ClockPlayer {
    tracks: HashMap<Layer, Track>,
}

impl ClockPlayer {
    /// Load `layer` at zero, playing.
    pub fn load(&mut self, layer: Layer) {
        self.tracks.insert(layer, Track::at(PlaybackState { is_playing: true, time: 0.0 }));
    }

    /// Pause or resume `layer`, keeping its position. Returns the new
    /// playing state, `None` if nothing is loaded.
    pub fn toggle_pause(&mut self, layer: Layer) -> Option<bool> {
        let track = self.tracks.get_mut(&layer)?;
        *track = Track::at(PlaybackState { is_playing: !track.playing, time: track.time() });
        Some(track.playing)
    }
}

impl MediaPlayer for ClockPlayer {
    fn playback(&self, layer: Layer) -> Option<PlaybackState> {
        self.tracks.get(&layer).map(|track| PlaybackState { is_playing: track.playing, time: track.time() })
    }

    fn seek(&mut self, layer: Layer, state: PlaybackState) {
        self.tracks.insert(layer, Track::at(state));
    }
}

#[cfg(test)]
#[path = "player_test.rs"]
mod tests;
