//! Client-local view of the presentation position.
//!
//! Each rendering surface keeps its own [`ControlState`]; it is disposable
//! and always re-derivable from a fresh snapshot. Absolute positions are
//! clamped to the known bounds, relative steps wrap around the ends. Until a
//! layout is known the position is unbounded.
//!
//! Every mutation records its [`Origin`]. Origins exist for echo suppression
//! and UI feedback only and are never persisted.

use std::fmt;

/// Origin tag for positions produced by the loop queue.
pub const LOOP_QUEUE_ORIGIN: &str = "loop-queue";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Origin {
    /// Optimistic change made on this surface.
    Local,
    /// Change received from the relay.
    Remote,
    /// Change made by a named local source such as the loop queue.
    Named(String),
}

impl Origin {
    #[must_use]
    pub fn loop_queue() -> Self {
        Self::Named(LOOP_QUEUE_ORIGIN.to_owned())
    }

    #[must_use]
    pub fn is_loop_queue(&self) -> bool {
        matches!(self, Self::Named(name) if name == LOOP_QUEUE_ORIGIN)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Named(name) => name,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlState {
    projection: usize,
    slide: usize,
    max_projection: Option<usize>,
    max_slide: Option<usize>,
    slide_counts: Vec<usize>,
    origin: Origin,
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlState {
    /// Unbounded state at the first slide.
    #[must_use]
    pub fn new() -> Self {
        Self {
            projection: 0,
            slide: 0,
            max_projection: None,
            max_slide: None,
            slide_counts: Vec::new(),
            origin: Origin::Remote,
        }
    }

    #[must_use]
    pub fn projection(&self) -> usize {
        self.projection
    }

    #[must_use]
    pub fn slide(&self) -> usize {
        self.slide
    }

    #[must_use]
    pub fn max_projection(&self) -> Option<usize> {
        self.max_projection
    }

    #[must_use]
    pub fn max_slide(&self) -> Option<usize> {
        self.max_slide
    }

    #[must_use]
    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Install the slide count of every projection and re-clamp.
    /// An empty layout removes all bounds.
    pub fn set_layout(&mut self, slide_counts: Vec<usize>) {
        self.max_projection = slide_counts.len().checked_sub(1);
        self.slide_counts = slide_counts;
        self.projection = clamp(self.projection, self.max_projection);
        self.max_slide = self.slide_max_for(self.projection);
        self.slide = clamp(self.slide, self.max_slide);
    }

    /// Move to an absolute position. Returns whether the position changed.
    pub fn set_position(&mut self, projection: usize, slide: usize, origin: Origin) -> bool {
        let projection = clamp(projection, self.max_projection);
        // Bounds of the new projection apply before the slide is clamped.
        let max_slide = self.slide_max_for(projection);
        let slide = clamp(slide, max_slide);

        let changed = (projection, slide) != (self.projection, self.slide);
        self.projection = projection;
        self.slide = slide;
        self.max_slide = max_slide;
        self.origin = origin;
        changed
    }

    pub fn set_slide(&mut self, slide: usize, origin: Origin) -> bool {
        self.set_position(self.projection, slide, origin)
    }

    /// Step through slides, wrapping past either end.
    pub fn step_slide(&mut self, delta: i64, origin: Origin) -> bool {
        let slide = wrap(self.slide, delta, self.max_slide);
        self.set_slide(slide, origin)
    }

    /// Step through projections, wrapping, landing on the first slide.
    pub fn step_projection(&mut self, delta: i64, origin: Origin) -> bool {
        let projection = wrap(self.projection, delta, self.max_projection);
        self.set_position(projection, 0, origin)
    }

    fn slide_max_for(&self, projection: usize) -> Option<usize> {
        self.slide_counts
            .get(projection)
            .map(|count| count.saturating_sub(1))
    }
}

fn clamp(value: usize, max: Option<usize>) -> usize {
    max.map_or(value, |max| value.min(max))
}

fn wrap(current: usize, delta: i64, max: Option<usize>) -> usize {
    let current = i64::try_from(current).unwrap_or(i64::MAX);
    let target = current.saturating_add(delta);
    let Some(max) = max else {
        return usize::try_from(target).unwrap_or(0);
    };
    let max_i = i64::try_from(max).unwrap_or(i64::MAX);
    if target < 0 {
        max
    } else if target > max_i {
        0
    } else {
        usize::try_from(target).unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "control_state_test.rs"]
mod tests;
