//! Screen override flags and the effective-view resolver.
//!
//! DESIGN
//! ======
//! Five independent flags can blank or replace what the display shows. The
//! resolver collapses them into one [`EffectiveView`] with a fixed priority:
//! `stopped > transparent > cover > black > clear > slide`. Lower flags stay
//! set underneath higher ones, so clearing `cover` on top of `black` falls
//! back to black rather than the slide.
//!
//! On the wire an effective view is a single integer: the slide index when
//! no flag applies, otherwise a distinct negative sentinel.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// =============================================================================
// FLAGS
// =============================================================================

/// One screen override.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Flag {
    Stopped,
    Transparent,
    Cover,
    Black,
    Clear,
}

impl Flag {
    /// Every flag, highest priority first.
    pub const PRIORITY: [Flag; 5] = [Flag::Stopped, Flag::Transparent, Flag::Cover, Flag::Black, Flag::Clear];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Transparent => "transparent",
            Self::Cover => "cover",
            Self::Black => "black",
            Self::Clear => "clear",
        }
    }

    /// View shown while this flag is the highest one set.
    #[must_use]
    pub fn view(self) -> EffectiveView {
        match self {
            Self::Stopped => EffectiveView::Stopped,
            Self::Transparent => EffectiveView::Transparent,
            Self::Cover => EffectiveView::Cover,
            Self::Black => EffectiveView::Black,
            Self::Clear => EffectiveView::Clear,
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown override flag: {0}")]
pub struct UnknownFlag(pub String);

impl FromStr for Flag {
    type Err = UnknownFlag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Flag::PRIORITY
            .into_iter()
            .find(|flag| flag.as_str() == s)
            .ok_or_else(|| UnknownFlag(s.to_owned()))
    }
}

/// The full override set. Any subset may be active.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverrideFlags {
    pub stopped: bool,
    pub transparent: bool,
    pub cover: bool,
    pub black: bool,
    pub clear: bool,
}

impl OverrideFlags {
    #[must_use]
    pub fn get(&self, flag: Flag) -> bool {
        match flag {
            Flag::Stopped => self.stopped,
            Flag::Transparent => self.transparent,
            Flag::Cover => self.cover,
            Flag::Black => self.black,
            Flag::Clear => self.clear,
        }
    }

    /// Set one flag. Returns whether the stored value changed.
    pub fn set(&mut self, flag: Flag, active: bool) -> bool {
        let slot = match flag {
            Flag::Stopped => &mut self.stopped,
            Flag::Transparent => &mut self.transparent,
            Flag::Cover => &mut self.cover,
            Flag::Black => &mut self.black,
            Flag::Clear => &mut self.clear,
        };
        let changed = *slot != active;
        *slot = active;
        changed
    }

    /// Highest-priority flag currently set.
    #[must_use]
    pub fn highest(&self) -> Option<Flag> {
        Flag::PRIORITY.into_iter().find(|flag| self.get(*flag))
    }
}

// =============================================================================
// EFFECTIVE VIEW
// =============================================================================

/// What the display must render.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EffectiveView {
    Slide(usize),
    Stopped,
    Transparent,
    Cover,
    Black,
    Clear,
}

pub const BLACK_SENTINEL: i64 = -1;
pub const CLEAR_SENTINEL: i64 = -2;
pub const STOPPED_SENTINEL: i64 = -3;
pub const TRANSPARENT_SENTINEL: i64 = -4;
pub const COVER_SENTINEL: i64 = -5;

impl EffectiveView {
    /// Wire integer: the slide index, or a negative sentinel.
    #[must_use]
    pub fn to_index(self) -> i64 {
        match self {
            Self::Slide(slide) => i64::try_from(slide).unwrap_or(i64::MAX),
            Self::Stopped => STOPPED_SENTINEL,
            Self::Transparent => TRANSPARENT_SENTINEL,
            Self::Cover => COVER_SENTINEL,
            Self::Black => BLACK_SENTINEL,
            Self::Clear => CLEAR_SENTINEL,
        }
    }

    /// Inverse of [`EffectiveView::to_index`]. Unknown negatives are `None`.
    #[must_use]
    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            STOPPED_SENTINEL => Some(Self::Stopped),
            TRANSPARENT_SENTINEL => Some(Self::Transparent),
            COVER_SENTINEL => Some(Self::Cover),
            BLACK_SENTINEL => Some(Self::Black),
            CLEAR_SENTINEL => Some(Self::Clear),
            n => usize::try_from(n).ok().map(Self::Slide),
        }
    }

    #[must_use]
    pub fn is_override(self) -> bool {
        !matches!(self, Self::Slide(_))
    }
}

impl fmt::Display for EffectiveView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Slide(slide) => write!(f, "slide {slide}"),
            Self::Stopped => f.write_str("stopped"),
            Self::Transparent => f.write_str("transparent"),
            Self::Cover => f.write_str("cover"),
            Self::Black => f.write_str("black"),
            Self::Clear => f.write_str("clear"),
        }
    }
}

/// Resolve the override set and current slide into one view.
#[must_use]
pub fn resolve(flags: &OverrideFlags, slide: usize) -> EffectiveView {
    flags.highest().map_or(EffectiveView::Slide(slide), Flag::view)
}

#[cfg(test)]
#[path = "precedence_test.rs"]
mod tests;
