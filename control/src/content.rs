//! Show content model.
//!
//! A [`Show`] is an ordered list of projections; each projection is an
//! ordered list of slides (items) plus an optional loop queue. Items that
//! carry a `group` label start a new group which runs until the next group
//! start, so groups are contiguous slide ranges.
//!
//! The server loads the show once from JSON and hands it to clients inside
//! the `screen:init` snapshot. Projections can be reordered at runtime; the
//! current projection index follows the projection it referred to
//! ([`follow_moved_index`]).

use serde::{Deserialize, Serialize};

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("invalid show json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("projection {projection} loop step {step}: {reason}")]
    InvalidLoopStep {
        projection: usize,
        step: usize,
        reason: &'static str,
    },
    #[error("projection index {index} out of range (len {len})")]
    OutOfRange { index: usize, len: usize },
}

impl frames::ErrorCode for ContentError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Json(_) | Self::InvalidLoopStep { .. } => "E_INVALID_SHOW",
            Self::OutOfRange { .. } => "E_BAD_COMMAND",
        }
    }
}

// =============================================================================
// TYPES
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Text,
    Image,
    Video,
}

/// One slide.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionItem {
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bg: Option<String>,
    /// Present on the first slide of a group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<String>,
}

/// Group reference inside a loop step: 1-based ordinal or label.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupRef {
    Ordinal(usize),
    Label(String),
}

/// One abstract step of a loop queue. `group` wins over `item` when both
/// are present. `item` is a 1-based slide number.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<usize>,
}

impl LoopStep {
    #[must_use]
    pub fn group(ordinal: usize) -> Self {
        Self { group: Some(GroupRef::Ordinal(ordinal)), item: None }
    }

    #[must_use]
    pub fn label(label: impl Into<String>) -> Self {
        Self { group: Some(GroupRef::Label(label.into())), item: None }
    }

    #[must_use]
    pub fn item(number: usize) -> Self {
        Self { group: None, item: Some(number) }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bg: Option<String>,
    pub contents: Vec<ProjectionItem>,
    #[serde(default)]
    pub loop_queue: Vec<LoopStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<String>,
}

impl Projection {
    #[must_use]
    pub fn len(&self) -> usize {
        self.contents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Show {
    pub projections: Vec<Projection>,
}

// =============================================================================
// OPERATIONS
// =============================================================================

impl Show {
    /// Parse and validate a show document.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::Json`] for malformed documents and
    /// [`ContentError::InvalidLoopStep`] for zero ordinals or item numbers.
    pub fn from_json(text: &str) -> Result<Self, ContentError> {
        let show: Show = serde_json::from_str(text)?;
        show.validate()?;
        Ok(show)
    }

    fn validate(&self) -> Result<(), ContentError> {
        for (projection, p) in self.projections.iter().enumerate() {
            for (step, s) in p.loop_queue.iter().enumerate() {
                let invalid = |reason| ContentError::InvalidLoopStep { projection, step, reason };
                if matches!(s.group, Some(GroupRef::Ordinal(0))) {
                    return Err(invalid("group ordinals are 1-based"));
                }
                if s.item == Some(0) {
                    return Err(invalid("item numbers are 1-based"));
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.projections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.projections.is_empty()
    }

    #[must_use]
    pub fn projection(&self, index: usize) -> Option<&Projection> {
        self.projections.get(index)
    }

    /// Slide count of every projection, in order.
    #[must_use]
    pub fn slide_counts(&self) -> Vec<usize> {
        self.projections.iter().map(Projection::len).collect()
    }

    /// Move the projection at `from` so it ends up at `to`.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::OutOfRange`] if either index is past the end.
    pub fn move_projection(&mut self, from: usize, to: usize) -> Result<(), ContentError> {
        let len = self.projections.len();
        for index in [from, to] {
            if index >= len {
                return Err(ContentError::OutOfRange { index, len });
            }
        }
        let moved = self.projections.remove(from);
        self.projections.insert(to, moved);
        Ok(())
    }
}

/// Where an index pointing into the list ends up after moving `from` to `to`.
#[must_use]
pub fn follow_moved_index(current: usize, from: usize, to: usize) -> usize {
    if current == from {
        to
    } else if from < current && current <= to {
        current - 1
    } else if to <= current && current < from {
        current + 1
    } else {
        current
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "content_test.rs"]
mod tests;
