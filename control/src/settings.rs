//! Durable display settings.
//!
//! The record is replaced wholesale on every update and carries a revision
//! id under `__internal.id` that is regenerated on each save, so clients can
//! tell a stale copy from the current one. Missing fields fall back to
//! defaults and unknown top-level keys are preserved.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleStrategy {
    #[default]
    Fit,
    Fill,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Default for Size {
    fn default() -> Self {
        Self { width: 1920, height: 1080 }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Remap {
    pub screen_resolution: Size,
    pub content_resolution: Size,
    pub scale_strategy: ScaleStrategy,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Backdrop {
    pub color: String,
}

impl Default for Backdrop {
    fn default() -> Self {
        Self { color: "#000000ff".into() }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverKind {
    #[default]
    None,
    Image,
    Video,
}

/// What the `cover` override shows.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Cover {
    #[serde(rename = "type")]
    pub kind: CoverKind,
    pub content: String,
    pub scale_strategy: ScaleStrategy,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub id: String,
}

impl Default for Revision {
    fn default() -> Self {
        Self { id: Uuid::new_v4().to_string() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(rename = "__internal")]
    pub internal: Revision,
    pub remap: Remap,
    pub backdrop: Backdrop,
    pub cover: Cover,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Settings {
    #[must_use]
    pub fn revision(&self) -> &str {
        &self.internal.id
    }

    /// Stamp a fresh revision id.
    pub fn regenerate_revision(&mut self) {
        self.internal.id = Uuid::new_v4().to_string();
    }

    /// Parse a settings payload.
    ///
    /// # Errors
    ///
    /// Returns the serde error when the value is not a settings object.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

#[cfg(test)]
#[path = "settings_test.rs"]
mod tests;
