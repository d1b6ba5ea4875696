//! Typed relay protocol.
//!
//! DESIGN
//! ======
//! [`Command`] is everything a client may ask of the server (C→S),
//! [`Event`] everything the server fans out (S→C). Both map one-to-one onto
//! [`Frame`]s: the syscall names the variant and `data` carries its named
//! fields. Direct replies reuse the request's syscall with `done`/`error`
//! status; their payloads ([`Snapshot`], settings, [`TunnelStatus`]) have
//! their own helpers here.
//!
//! ERROR HANDLING
//! ==============
//! Decoding is strict about required fields and types. A malformed command
//! never reaches the session; the relay answers it with a structured
//! `E_BAD_COMMAND` / `E_UNKNOWN_SYSCALL` error frame instead.

use std::str::FromStr;

use frames::{ErrorCode, Frame};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::content::Show;
use crate::media::Layer;
use crate::precedence::{EffectiveView, Flag, OverrideFlags};
use crate::settings::Settings;

// =============================================================================
// SYSCALLS
// =============================================================================

pub mod syscall {
    pub const SESSION_CONNECTED: &str = "session:connected";
    pub const GATEWAY_ERROR: &str = "gateway:error";

    pub const POSITION_UPDATE: &str = "position:update";
    pub const POSITION_PROJECT: &str = "position:project";
    pub const POSITION_CHANGED: &str = "position:changed";

    pub const OVERRIDE_SET: &str = "override:set";
    pub const OVERRIDE_CHANGED: &str = "override:changed";
    pub const VIEW_CHANGED: &str = "view:changed";

    pub const MESSAGE_TOGGLE: &str = "message:toggle";
    pub const MESSAGE_SYNC: &str = "message:sync";
    pub const MESSAGE_PROGRESS: &str = "message:progress";
    pub const MESSAGE_CHANGED: &str = "message:changed";
    pub const MESSAGE_PROGRESS_REQUEST: &str = "message:progress_request";

    pub const QUEUE_REORDER: &str = "queue:reorder";
    pub const QUEUE_REORDERED: &str = "queue:reordered";

    pub const CONTROLLER_REGISTER: &str = "controller:register";
    pub const CONTROLLER_UNREGISTER: &str = "controller:unregister";
    pub const CONTROLLER_HAS_ANY: &str = "controller:has_any";

    pub const SCREEN_INIT: &str = "screen:init";

    pub const VIDEO_REQUEST: &str = "video:request";
    pub const VIDEO_RESPONSE: &str = "video:response";
    pub const VIDEO_REQUESTED: &str = "video:requested";
    pub const VIDEO_STATE: &str = "video:state";

    pub const LOOP_UPDATE: &str = "loop:update";
    pub const LOOP_CHANGED: &str = "loop:changed";

    pub const SETTINGS_INIT: &str = "settings:init";
    pub const SETTINGS_UPDATE: &str = "settings:update";
    pub const SETTINGS_CHANGED: &str = "settings:changed";

    pub const TUNNEL_STATUS: &str = "tunnel:status";
    pub const TUNNEL_TOGGLE: &str = "tunnel:toggle";
    pub const TUNNEL_CHANGED: &str = "tunnel:changed";
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("unknown syscall: {0}")]
    UnknownSyscall(String),
}

impl ErrorCode for ProtocolError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingField(_) | Self::InvalidField { .. } => "E_BAD_COMMAND",
            Self::UnknownSyscall(_) => "E_UNKNOWN_SYSCALL",
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ProtocolError {
    ProtocolError::InvalidField { field, reason: reason.into() }
}

// =============================================================================
// PAYLOAD TYPES
// =============================================================================

/// Transient banner state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveMessage {
    pub text: String,
    pub is_open: bool,
}

impl LiveMessage {
    #[must_use]
    pub fn is_cleared(&self) -> bool {
        self.text.is_empty() && !self.is_open
    }
}

/// Remote-access tunnel state. `active == None` means a transition is in
/// flight.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TunnelStatus {
    #[must_use]
    pub fn to_data(&self) -> Map<String, Value> {
        to_object(self)
    }

    /// Lenient: unreadable fields are treated as absent.
    #[must_use]
    pub fn from_data(data: &Value) -> Self {
        Self {
            active: data.get("active").and_then(Value::as_bool),
            url: data.get("url").and_then(Value::as_str).map(str::to_owned),
            error: data.get("error").and_then(Value::as_str).map(str::to_owned),
        }
    }
}

/// Full session state, the `screen:init` reply.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub projection: usize,
    pub slide: usize,
    pub effective_view: i64,
    pub flags: OverrideFlags,
    pub message: LiveMessage,
    pub has_controller: bool,
    pub queue_index: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show: Option<Show>,
}

impl Snapshot {
    #[must_use]
    pub fn to_data(&self) -> Map<String, Value> {
        to_object(self)
    }

    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidField`] when the payload is not a
    /// snapshot.
    pub fn from_data(data: &Value) -> Result<Self, ProtocolError> {
        serde_json::from_value(data.clone()).map_err(|e| invalid("snapshot", e.to_string()))
    }

    #[must_use]
    pub fn view(&self) -> Option<EffectiveView> {
        EffectiveView::from_index(self.effective_view)
    }
}

/// Payload of `settings:*` replies and broadcasts.
#[must_use]
pub fn settings_data(settings: &Settings) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("settings".into(), settings.to_value());
    data
}

/// # Errors
///
/// Returns [`ProtocolError`] when `settings` is missing or malformed.
pub fn settings_from_data(data: &Value) -> Result<Settings, ProtocolError> {
    let value = data.get("settings").ok_or(ProtocolError::MissingField("settings"))?;
    Settings::from_value(value.clone()).map_err(|e| invalid("settings", e.to_string()))
}

/// Payload of `message:changed` and of the `message:sync` reply.
#[must_use]
pub fn message_data(message: &LiveMessage, remaining: Option<usize>, progress: Option<f64>) -> Map<String, Value> {
    let mut data = to_object(message);
    if let Some(remaining) = remaining {
        data.insert("remaining".into(), json!(remaining));
    }
    if let Some(progress) = progress {
        data.insert("progress".into(), json!(progress));
    }
    data
}

fn to_object(value: &impl Serialize) -> Map<String, Value> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

// =============================================================================
// FIELD READERS
// =============================================================================

fn field<'a>(frame: &'a Frame, key: &'static str) -> Result<&'a Value, ProtocolError> {
    match frame.get(key) {
        None | Some(Value::Null) => Err(ProtocolError::MissingField(key)),
        Some(value) => Ok(value),
    }
}

fn signed(frame: &Frame, key: &'static str) -> Result<i64, ProtocolError> {
    field(frame, key)?;
    frame.get_i64(key).ok_or_else(|| invalid(key, "expected an integer"))
}

fn index(frame: &Frame, key: &'static str) -> Result<usize, ProtocolError> {
    usize::try_from(signed(frame, key)?).map_err(|_| invalid(key, "must not be negative"))
}

fn string(frame: &Frame, key: &'static str) -> Result<String, ProtocolError> {
    field(frame, key)?
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| invalid(key, "expected a string"))
}

fn boolean(frame: &Frame, key: &'static str) -> Result<bool, ProtocolError> {
    field(frame, key)?
        .as_bool()
        .ok_or_else(|| invalid(key, "expected a boolean"))
}

fn optional_boolean(frame: &Frame, key: &'static str) -> Result<Option<bool>, ProtocolError> {
    match frame.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_bool().map(Some).ok_or_else(|| invalid(key, "expected a boolean")),
    }
}

fn number(frame: &Frame, key: &'static str) -> Result<f64, ProtocolError> {
    field(frame, key)?
        .as_f64()
        .ok_or_else(|| invalid(key, "expected a number"))
}

fn parsed<T>(frame: &Frame, key: &'static str) -> Result<T, ProtocolError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    string(frame, key)?.parse().map_err(|e: T::Err| invalid(key, e.to_string()))
}

fn view(frame: &Frame, key: &'static str) -> Result<EffectiveView, ProtocolError> {
    let raw = signed(frame, key)?;
    EffectiveView::from_index(raw).ok_or_else(|| invalid(key, format!("unknown view {raw}")))
}

// =============================================================================
// COMMANDS (C→S)
// =============================================================================

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    UpdatePosition { projection: usize, slide: usize },
    /// Explicit "project" action; always clears `stopped`.
    ProjectPosition { projection: usize, slide: usize },
    SetOverride { flag: Flag, active: bool },
    /// `force_open: None` inverts the current open state.
    ToggleMessage { text: String, force_open: Option<bool> },
    SyncMessage,
    ReportMessageProgress { consumer: String, remaining: usize, progress: f64 },
    ReorderQueue { from: usize, to: usize },
    RegisterController { connection_id: String },
    UnregisterController { connection_id: String },
    QueryControllers,
    InitScreen,
    RequestVideo { layer: Layer },
    RespondVideo { layer: Layer, consumer: String, is_playing: bool, time: f64 },
    UpdateLoop { queue_index: i64 },
    InitSettings,
    UpdateSettings { settings: Settings },
    TunnelStatus,
    ToggleTunnel { enable: bool },
}

impl Command {
    #[must_use]
    pub fn syscall(&self) -> &'static str {
        use self::syscall::*;
        match self {
            Self::UpdatePosition { .. } => POSITION_UPDATE,
            Self::ProjectPosition { .. } => POSITION_PROJECT,
            Self::SetOverride { .. } => OVERRIDE_SET,
            Self::ToggleMessage { .. } => MESSAGE_TOGGLE,
            Self::SyncMessage => MESSAGE_SYNC,
            Self::ReportMessageProgress { .. } => MESSAGE_PROGRESS,
            Self::ReorderQueue { .. } => QUEUE_REORDER,
            Self::RegisterController { .. } => CONTROLLER_REGISTER,
            Self::UnregisterController { .. } => CONTROLLER_UNREGISTER,
            Self::QueryControllers => CONTROLLER_HAS_ANY,
            Self::InitScreen => SCREEN_INIT,
            Self::RequestVideo { .. } => VIDEO_REQUEST,
            Self::RespondVideo { .. } => VIDEO_RESPONSE,
            Self::UpdateLoop { .. } => LOOP_UPDATE,
            Self::InitSettings => SETTINGS_INIT,
            Self::UpdateSettings { .. } => SETTINGS_UPDATE,
            Self::TunnelStatus => TUNNEL_STATUS,
            Self::ToggleTunnel { .. } => TUNNEL_TOGGLE,
        }
    }

    #[must_use]
    pub fn to_frame(&self) -> Frame {
        let data = match self {
            Self::UpdatePosition { projection, slide } | Self::ProjectPosition { projection, slide } => {
                json!({ "projection": projection, "slide": slide })
            }
            Self::SetOverride { flag, active } => json!({ "flag": flag.as_str(), "active": active }),
            Self::ToggleMessage { text, force_open } => match force_open {
                Some(open) => json!({ "text": text, "force_open": open }),
                None => json!({ "text": text }),
            },
            Self::ReportMessageProgress { consumer, remaining, progress } => {
                json!({ "consumer": consumer, "remaining": remaining, "progress": progress })
            }
            Self::ReorderQueue { from, to } => json!({ "from": from, "to": to }),
            Self::RegisterController { connection_id } | Self::UnregisterController { connection_id } => {
                json!({ "connection_id": connection_id })
            }
            Self::RequestVideo { layer } => json!({ "layer": layer.as_str() }),
            Self::RespondVideo { layer, consumer, is_playing, time } => json!({
                "layer": layer.as_str(),
                "consumer": consumer,
                "is_playing": is_playing,
                "time": time,
            }),
            Self::UpdateLoop { queue_index } => json!({ "queue_index": queue_index }),
            Self::UpdateSettings { settings } => Value::Object(settings_data(settings)),
            Self::ToggleTunnel { enable } => json!({ "enable": enable }),
            Self::SyncMessage | Self::QueryControllers | Self::InitScreen | Self::InitSettings | Self::TunnelStatus => {
                json!({})
            }
        };
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Frame::request(self.syscall(), data)
    }

    /// Decode a request frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownSyscall`] for syscalls that are not
    /// commands and field errors for malformed payloads.
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        use self::syscall::*;
        let command = match frame.syscall.as_str() {
            POSITION_UPDATE => Self::UpdatePosition {
                projection: index(frame, "projection")?,
                slide: index(frame, "slide")?,
            },
            POSITION_PROJECT => Self::ProjectPosition {
                projection: index(frame, "projection")?,
                slide: index(frame, "slide")?,
            },
            OVERRIDE_SET => Self::SetOverride {
                flag: parsed(frame, "flag")?,
                active: boolean(frame, "active")?,
            },
            MESSAGE_TOGGLE => Self::ToggleMessage {
                text: string(frame, "text")?,
                force_open: optional_boolean(frame, "force_open")?,
            },
            MESSAGE_SYNC => Self::SyncMessage,
            MESSAGE_PROGRESS => Self::ReportMessageProgress {
                consumer: string(frame, "consumer")?,
                remaining: index(frame, "remaining")?,
                progress: number(frame, "progress")?,
            },
            QUEUE_REORDER => Self::ReorderQueue {
                from: index(frame, "from")?,
                to: index(frame, "to")?,
            },
            CONTROLLER_REGISTER => Self::RegisterController { connection_id: string(frame, "connection_id")? },
            CONTROLLER_UNREGISTER => Self::UnregisterController { connection_id: string(frame, "connection_id")? },
            CONTROLLER_HAS_ANY => Self::QueryControllers,
            SCREEN_INIT => Self::InitScreen,
            VIDEO_REQUEST => Self::RequestVideo { layer: parsed(frame, "layer")? },
            VIDEO_RESPONSE => Self::RespondVideo {
                layer: parsed(frame, "layer")?,
                consumer: string(frame, "consumer")?,
                is_playing: boolean(frame, "is_playing")?,
                time: number(frame, "time")?,
            },
            LOOP_UPDATE => Self::UpdateLoop { queue_index: signed(frame, "queue_index")? },
            SETTINGS_INIT => Self::InitSettings,
            SETTINGS_UPDATE => Self::UpdateSettings { settings: settings_from_data(&frame.data)? },
            TUNNEL_STATUS => Self::TunnelStatus,
            TUNNEL_TOGGLE => Self::ToggleTunnel { enable: boolean(frame, "enable")? },
            other => return Err(ProtocolError::UnknownSyscall(other.to_owned())),
        };
        Ok(command)
    }
}

// =============================================================================
// EVENTS (S→C)
// =============================================================================

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Connected { connection_id: String, is_local: bool },
    PositionChanged {
        projection: usize,
        slide: usize,
        effective_view: EffectiveView,
        /// Connection that caused the change.
        origin: Option<String>,
    },
    OverrideChanged { flags: OverrideFlags },
    ViewChanged { effective_view: EffectiveView },
    MessageChanged { message: LiveMessage, remaining: Option<usize>, progress: Option<f64> },
    MessageProgressRequest { consumer: String },
    QueueReordered { from: usize, to: usize },
    ControllerPresence { has_any: bool },
    VideoRequested { layer: Layer, consumer: String },
    VideoState { layer: Layer, is_playing: bool, time: f64 },
    LoopChanged { queue_index: i64 },
    SettingsChanged { settings: Settings },
    TunnelChanged { status: TunnelStatus },
    GatewayError { message: String },
}

impl Event {
    #[must_use]
    pub fn syscall(&self) -> &'static str {
        use self::syscall::*;
        match self {
            Self::Connected { .. } => SESSION_CONNECTED,
            Self::PositionChanged { .. } => POSITION_CHANGED,
            Self::OverrideChanged { .. } => OVERRIDE_CHANGED,
            Self::ViewChanged { .. } => VIEW_CHANGED,
            Self::MessageChanged { .. } => MESSAGE_CHANGED,
            Self::MessageProgressRequest { .. } => MESSAGE_PROGRESS_REQUEST,
            Self::QueueReordered { .. } => QUEUE_REORDERED,
            Self::ControllerPresence { .. } => CONTROLLER_HAS_ANY,
            Self::VideoRequested { .. } => VIDEO_REQUESTED,
            Self::VideoState { .. } => VIDEO_STATE,
            Self::LoopChanged { .. } => LOOP_CHANGED,
            Self::SettingsChanged { .. } => SETTINGS_CHANGED,
            Self::TunnelChanged { .. } => TUNNEL_CHANGED,
            Self::GatewayError { .. } => GATEWAY_ERROR,
        }
    }

    #[must_use]
    pub fn to_frame(&self) -> Frame {
        let data = match self {
            Self::Connected { connection_id, is_local } => {
                to_object(&json!({ "connection_id": connection_id, "is_local": is_local }))
            }
            Self::PositionChanged { projection, slide, effective_view, origin } => to_object(&json!({
                "projection": projection,
                "slide": slide,
                "effective_view": effective_view.to_index(),
                "origin": origin,
            })),
            Self::OverrideChanged { flags } => to_object(flags),
            Self::ViewChanged { effective_view } => to_object(&json!({ "effective_view": effective_view.to_index() })),
            Self::MessageChanged { message, remaining, progress } => message_data(message, *remaining, *progress),
            Self::MessageProgressRequest { consumer } => to_object(&json!({ "consumer": consumer })),
            Self::QueueReordered { from, to } => to_object(&json!({ "from": from, "to": to })),
            Self::ControllerPresence { has_any } => to_object(&json!({ "has_any": has_any })),
            Self::VideoRequested { layer, consumer } => {
                to_object(&json!({ "layer": layer.as_str(), "consumer": consumer }))
            }
            Self::VideoState { layer, is_playing, time } => {
                to_object(&json!({ "layer": layer.as_str(), "is_playing": is_playing, "time": time }))
            }
            Self::LoopChanged { queue_index } => to_object(&json!({ "queue_index": queue_index })),
            Self::SettingsChanged { settings } => settings_data(settings),
            Self::TunnelChanged { status } => status.to_data(),
            Self::GatewayError { message } => to_object(&json!({ "message": message })),
        };
        Frame::request(self.syscall(), data)
    }

    /// Decode a broadcast frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownSyscall`] for syscalls that are not
    /// events and field errors for malformed payloads.
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        use self::syscall::*;
        let event = match frame.syscall.as_str() {
            SESSION_CONNECTED => Self::Connected {
                connection_id: string(frame, "connection_id")?,
                is_local: frame.get_bool("is_local").unwrap_or(false),
            },
            POSITION_CHANGED => Self::PositionChanged {
                projection: index(frame, "projection")?,
                slide: index(frame, "slide")?,
                effective_view: view(frame, "effective_view")?,
                origin: frame.get_str("origin").map(str::to_owned),
            },
            OVERRIDE_CHANGED => Self::OverrideChanged {
                flags: serde_json::from_value(frame.data.clone()).map_err(|e| invalid("flags", e.to_string()))?,
            },
            VIEW_CHANGED => Self::ViewChanged { effective_view: view(frame, "effective_view")? },
            MESSAGE_CHANGED => Self::MessageChanged {
                message: LiveMessage { text: string(frame, "text")?, is_open: boolean(frame, "is_open")? },
                remaining: frame.get_i64("remaining").and_then(|n| usize::try_from(n).ok()),
                progress: frame.get_f64("progress"),
            },
            MESSAGE_PROGRESS_REQUEST => Self::MessageProgressRequest { consumer: string(frame, "consumer")? },
            QUEUE_REORDERED => Self::QueueReordered {
                from: index(frame, "from")?,
                to: index(frame, "to")?,
            },
            CONTROLLER_HAS_ANY => Self::ControllerPresence { has_any: boolean(frame, "has_any")? },
            VIDEO_REQUESTED => Self::VideoRequested {
                layer: parsed(frame, "layer")?,
                consumer: string(frame, "consumer")?,
            },
            VIDEO_STATE => Self::VideoState {
                layer: parsed(frame, "layer")?,
                is_playing: boolean(frame, "is_playing")?,
                time: number(frame, "time")?,
            },
            LOOP_CHANGED => Self::LoopChanged { queue_index: signed(frame, "queue_index")? },
            SETTINGS_CHANGED => Self::SettingsChanged { settings: settings_from_data(&frame.data)? },
            TUNNEL_CHANGED => Self::TunnelChanged { status: TunnelStatus::from_data(&frame.data) },
            GATEWAY_ERROR => Self::GatewayError { message: frame.get_str("message").unwrap_or_default().to_owned() },
            other => return Err(ProtocolError::UnknownSyscall(other.to_owned())),
        };
        Ok(event)
    }
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod tests;
