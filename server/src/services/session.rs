//! Session state machine: the single authoritative presentation record.
//!
//! DESIGN
//! ======
//! `Session` is a flat record (position, override flags, live message,
//! controller registry, loop index, settings, show) mutated only through
//! [`Session::handle`]. Each command is applied synchronously and the
//! resulting broadcasts are pushed into a [`Fanout`] port after the mutation,
//! so every broadcast reflects post-mutation state. Durable settings go
//! through a [`SettingsStore`] port. Neither port performs I/O inline.
//!
//! The relay serializes calls, one inbound frame at a time.
//!
//! ERROR HANDLING
//! ==============
//! Out-of-range positions are clamped, redundant updates are dropped
//! silently. Only commands that cannot be applied at all (reorder without a
//! show, foreign controller ids, unusable playback times) return
//! `SessionError`, which the relay turns into an error reply.

use frames::ErrorCode;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use control::content::{ContentError, Show, follow_moved_index};
use control::media::{Layer, PlaybackState};
use control::precedence::{EffectiveView, Flag, OverrideFlags, resolve};
use control::protocol::{Command, Event, LiveMessage, Snapshot, message_data, settings_data};
use control::settings::Settings;

// =============================================================================
// PORTS
// =============================================================================

/// Who receives a broadcast.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Audience {
    All,
    AllExcept(String),
    Only(String),
}

/// Broadcast port. Delivery is best effort.
pub trait Fanout {
    fn deliver(&mut self, audience: Audience, from: Option<&str>, event: Event);
}

/// Durable settings port. Saving must not block.
pub trait SettingsStore {
    fn save(&mut self, settings: &Settings);
}

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no show loaded")]
    NoShow,
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error("connection {sender} cannot act for controller {claimed}")]
    ForeignController { sender: String, claimed: String },
    #[error("invalid playback time: {0}")]
    InvalidTime(f64),
    #[error("{0} is not a session command")]
    NotSessionCommand(&'static str),
}

impl ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NoShow => "E_NO_SHOW",
            Self::Content(e) => e.error_code(),
            Self::ForeignController { .. } => "E_FORBIDDEN",
            Self::InvalidTime(_) => "E_BAD_COMMAND",
            Self::NotSessionCommand(_) => "E_UNKNOWN_SYSCALL",
        }
    }
}

/// Direct answer to the sender.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Done,
    Data(Map<String, Value>),
}

pub struct Session<S: SettingsStore> {
    projection: usize,
    slide: usize,
    flags: OverrideFlags,
    message: LiveMessage,
    /// Registration order. The first entry is the primary controller.
    controllers: Vec<String>,
    loop_index: i64,
    settings: Settings,
    show: Option<Show>,
    store: S,
}

// =============================================================================
// STATE
// =============================================================================

impl<S: SettingsStore> Session<S> {
    pub fn new(settings: Settings, show: Option<Show>, store: S) -> Self {
        Self {
            projection: 0,
            slide: 0,
            flags: OverrideFlags::default(),
            message: LiveMessage::default(),
            controllers: Vec::new(),
            loop_index: -1,
            settings,
            show,
            store,
        }
    }

    #[cfg(test)]
    #[must_use]
    pub fn position(&self) -> (usize, usize) {
        (self.projection, self.slide)
    }

    #[cfg(test)]
    #[must_use]
    pub fn flags(&self) -> OverrideFlags {
        self.flags
    }

    #[cfg(test)]
    #[must_use]
    pub fn message(&self) -> &LiveMessage {
        &self.message
    }

    #[cfg(test)]
    #[must_use]
    pub fn controllers(&self) -> &[String] {
        &self.controllers
    }

    #[must_use]
    pub fn primary(&self) -> Option<&str> {
        self.controllers.first().map(String::as_str)
    }

    #[cfg(test)]
    #[must_use]
    pub fn loop_index(&self) -> i64 {
        self.loop_index
    }

    #[cfg(test)]
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[cfg(test)]
    #[must_use]
    pub fn show(&self) -> Option<&Show> {
        self.show.as_ref()
    }

    #[cfg(test)]
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn effective_view(&self) -> EffectiveView {
        resolve(&self.flags, self.slide)
    }

    /// Full state for late joiners.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            projection: self.projection,
            slide: self.slide,
            effective_view: self.effective_view().to_index(),
            flags: self.flags,
            message: self.message.clone(),
            has_controller: !self.controllers.is_empty(),
            queue_index: self.loop_index,
            show: self.show.clone(),
        }
    }

    // =========================================================================
    // DISPATCH
    // =========================================================================

    /// Apply one command from `sender`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the command cannot be applied; state is
    /// unchanged in that case.
    pub fn handle(&mut self, sender: &str, command: Command, fanout: &mut impl Fanout) -> Result<Reply, SessionError> {
        match command {
            Command::UpdatePosition { projection, slide } => {
                self.set_position(sender, projection, slide, false, fanout);
                Ok(Reply::Done)
            }
            Command::ProjectPosition { projection, slide } => {
                self.set_position(sender, projection, slide, true, fanout);
                Ok(Reply::Done)
            }
            Command::SetOverride { flag, active } => {
                self.set_override(flag, active, fanout);
                Ok(Reply::Done)
            }
            Command::ToggleMessage { text, force_open } => {
                self.toggle_message(text, force_open, fanout);
                Ok(Reply::Done)
            }
            Command::SyncMessage => Ok(self.sync_message(sender, fanout)),
            Command::ReportMessageProgress { consumer, remaining, progress } => {
                let event = Event::MessageChanged {
                    message: self.message.clone(),
                    remaining: Some(remaining),
                    progress: Some(progress),
                };
                fanout.deliver(Audience::Only(consumer), Some(sender), event);
                Ok(Reply::Done)
            }
            Command::ReorderQueue { from, to } => {
                self.reorder(from, to, fanout)?;
                Ok(Reply::Done)
            }
            Command::RegisterController { connection_id } => {
                check_self(sender, &connection_id)?;
                self.register(connection_id, fanout);
                Ok(Reply::Data(self.presence_data()))
            }
            Command::UnregisterController { connection_id } => {
                check_self(sender, &connection_id)?;
                self.remove_controller(&connection_id, fanout);
                Ok(Reply::Data(self.presence_data()))
            }
            Command::QueryControllers => Ok(Reply::Data(self.presence_data())),
            Command::InitScreen => Ok(Reply::Data(self.snapshot().to_data())),
            Command::RequestVideo { layer } => {
                self.request_video(sender, layer, fanout);
                Ok(Reply::Done)
            }
            Command::RespondVideo { layer, consumer, is_playing, time } => {
                let state = PlaybackState { is_playing, time };
                if !state.is_valid() {
                    return Err(SessionError::InvalidTime(time));
                }
                fanout.deliver(Audience::Only(consumer), Some(sender), Event::VideoState { layer, is_playing, time });
                Ok(Reply::Done)
            }
            Command::UpdateLoop { queue_index } => {
                self.update_loop(sender, queue_index, fanout);
                Ok(Reply::Data(data(json!({ "queue_index": self.loop_index }))))
            }
            Command::InitSettings => Ok(Reply::Data(settings_data(&self.settings))),
            Command::UpdateSettings { settings } => {
                self.update_settings(sender, settings, fanout);
                Ok(Reply::Data(settings_data(&self.settings)))
            }
            command @ (Command::TunnelStatus | Command::ToggleTunnel { .. }) => {
                Err(SessionError::NotSessionCommand(command.syscall()))
            }
        }
    }

    /// A connection closed. Drops it from the registry if registered.
    pub fn disconnect(&mut self, connection_id: &str, fanout: &mut impl Fanout) {
        self.remove_controller(connection_id, fanout);
    }

    // =========================================================================
    // OPERATIONS
    // =========================================================================

    fn set_position(&mut self, sender: &str, projection: usize, slide: usize, explicit: bool, fanout: &mut impl Fanout) {
        let (projection, slide) = self.clamp(projection, slide);
        let changed = (projection, slide) != (self.projection, self.slide);
        if !changed && !(explicit && self.flags.stopped) {
            debug!(projection, slide, "session: position unchanged");
            return;
        }

        if projection != self.projection {
            self.loop_index = -1;
        }
        self.projection = projection;
        self.slide = slide;

        if explicit && self.flags.set(Flag::Stopped, false) {
            fanout.deliver(Audience::All, Some(sender), Event::OverrideChanged { flags: self.flags });
        }

        let effective_view = self.effective_view();
        info!(projection, slide, %effective_view, origin = sender, "session: position changed");
        fanout.deliver(
            Audience::All,
            Some(sender),
            Event::PositionChanged { projection, slide, effective_view, origin: Some(sender.to_owned()) },
        );
    }

    fn clamp(&self, projection: usize, slide: usize) -> (usize, usize) {
        let Some(show) = &self.show else {
            return (projection, slide);
        };
        let projection = projection.min(show.len().saturating_sub(1));
        let slides = show.projection(projection).map_or(0, control::content::Projection::len);
        (projection, slide.min(slides.saturating_sub(1)))
    }

    fn set_override(&mut self, flag: Flag, active: bool, fanout: &mut impl Fanout) {
        let before = self.effective_view();
        self.flags.set(flag, active);
        fanout.deliver(Audience::All, None, Event::OverrideChanged { flags: self.flags });

        let after = self.effective_view();
        info!(%flag, active, effective_view = %after, "session: override set");
        if after != before {
            fanout.deliver(Audience::All, None, Event::ViewChanged { effective_view: after });
        }
    }

    fn toggle_message(&mut self, text: String, force_open: Option<bool>, fanout: &mut impl Fanout) {
        self.message.is_open = force_open.unwrap_or(!self.message.is_open);
        self.message.text = text;
        info!(is_open = self.message.is_open, "session: message toggled");
        fanout.deliver(Audience::All, None, self.message_event());
    }

    fn sync_message(&mut self, sender: &str, fanout: &mut impl Fanout) -> Reply {
        match self.primary() {
            Some(primary) => {
                let primary = primary.to_owned();
                fanout.deliver(
                    Audience::Only(primary),
                    None,
                    Event::MessageProgressRequest { consumer: sender.to_owned() },
                );
                Reply::Done
            }
            None => Reply::Data(message_data(&self.message, None, None)),
        }
    }

    fn reorder(&mut self, from: usize, to: usize, fanout: &mut impl Fanout) -> Result<(), SessionError> {
        let show = self.show.as_mut().ok_or(SessionError::NoShow)?;
        show.move_projection(from, to)?;
        self.projection = follow_moved_index(self.projection, from, to);
        info!(from, to, projection = self.projection, "session: projections reordered");
        fanout.deliver(Audience::All, None, Event::QueueReordered { from, to });
        Ok(())
    }

    fn register(&mut self, connection_id: String, fanout: &mut impl Fanout) {
        if !self.controllers.contains(&connection_id) {
            info!(%connection_id, position = self.controllers.len(), "session: controller registered");
            self.controllers.push(connection_id.clone());
        }
        fanout.deliver(Audience::AllExcept(connection_id), None, Event::ControllerPresence { has_any: true });
    }

    fn remove_controller(&mut self, connection_id: &str, fanout: &mut impl Fanout) {
        let Some(index) = self.controllers.iter().position(|id| id == connection_id) else {
            return;
        };
        self.controllers.remove(index);
        info!(%connection_id, remaining = self.controllers.len(), primary = ?self.primary(), "session: controller removed");

        let has_any = !self.controllers.is_empty();
        fanout.deliver(Audience::AllExcept(connection_id.to_owned()), None, Event::ControllerPresence { has_any });

        if !has_any && !self.message.is_cleared() {
            self.message = LiveMessage::default();
            fanout.deliver(Audience::All, None, self.message_event());
        }
    }

    fn request_video(&mut self, sender: &str, layer: Layer, fanout: &mut impl Fanout) {
        let Some(primary) = self.primary() else {
            debug!(%layer, consumer = sender, "session: no controller to answer video request");
            return;
        };
        let primary = primary.to_owned();
        fanout.deliver(
            Audience::Only(primary),
            None,
            Event::VideoRequested { layer, consumer: sender.to_owned() },
        );
    }

    fn update_loop(&mut self, sender: &str, queue_index: i64, fanout: &mut impl Fanout) {
        let last = self
            .show
            .as_ref()
            .and_then(|show| show.projection(self.projection))
            .map_or(i64::MAX, |p| i64::try_from(p.loop_queue.len()).map_or(i64::MAX, |len| len - 1));
        let queue_index = queue_index.clamp(-1, last.max(-1));
        if queue_index == self.loop_index {
            return;
        }
        self.loop_index = queue_index;
        fanout.deliver(Audience::AllExcept(sender.to_owned()), Some(sender), Event::LoopChanged { queue_index });
    }

    fn update_settings(&mut self, sender: &str, mut settings: Settings, fanout: &mut impl Fanout) {
        settings.regenerate_revision();
        self.store.save(&settings);
        self.settings = settings;
        info!(revision = self.settings.revision(), "session: settings updated");
        fanout.deliver(
            Audience::AllExcept(sender.to_owned()),
            Some(sender),
            Event::SettingsChanged { settings: self.settings.clone() },
        );
    }

    fn message_event(&self) -> Event {
        Event::MessageChanged { message: self.message.clone(), remaining: None, progress: None }
    }

    fn presence_data(&self) -> Map<String, Value> {
        data(json!({ "has_any": !self.controllers.is_empty() }))
    }
}

fn check_self(sender: &str, claimed: &str) -> Result<(), SessionError> {
    if sender == claimed {
        return Ok(());
    }
    Err(SessionError::ForeignController { sender: sender.to_owned(), claimed: claimed.to_owned() })
}

fn data(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
