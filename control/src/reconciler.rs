//! Client reconciler.
//!
//! DESIGN
//! ======
//! One [`Reconciler`] per client surface keeps that surface consistent with
//! the server without applying its own changes twice. It is sans-IO: callers
//! feed it local user actions and inbound frames, and execute the
//! [`Action`]s it returns (send a command, surface a notice).
//!
//! - Local actions apply optimistically (`Origin::Local`) and then send.
//! - A `position:changed` whose origin is our own connection id is an echo
//!   and is skipped, except before the first snapshot after (re)connect.
//! - Other broadcasts apply fully with `Origin::Remote`.
//! - Any change of the active projection re-derives slide bounds and resets
//!   the loop queue.
//!
//! LOOP QUEUE
//! ==========
//! Positions produced by the queue carry the loop-queue origin and are not
//! fed back into it. Free navigation, local or remote, lets the queue follow
//! when it lands on the next expected slide; only the client that navigated
//! reports the new index with `loop:update`. Commands are always sent
//! position first, queue index second, so peers follow the same way.
//!
//! DISCONNECTS
//! ===========
//! While disconnected, local actions keep applying but their commands are
//! only counted. On reconnect the snapshot wins: speculative state is
//! replaced and nothing is replayed.

use frames::{FRAME_CODE, Frame, Status};
use tracing::{debug, info, warn};

use crate::content::{GroupRef, Show, follow_moved_index};
use crate::control_state::{ControlState, Origin};
use crate::loop_queue::LoopQueue;
use crate::media::{Layer, MediaHandshake, MediaPlayer, NoMedia, PlaybackState};
use crate::precedence::{EffectiveView, Flag, OverrideFlags, resolve};
use crate::protocol::{Command, Event, LiveMessage, Snapshot, TunnelStatus, settings_from_data, syscall};
use crate::settings::Settings;

// =============================================================================
// OUTPUTS
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Issues commands and answers producer queries when primary.
    Controller,
    /// Pure display consumer.
    Display,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    Send(Command),
    Notify(Notice),
}

/// State changes surfaced to the rendering layer.
#[derive(Clone, Debug, PartialEq)]
pub enum Notice {
    /// Fresh snapshot applied.
    Synced,
    ShowChanged,
    PositionChanged { projection: usize, slide: usize, origin: Origin },
    ViewChanged(EffectiveView),
    FlagsChanged(OverrideFlags),
    MessageChanged { message: LiveMessage, remaining: Option<usize>, progress: Option<f64> },
    /// A display wants marquee progress; answer with
    /// [`Reconciler::report_message_progress`].
    ProgressRequested { consumer: String },
    QueueIndexChanged(i64),
    ControllerPresence(bool),
    SettingsChanged(Settings),
    TunnelChanged(TunnelStatus),
    Seeked { layer: Layer, state: PlaybackState },
    Rejected { syscall: String, code: Option<String>, message: String },
}

// =============================================================================
// RECONCILER
// =============================================================================

pub struct Reconciler<P: MediaPlayer = NoMedia> {
    role: Role,
    connection_id: Option<String>,
    is_local: bool,
    synced: bool,
    unsent: usize,
    show: Option<Show>,
    control: ControlState,
    queue: LoopQueue,
    flags: OverrideFlags,
    view: EffectiveView,
    message: LiveMessage,
    has_controller: bool,
    settings: Option<Settings>,
    tunnel: TunnelStatus,
    media: MediaHandshake,
    player: P,
}

impl<P: MediaPlayer> Reconciler<P> {
    pub fn new(role: Role, player: P) -> Self {
        Self {
            role,
            connection_id: None,
            is_local: false,
            synced: false,
            unsent: 0,
            show: None,
            control: ControlState::new(),
            queue: LoopQueue::new(),
            flags: OverrideFlags::default(),
            view: EffectiveView::Slide(0),
            message: LiveMessage::default(),
            has_controller: false,
            settings: None,
            tunnel: TunnelStatus::default(),
            media: MediaHandshake::default(),
            player,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_id.is_some()
    }

    pub fn is_local(&self) -> bool {
        self.is_local
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Commands dropped while disconnected since the last snapshot.
    pub fn unsent(&self) -> usize {
        self.unsent
    }

    pub fn show(&self) -> Option<&Show> {
        self.show.as_ref()
    }

    pub fn control(&self) -> &ControlState {
        &self.control
    }

    pub fn queue(&self) -> &LoopQueue {
        &self.queue
    }

    pub fn flags(&self) -> OverrideFlags {
        self.flags
    }

    pub fn view(&self) -> EffectiveView {
        self.view
    }

    pub fn message(&self) -> &LiveMessage {
        &self.message
    }

    pub fn has_controller(&self) -> bool {
        self.has_controller
    }

    pub fn settings(&self) -> Option<&Settings> {
        self.settings.as_ref()
    }

    pub fn tunnel(&self) -> &TunnelStatus {
        &self.tunnel
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut P {
        &mut self.player
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Relay assigned us `connection_id`. Asks for a fresh snapshot.
    pub fn connected(&mut self, connection_id: &str, is_local: bool) -> Vec<Action> {
        info!(%connection_id, is_local, role = ?self.role, "reconciler: connected");
        self.connection_id = Some(connection_id.to_owned());
        self.is_local = is_local;
        self.synced = false;
        self.media = MediaHandshake::default();

        let mut actions = vec![Action::Send(Command::InitScreen), Action::Send(Command::InitSettings)];
        if self.role == Role::Controller {
            actions.push(Action::Send(Command::RegisterController { connection_id: connection_id.to_owned() }));
            actions.push(Action::Send(Command::TunnelStatus));
        }
        actions
    }

    /// Relay connection lost. Local state is kept; commands are counted.
    pub fn disconnected(&mut self) {
        if let Some(connection_id) = self.connection_id.take() {
            info!(%connection_id, "reconciler: disconnected");
        }
        self.synced = false;
    }

    fn send(&mut self, command: Command) -> Option<Action> {
        if self.connection_id.is_some() {
            return Some(Action::Send(command));
        }
        self.unsent += 1;
        debug!(syscall = command.syscall(), unsent = self.unsent, "reconciler: offline, command not sent");
        None
    }

    // =========================================================================
    // LOCAL ACTIONS
    // =========================================================================

    /// Navigate to an absolute position.
    pub fn goto(&mut self, projection: usize, slide: usize) -> Vec<Action> {
        let before = self.control.projection();
        let changed = self.control.set_position(projection, slide, Origin::Local);
        self.after_local_move(before, changed, false, &Origin::Local)
    }

    /// Explicit "project" action; clears `stopped` even without a move.
    pub fn project(&mut self, projection: usize, slide: usize) -> Vec<Action> {
        let before = self.control.projection();
        let changed = self.control.set_position(projection, slide, Origin::Local);
        let unstopped = self.flags.set(Flag::Stopped, false);
        let mut actions = self.after_local_move(before, changed, true, &Origin::Local);
        if unstopped {
            actions.push(Action::Notify(Notice::FlagsChanged(self.flags)));
        }
        actions
    }

    pub fn step_slide(&mut self, delta: i64) -> Vec<Action> {
        let before = self.control.projection();
        let changed = self.control.step_slide(delta, Origin::Local);
        self.after_local_move(before, changed, false, &Origin::Local)
    }

    pub fn step_projection(&mut self, delta: i64) -> Vec<Action> {
        let before = self.control.projection();
        let changed = self.control.step_projection(delta, Origin::Local);
        self.after_local_move(before, changed, false, &Origin::Local)
    }

    /// Jump to the first slide of a group in the active projection.
    pub fn goto_group(&mut self, group: &GroupRef) -> Vec<Action> {
        let Some(slide) = self.queue.groups().resolve(group) else {
            debug!(?group, "reconciler: unknown group");
            return Vec::new();
        };
        self.goto(self.control.projection(), slide)
    }

    /// Move the loop queue and show the slide its new step resolves to.
    pub fn advance_queue(&mut self, delta: i64) -> Vec<Action> {
        let before = self.queue.index();
        let target = self.queue.advance(delta);
        let mut actions = Vec::new();

        if let Some(slide) = target {
            let origin = Origin::loop_queue();
            let projection = self.control.projection();
            if self.control.set_slide(slide, origin.clone()) {
                actions.extend(self.send(Command::UpdatePosition { projection, slide }));
                actions.push(Action::Notify(Notice::PositionChanged { projection, slide, origin }));
                actions.extend(self.refresh_view());
            }
        } else {
            debug!(index = self.queue.index(), "reconciler: queue step has nothing to show");
        }

        let index = self.queue.index();
        if index != before {
            actions.extend(self.send(Command::UpdateLoop { queue_index: index }));
            actions.push(Action::Notify(Notice::QueueIndexChanged(index)));
        }
        actions
    }

    pub fn set_flag(&mut self, flag: Flag, active: bool) -> Vec<Action> {
        self.flags.set(flag, active);
        let mut actions = Vec::new();
        actions.extend(self.send(Command::SetOverride { flag, active }));
        actions.push(Action::Notify(Notice::FlagsChanged(self.flags)));
        actions.extend(self.refresh_view());
        actions
    }

    pub fn toggle_message(&mut self, text: &str, force_open: Option<bool>) -> Vec<Action> {
        self.message.text = text.to_owned();
        self.message.is_open = force_open.unwrap_or(!self.message.is_open);
        let mut actions = Vec::new();
        actions.extend(self.send(Command::ToggleMessage { text: text.to_owned(), force_open }));
        actions.push(Action::Notify(Notice::MessageChanged {
            message: self.message.clone(),
            remaining: None,
            progress: None,
        }));
        actions
    }

    /// Ask the primary controller how far the banner has scrolled.
    pub fn sync_message(&mut self) -> Vec<Action> {
        self.send(Command::SyncMessage).into_iter().collect()
    }

    pub fn report_message_progress(&mut self, consumer: &str, remaining: usize, progress: f64) -> Vec<Action> {
        self.send(Command::ReportMessageProgress { consumer: consumer.to_owned(), remaining, progress })
            .into_iter()
            .collect()
    }

    pub fn reorder_queue(&mut self, from: usize, to: usize) -> Vec<Action> {
        if let Err(e) = self.apply_reorder(from, to) {
            return vec![Action::Notify(Notice::Rejected {
                syscall: syscall::QUEUE_REORDER.to_owned(),
                code: None,
                message: e,
            })];
        }
        let mut actions = Vec::new();
        actions.extend(self.send(Command::ReorderQueue { from, to }));
        actions.push(Action::Notify(Notice::ShowChanged));
        actions
    }

    pub fn update_settings(&mut self, settings: Settings) -> Vec<Action> {
        self.send(Command::UpdateSettings { settings }).into_iter().collect()
    }

    pub fn toggle_tunnel(&mut self, enable: bool) -> Vec<Action> {
        self.send(Command::ToggleTunnel { enable }).into_iter().collect()
    }

    /// A video layer mounted; ask the primary controller for its position.
    pub fn mount_video(&mut self, layer: Layer) -> Vec<Action> {
        if !self.is_connected() {
            return Vec::new();
        }
        self.media
            .mount(layer)
            .and_then(|command| self.send(command))
            .into_iter()
            .collect()
    }

    pub fn unmount_video(&mut self, layer: Layer) {
        self.media.unmount(layer);
    }

    fn after_local_move(&mut self, before_projection: usize, changed: bool, explicit: bool, origin: &Origin) -> Vec<Action> {
        if !changed && !explicit {
            return Vec::new();
        }
        let projection = self.control.projection();
        let slide = self.control.slide();
        let command = if explicit {
            Command::ProjectPosition { projection, slide }
        } else {
            Command::UpdatePosition { projection, slide }
        };

        let mut actions = Vec::new();
        actions.extend(self.send(command));
        if changed {
            actions.push(Action::Notify(Notice::PositionChanged { projection, slide, origin: origin.clone() }));
        }

        if projection != before_projection {
            actions.extend(self.reset_queue());
        } else if changed && !origin.is_loop_queue() && self.queue.sync_with_free_navigation(slide) {
            let index = self.queue.index();
            actions.extend(self.send(Command::UpdateLoop { queue_index: index }));
            actions.push(Action::Notify(Notice::QueueIndexChanged(index)));
        }

        actions.extend(self.refresh_view());
        actions
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Apply one inbound frame.
    pub fn handle_frame(&mut self, frame: &Frame) -> Vec<Action> {
        match frame.status {
            Status::Request => match Event::from_frame(frame) {
                Ok(event) => self.handle_event(event),
                Err(e) => {
                    warn!(syscall = %frame.syscall, error = %e, "reconciler: undecodable event");
                    Vec::new()
                }
            },
            Status::Done => self.handle_reply(frame),
            Status::Error => {
                let message = frame.error_message().unwrap_or("request failed").to_owned();
                warn!(syscall = %frame.syscall, %message, "reconciler: request rejected");
                vec![Action::Notify(Notice::Rejected {
                    syscall: frame.syscall.clone(),
                    code: frame.get_str(FRAME_CODE).map(str::to_owned),
                    message,
                })]
            }
        }
    }

    pub fn handle_event(&mut self, event: Event) -> Vec<Action> {
        match event {
            Event::Connected { connection_id, is_local } => self.connected(&connection_id, is_local),
            Event::PositionChanged { projection, slide, effective_view, origin } => {
                self.apply_remote_position(projection, slide, effective_view, origin.as_deref())
            }
            Event::OverrideChanged { flags } => {
                self.flags = flags;
                let mut actions = vec![Action::Notify(Notice::FlagsChanged(flags))];
                actions.extend(self.refresh_view());
                actions
            }
            Event::ViewChanged { effective_view } => self.set_view(effective_view).into_iter().collect(),
            Event::MessageChanged { message, remaining, progress } => {
                self.message = message.clone();
                vec![Action::Notify(Notice::MessageChanged { message, remaining, progress })]
            }
            Event::MessageProgressRequest { consumer } => vec![Action::Notify(Notice::ProgressRequested { consumer })],
            Event::QueueReordered { from, to } => match self.apply_reorder(from, to) {
                Ok(()) => vec![Action::Notify(Notice::ShowChanged)],
                Err(e) => {
                    warn!(from, to, error = %e, "reconciler: reorder does not fit local show");
                    Vec::new()
                }
            },
            Event::ControllerPresence { has_any } => {
                self.has_controller = has_any;
                vec![Action::Notify(Notice::ControllerPresence(has_any))]
            }
            Event::VideoRequested { layer, consumer } => {
                if self.role != Role::Controller {
                    debug!(%layer, %consumer, "reconciler: ignoring video request on display");
                    return Vec::new();
                }
                let answer = MediaHandshake::answer(&self.player, layer, &consumer);
                self.send(answer).into_iter().collect()
            }
            Event::VideoState { layer, is_playing, time } => {
                let state = PlaybackState { is_playing, time };
                if !self.media.accept(layer, state) {
                    debug!(%layer, time, "reconciler: unexpected video state");
                    return Vec::new();
                }
                self.player.seek(layer, state);
                vec![Action::Notify(Notice::Seeked { layer, state })]
            }
            Event::LoopChanged { queue_index } => {
                self.queue.set_index(queue_index);
                vec![Action::Notify(Notice::QueueIndexChanged(self.queue.index()))]
            }
            Event::SettingsChanged { settings } => self.set_settings(settings),
            Event::TunnelChanged { status } => self.set_tunnel(status),
            Event::GatewayError { message } => vec![Action::Notify(Notice::Rejected {
                syscall: syscall::GATEWAY_ERROR.to_owned(),
                code: None,
                message,
            })],
        }
    }

    fn handle_reply(&mut self, frame: &Frame) -> Vec<Action> {
        match frame.syscall.as_str() {
            syscall::SCREEN_INIT => match Snapshot::from_data(&frame.data) {
                Ok(snapshot) => self.apply_snapshot(snapshot),
                Err(e) => {
                    warn!(error = %e, "reconciler: bad snapshot");
                    Vec::new()
                }
            },
            syscall::SETTINGS_INIT | syscall::SETTINGS_UPDATE => match settings_from_data(&frame.data) {
                Ok(settings) => self.set_settings(settings),
                Err(e) => {
                    warn!(error = %e, "reconciler: bad settings reply");
                    Vec::new()
                }
            },
            syscall::TUNNEL_STATUS | syscall::TUNNEL_TOGGLE => self.set_tunnel(TunnelStatus::from_data(&frame.data)),
            syscall::CONTROLLER_HAS_ANY => Event::from_frame(frame)
                .map(|event| self.handle_event(event))
                .unwrap_or_default(),
            syscall::MESSAGE_SYNC => {
                // Only carries the banner when no primary controller exists.
                let as_broadcast = Frame { syscall: syscall::MESSAGE_CHANGED.to_owned(), ..frame.clone() };
                Event::from_frame(&as_broadcast)
                    .map(|event| self.handle_event(event))
                    .unwrap_or_default()
            }
            _ => Vec::new(),
        }
    }

    fn apply_remote_position(
        &mut self,
        projection: usize,
        slide: usize,
        effective_view: EffectiveView,
        origin: Option<&str>,
    ) -> Vec<Action> {
        if self.synced && origin.is_some() && origin == self.connection_id.as_deref() {
            debug!(projection, slide, "reconciler: suppressed own echo");
            return Vec::new();
        }

        let before = self.control.projection();
        let changed = self.control.set_position(projection, slide, Origin::Remote);
        let mut actions = Vec::new();
        if changed {
            actions.push(Action::Notify(Notice::PositionChanged {
                projection: self.control.projection(),
                slide: self.control.slide(),
                origin: Origin::Remote,
            }));
        }

        if self.control.projection() != before {
            actions.extend(self.reset_queue());
        } else if changed && self.queue.sync_with_free_navigation(self.control.slide()) {
            actions.push(Action::Notify(Notice::QueueIndexChanged(self.queue.index())));
        }

        actions.extend(self.set_view(effective_view));
        actions
    }

    fn apply_snapshot(&mut self, snapshot: Snapshot) -> Vec<Action> {
        if self.unsent > 0 {
            info!(discarded = self.unsent, "reconciler: resynced from snapshot, unsent commands dropped");
        }
        self.unsent = 0;

        self.control.set_layout(snapshot.show.as_ref().map(Show::slide_counts).unwrap_or_default());
        self.show = snapshot.show;
        self.control.set_position(snapshot.projection, snapshot.slide, Origin::Remote);
        self.queue
            .reset_on_projection_switch(self.show.as_ref().and_then(|s| s.projection(self.control.projection())));
        self.queue.set_index(snapshot.queue_index);

        self.flags = snapshot.flags;
        self.view = EffectiveView::from_index(snapshot.effective_view)
            .unwrap_or_else(|| resolve(&self.flags, self.control.slide()));
        self.message = snapshot.message;
        self.has_controller = snapshot.has_controller;
        self.synced = true;

        info!(
            projection = self.control.projection(),
            slide = self.control.slide(),
            view = %self.view,
            "reconciler: synced"
        );

        vec![
            Action::Notify(Notice::Synced),
            Action::Notify(Notice::ShowChanged),
            Action::Notify(Notice::PositionChanged {
                projection: self.control.projection(),
                slide: self.control.slide(),
                origin: Origin::Remote,
            }),
            Action::Notify(Notice::FlagsChanged(self.flags)),
            Action::Notify(Notice::ViewChanged(self.view)),
            Action::Notify(Notice::MessageChanged { message: self.message.clone(), remaining: None, progress: None }),
            Action::Notify(Notice::ControllerPresence(self.has_controller)),
            Action::Notify(Notice::QueueIndexChanged(self.queue.index())),
        ]
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn apply_reorder(&mut self, from: usize, to: usize) -> Result<(), String> {
        let Some(show) = self.show.as_mut() else {
            return Err("no show loaded".to_owned());
        };
        show.move_projection(from, to).map_err(|e| e.to_string())?;
        let counts = show.slide_counts();
        let projection = follow_moved_index(self.control.projection(), from, to);
        let slide = self.control.slide();
        let origin = self.control.origin().clone();
        self.control.set_layout(counts);
        self.control.set_position(projection, slide, origin);
        Ok(())
    }

    fn reset_queue(&mut self) -> Vec<Action> {
        let projection = self.show.as_ref().and_then(|s| s.projection(self.control.projection()));
        let was = self.queue.index();
        self.queue.reset_on_projection_switch(projection);
        if was == self.queue.index() {
            return Vec::new();
        }
        vec![Action::Notify(Notice::QueueIndexChanged(self.queue.index()))]
    }

    fn refresh_view(&mut self) -> Option<Action> {
        self.set_view(resolve(&self.flags, self.control.slide()))
    }

    fn set_view(&mut self, view: EffectiveView) -> Option<Action> {
        if self.view == view {
            return None;
        }
        self.view = view;
        Some(Action::Notify(Notice::ViewChanged(view)))
    }

    fn set_settings(&mut self, settings: Settings) -> Vec<Action> {
        if self.settings.as_ref().is_some_and(|s| s.revision() == settings.revision()) {
            return Vec::new();
        }
        self.settings = Some(settings.clone());
        vec![Action::Notify(Notice::SettingsChanged(settings))]
    }

    fn set_tunnel(&mut self, status: TunnelStatus) -> Vec<Action> {
        self.tunnel = status.clone();
        vec![Action::Notify(Notice::TunnelChanged(status))]
    }
}

/// Commands in `actions`, in order.
pub fn commands(actions: &[Action]) -> Vec<&Command> {
    actions
        .iter()
        .filter_map(|action| match action {
            Action::Send(command) => Some(command),
            Action::Notify(_) => None,
        })
        .collect()
}

#[cfg(test)]
#[path = "reconciler_test.rs"]
mod tests;
