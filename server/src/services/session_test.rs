use super::*;
use control::content::{ItemKind, LoopStep, Projection, ProjectionItem};

// =============================================================================
// HELPERS
// =============================================================================

#[derive(Default)]
struct RecordingFanout {
    sent: Vec<(Audience, Option<String>, Event)>,
}

impl Fanout for RecordingFanout {
    fn deliver(&mut self, audience: Audience, from: Option<&str>, event: Event) {
        self.sent.push((audience, from.map(str::to_owned), event));
    }
}

impl RecordingFanout {
    fn take(&mut self) -> Vec<(Audience, Option<String>, Event)> {
        std::mem::take(&mut self.sent)
    }

    fn events(&mut self) -> Vec<Event> {
        self.take().into_iter().map(|(_, _, e)| e).collect()
    }
}

#[derive(Default)]
struct MemoryStore {
    saved: Vec<Settings>,
}

impl SettingsStore for MemoryStore {
    fn save(&mut self, settings: &Settings) {
        self.saved.push(settings.clone());
    }
}

fn text(content: &str, group: Option<&str>) -> ProjectionItem {
    ProjectionItem {
        kind: ItemKind::Text,
        content: content.into(),
        bg: None,
        group: group.map(str::to_owned),
        transition: None,
    }
}

fn show() -> Show {
    let first = Projection {
        title: "Welcome".into(),
        bg: None,
        contents: (0..5).map(|i| text(&format!("w{i}"), None)).collect(),
        loop_queue: vec![LoopStep::item(1), LoopStep::item(3), LoopStep::item(5)],
        transition: None,
    };
    let second = Projection {
        title: "Songs".into(),
        bg: None,
        contents: vec![text("a", Some("Verse")), text("b", Some("Chorus"))],
        loop_queue: Vec::new(),
        transition: None,
    };
    Show { projections: vec![first, second] }
}

fn session() -> Session<MemoryStore> {
    Session::new(Settings::default(), Some(show()), MemoryStore::default())
}

fn unbounded() -> Session<MemoryStore> {
    Session::new(Settings::default(), None, MemoryStore::default())
}

fn position(projection: usize, slide: usize) -> Command {
    Command::UpdatePosition { projection, slide }
}

// =============================================================================
// POSITION
// =============================================================================

#[test]
fn position_update_broadcasts_with_origin() {
    let mut s = session();
    let mut fanout = RecordingFanout::default();
    s.handle("a", position(0, 3), &mut fanout).expect("update");

    let sent = fanout.take();
    assert_eq!(sent.len(), 1);
    let (audience, from, event) = &sent[0];
    assert_eq!(audience, &Audience::All);
    assert_eq!(from.as_deref(), Some("a"));
    assert_eq!(
        event,
        &Event::PositionChanged {
            projection: 0,
            slide: 3,
            effective_view: EffectiveView::Slide(3),
            origin: Some("a".into()),
        }
    );
}

#[test]
fn unchanged_position_is_not_broadcast() {
    let mut s = session();
    let mut fanout = RecordingFanout::default();
    s.handle("a", position(0, 2), &mut fanout).expect("update");
    fanout.take();

    s.handle("b", position(0, 2), &mut fanout).expect("update");
    assert!(fanout.take().is_empty());
}

#[test]
fn out_of_range_position_is_clamped() {
    let mut s = session();
    let mut fanout = RecordingFanout::default();
    s.handle("a", position(7, 40), &mut fanout).expect("update");
    assert_eq!(s.position(), (1, 1));
}

#[test]
fn without_show_positions_are_unbounded() {
    let mut s = unbounded();
    let mut fanout = RecordingFanout::default();
    s.handle("a", position(12, 99), &mut fanout).expect("update");
    assert_eq!(s.position(), (12, 99));
}

#[test]
fn explicit_project_clears_stopped_without_move() {
    let mut s = session();
    let mut fanout = RecordingFanout::default();
    s.handle("a", Command::SetOverride { flag: Flag::Stopped, active: true }, &mut fanout)
        .expect("override");
    fanout.take();

    s.handle("a", Command::ProjectPosition { projection: 0, slide: 0 }, &mut fanout)
        .expect("project");
    let events = fanout.events();
    assert!(!s.flags().stopped);
    assert!(matches!(events[0], Event::OverrideChanged { flags } if !flags.stopped));
    assert!(matches!(
        events[1],
        Event::PositionChanged { effective_view: EffectiveView::Slide(0), .. }
    ));
}

#[test]
fn explicit_project_without_stopped_is_plain_update() {
    let mut s = session();
    let mut fanout = RecordingFanout::default();
    s.handle("a", Command::ProjectPosition { projection: 0, slide: 0 }, &mut fanout)
        .expect("project");
    assert!(fanout.take().is_empty());
}

#[test]
fn projection_change_resets_loop_index() {
    let mut s = session();
    let mut fanout = RecordingFanout::default();
    s.handle("a", Command::UpdateLoop { queue_index: 1 }, &mut fanout).expect("loop");
    assert_eq!(s.loop_index(), 1);

    s.handle("a", position(0, 4), &mut fanout).expect("same projection");
    assert_eq!(s.loop_index(), 1);

    s.handle("a", position(1, 0), &mut fanout).expect("switch");
    assert_eq!(s.loop_index(), -1);
}

// =============================================================================
// OVERRIDES
// =============================================================================

#[test]
fn two_controller_override_scenario() {
    let mut s = session();
    let mut fanout = RecordingFanout::default();

    s.handle("A", position(0, 3), &mut fanout).expect("A moves");
    fanout.take();

    s.handle("B", Command::SetOverride { flag: Flag::Black, active: true }, &mut fanout)
        .expect("B blacks");
    let events = fanout.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1], Event::ViewChanged { effective_view: EffectiveView::Black });

    s.handle("A", Command::SetOverride { flag: Flag::Stopped, active: true }, &mut fanout)
        .expect("A stops");
    let events = fanout.events();
    assert_eq!(events[1], Event::ViewChanged { effective_view: EffectiveView::Stopped });

    s.handle("B", Command::SetOverride { flag: Flag::Black, active: false }, &mut fanout)
        .expect("B unblacks");
    let events = fanout.events();
    // Flags always go out; the view did not change.
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], Event::OverrideChanged { flags } if flags.stopped && !flags.black));
    assert_eq!(s.effective_view(), EffectiveView::Stopped);
}

// =============================================================================
// MESSAGE
// =============================================================================

#[test]
fn toggle_inverts_unless_forced() {
    let mut s = session();
    let mut fanout = RecordingFanout::default();
    s.handle("a", Command::ToggleMessage { text: "Hi".into(), force_open: None }, &mut fanout)
        .expect("toggle");
    assert!(s.message().is_open);
    s.handle("a", Command::ToggleMessage { text: "Hi".into(), force_open: None }, &mut fanout)
        .expect("toggle");
    assert!(!s.message().is_open);
    s.handle("a", Command::ToggleMessage { text: "Bye".into(), force_open: Some(true) }, &mut fanout)
        .expect("toggle");
    assert_eq!(s.message(), &LiveMessage { text: "Bye".into(), is_open: true });
}

#[test]
fn sync_goes_to_primary_or_answers_directly() {
    let mut s = session();
    let mut fanout = RecordingFanout::default();

    let reply = s.handle("display", Command::SyncMessage, &mut fanout).expect("sync");
    assert!(matches!(reply, Reply::Data(ref d) if d.contains_key("is_open")));

    s.handle("ctl", Command::RegisterController { connection_id: "ctl".into() }, &mut fanout)
        .expect("register");
    fanout.take();
    assert_eq!(s.handle("display", Command::SyncMessage, &mut fanout).expect("sync"), Reply::Done);
    assert_eq!(
        fanout.take(),
        vec![(
            Audience::Only("ctl".into()),
            None,
            Event::MessageProgressRequest { consumer: "display".into() }
        )]
    );
}

#[test]
fn progress_is_relayed_to_consumer_only() {
    let mut s = session();
    let mut fanout = RecordingFanout::default();
    s.handle(
        "ctl",
        Command::ReportMessageProgress { consumer: "display".into(), remaining: 2, progress: 0.25 },
        &mut fanout,
    )
    .expect("progress");
    let sent = fanout.take();
    assert_eq!(sent[0].0, Audience::Only("display".into()));
    assert!(matches!(sent[0].2, Event::MessageChanged { remaining: Some(2), .. }));
}

// =============================================================================
// REGISTRY
// =============================================================================

#[test]
fn registry_keeps_order_and_promotes_next() {
    let mut s = session();
    let mut fanout = RecordingFanout::default();
    for id in ["a", "b", "a"] {
        s.handle(id, Command::RegisterController { connection_id: id.into() }, &mut fanout)
            .expect("register");
    }
    assert_eq!(s.controllers(), ["a".to_owned(), "b".to_owned()]);
    assert_eq!(s.primary(), Some("a"));

    s.disconnect("a", &mut fanout);
    assert_eq!(s.primary(), Some("b"));
}

#[test]
fn registering_someone_else_is_forbidden() {
    let mut s = session();
    let mut fanout = RecordingFanout::default();
    let err = s
        .handle("a", Command::RegisterController { connection_id: "b".into() }, &mut fanout)
        .expect_err("foreign id");
    assert_eq!(err.error_code(), "E_FORBIDDEN");
    assert!(s.controllers().is_empty());
}

#[test]
fn last_controller_leaving_clears_message() {
    let mut s = session();
    let mut fanout = RecordingFanout::default();
    s.handle("ctl", Command::RegisterController { connection_id: "ctl".into() }, &mut fanout)
        .expect("register");
    let register = fanout.take();
    assert_eq!(
        register,
        vec![(Audience::AllExcept("ctl".into()), None, Event::ControllerPresence { has_any: true })]
    );

    s.handle("ctl", Command::ToggleMessage { text: "Welcome".into(), force_open: Some(true) }, &mut fanout)
        .expect("toggle");
    fanout.take();

    s.disconnect("ctl", &mut fanout);
    let events = fanout.events();
    assert_eq!(events[0], Event::ControllerPresence { has_any: false });
    assert_eq!(
        events[1],
        Event::MessageChanged { message: LiveMessage::default(), remaining: None, progress: None }
    );
    assert!(!s.message().is_open);
    assert!(s.message().text.is_empty());
}

#[test]
fn disconnect_of_non_controller_is_silent() {
    let mut s = session();
    let mut fanout = RecordingFanout::default();
    s.disconnect("display", &mut fanout);
    assert!(fanout.take().is_empty());
}

// =============================================================================
// MEDIA HANDSHAKE
// =============================================================================

#[test]
fn video_request_reaches_primary_and_response_reaches_consumer() {
    let mut s = session();
    let mut fanout = RecordingFanout::default();
    s.handle("ctl", Command::RegisterController { connection_id: "ctl".into() }, &mut fanout)
        .expect("register");
    fanout.take();

    s.handle("display", Command::RequestVideo { layer: Layer::Background }, &mut fanout)
        .expect("request");
    assert_eq!(
        fanout.take(),
        vec![(
            Audience::Only("ctl".into()),
            None,
            Event::VideoRequested { layer: Layer::Background, consumer: "display".into() }
        )]
    );

    s.handle(
        "ctl",
        Command::RespondVideo { layer: Layer::Background, consumer: "display".into(), is_playing: true, time: 8.5 },
        &mut fanout,
    )
    .expect("response");
    assert_eq!(
        fanout.take(),
        vec![(
            Audience::Only("display".into()),
            Some("ctl".into()),
            Event::VideoState { layer: Layer::Background, is_playing: true, time: 8.5 }
        )]
    );
}

#[test]
fn video_request_without_controller_is_dropped() {
    let mut s = session();
    let mut fanout = RecordingFanout::default();
    assert_eq!(
        s.handle("display", Command::RequestVideo { layer: Layer::Foreground }, &mut fanout)
            .expect("request"),
        Reply::Done
    );
    assert!(fanout.take().is_empty());
}

#[test]
fn negative_video_time_is_rejected() {
    let mut s = session();
    let mut fanout = RecordingFanout::default();
    let err = s
        .handle(
            "ctl",
            Command::RespondVideo { layer: Layer::Foreground, consumer: "d".into(), is_playing: false, time: -1.0 },
            &mut fanout,
        )
        .expect_err("negative time");
    assert_eq!(err.error_code(), "E_BAD_COMMAND");
}

// =============================================================================
// QUEUE
// =============================================================================

#[test]
fn reorder_moves_projection_and_follows_current() {
    let mut s = session();
    let mut fanout = RecordingFanout::default();
    s.handle("a", position(1, 1), &mut fanout).expect("move");
    fanout.take();

    s.handle("a", Command::ReorderQueue { from: 1, to: 0 }, &mut fanout).expect("reorder");
    assert_eq!(s.position(), (0, 1));
    assert_eq!(s.show().and_then(|sh| sh.projection(0)).map(|p| p.title.as_str()), Some("Songs"));
    assert_eq!(fanout.events(), vec![Event::QueueReordered { from: 1, to: 0 }]);
}

#[test]
fn reorder_out_of_range_fails_without_broadcast() {
    let mut s = session();
    let mut fanout = RecordingFanout::default();
    let err = s
        .handle("a", Command::ReorderQueue { from: 0, to: 5 }, &mut fanout)
        .expect_err("out of range");
    assert_eq!(err.error_code(), "E_BAD_COMMAND");
    assert!(fanout.take().is_empty());
}

#[test]
fn reorder_without_show_fails() {
    let mut s = unbounded();
    let mut fanout = RecordingFanout::default();
    let err = s
        .handle("a", Command::ReorderQueue { from: 0, to: 1 }, &mut fanout)
        .expect_err("no show");
    assert_eq!(err.error_code(), "E_NO_SHOW");
}

#[test]
fn loop_update_is_clamped_and_sent_to_others() {
    let mut s = session();
    let mut fanout = RecordingFanout::default();
    s.handle("a", Command::UpdateLoop { queue_index: 10 }, &mut fanout).expect("loop");
    assert_eq!(s.loop_index(), 2);
    assert_eq!(
        fanout.take(),
        vec![(Audience::AllExcept("a".into()), Some("a".into()), Event::LoopChanged { queue_index: 2 })]
    );

    s.handle("b", Command::UpdateLoop { queue_index: 2 }, &mut fanout).expect("loop");
    assert!(fanout.take().is_empty());
}

// =============================================================================
// SETTINGS + SNAPSHOT
// =============================================================================

#[test]
fn settings_update_regenerates_revision_and_persists() {
    let mut s = session();
    let mut fanout = RecordingFanout::default();
    let before = s.settings().revision().to_owned();

    let mut edited = s.settings().clone();
    edited.backdrop.color = "#112233ff".into();
    let reply = s
        .handle("a", Command::UpdateSettings { settings: edited }, &mut fanout)
        .expect("update");

    assert_ne!(s.settings().revision(), before);
    assert_eq!(s.settings().backdrop.color, "#112233ff");
    assert_eq!(s.store().saved.len(), 1);
    assert_eq!(s.store().saved[0].revision(), s.settings().revision());
    assert_eq!(reply, Reply::Data(settings_data(s.settings())));

    let sent = fanout.take();
    assert_eq!(sent[0].0, Audience::AllExcept("a".into()));
}

#[test]
fn snapshot_reflects_current_state() {
    let mut s = session();
    let mut fanout = RecordingFanout::default();
    s.handle("ctl", Command::RegisterController { connection_id: "ctl".into() }, &mut fanout)
        .expect("register");
    s.handle("ctl", position(0, 2), &mut fanout).expect("move");
    s.handle("ctl", Command::SetOverride { flag: Flag::Clear, active: true }, &mut fanout)
        .expect("clear");

    let snapshot = s.snapshot();
    assert_eq!((snapshot.projection, snapshot.slide), (0, 2));
    assert_eq!(snapshot.view(), Some(EffectiveView::Clear));
    assert!(snapshot.has_controller);
    assert_eq!(snapshot.show.as_ref().map(Show::len), Some(2));

    let reply = s.handle("late", Command::InitScreen, &mut fanout).expect("init");
    assert_eq!(reply, Reply::Data(snapshot.to_data()));
}

#[test]
fn tunnel_commands_are_not_session_commands() {
    let mut s = session();
    let mut fanout = RecordingFanout::default();
    let err = s.handle("a", Command::TunnelStatus, &mut fanout).expect_err("tunnel");
    assert_eq!(err.error_code(), "E_UNKNOWN_SYSCALL");
}
