use super::*;
use control::media::MediaPlayer;
use control::content::Show;
use control::protocol::{Command, LiveMessage, Snapshot, syscall};
use control::reconciler::{Role, commands};
use frames::Frame;

const SHOW_JSON: &str = r#"{
    "projections": [
        { "title": "Songs", "contents": [
            { "type": "text", "content": "v1", "group": "Verse" },
            { "type": "text", "content": "v2" },
            { "type": "text", "content": "c1", "group": "Chorus" }
        ], "loop_queue": [{ "group": "Chorus" }, { "item": 1 }] },
        { "title": "Close", "contents": [{ "type": "text", "content": "bye" }] }
    ]
}"#;

fn controller() -> Reconciler<ClockPlayer> {
    let mut r = Reconciler::new(Role::Controller, ClockPlayer::default());
    r.connected("me", true);
    let snapshot = Snapshot {
        effective_view: 0,
        message: LiveMessage::default(),
        has_controller: true,
        queue_index: -1,
        show: Some(Show::from_json(SHOW_JSON).expect("show")),
        ..Snapshot::default()
    };
    let reply = Frame::request(syscall::SCREEN_INIT, serde_json::Map::new()).done_with(snapshot.to_data());
    r.handle_frame(&reply);
    r
}

fn sent(actions: &[Action]) -> Vec<Command> {
    commands(actions).into_iter().cloned().collect()
}

// =============================================================================
// PARSE
// =============================================================================

#[test]
fn parses_navigation_shortcuts() {
    assert_eq!(parse("n"), Ok(Input::Next));
    assert_eq!(parse("  prev "), Ok(Input::Prev));
    assert_eq!(parse("N"), Ok(Input::NextProjection));
    assert_eq!(parse("loop-back"), Ok(Input::LoopPrev));
    assert_eq!(parse("goto 1 2"), Ok(Input::Goto { projection: 1, slide: 2 }));
}

#[test]
fn parses_groups_by_ordinal_or_label() {
    assert_eq!(parse("group 2"), Ok(Input::Group(GroupRef::Ordinal(2))));
    assert_eq!(parse("group Bridge 2"), Ok(Input::Group(GroupRef::Label("Bridge 2".into()))));
    assert_eq!(parse("group"), Err(InputError::Missing("group")));
}

#[test]
fn parses_flags_and_arguments() {
    assert_eq!(parse("black"), Ok(Input::Toggle(Flag::Black)));
    assert_eq!(parse("video foreground"), Ok(Input::Video(Layer::Foreground)));
    assert_eq!(parse("msg Doors close in 5"), Ok(Input::Message("Doors close in 5".into())));
    assert_eq!(parse("tunnel on"), Ok(Input::Tunnel(true)));
}

#[test]
fn rejects_bad_input() {
    assert_eq!(parse("sepia"), Err(InputError::Unknown("sepia".into())));
    assert_eq!(parse("goto 1"), Err(InputError::Missing("slide")));
    assert_eq!(parse("goto x 1"), Err(InputError::Invalid { name: "projection", value: "x".into() }));
    assert_eq!(parse("tunnel maybe"), Err(InputError::Invalid { name: "tunnel state", value: "maybe".into() }));
}

// =============================================================================
// APPLY
// =============================================================================

#[test]
fn next_sends_position_update() {
    let mut r = controller();
    let actions = apply(&mut r, Input::Next);
    assert_eq!(sent(&actions)[0], Command::UpdatePosition { projection: 0, slide: 1 });
}

#[test]
fn flag_input_toggles_current_state() {
    let mut r = controller();
    let on = apply(&mut r, Input::Toggle(Flag::Cover));
    assert_eq!(sent(&on), vec![Command::SetOverride { flag: Flag::Cover, active: true }]);
    let off = apply(&mut r, Input::Toggle(Flag::Cover));
    assert_eq!(sent(&off), vec![Command::SetOverride { flag: Flag::Cover, active: false }]);
}

#[test]
fn loop_follows_queue_then_reports_index() {
    let mut r = controller();
    let actions = apply(&mut r, Input::LoopNext);
    assert_eq!(
        sent(&actions),
        vec![Command::UpdatePosition { projection: 0, slide: 2 }, Command::UpdateLoop { queue_index: 0 }]
    );
}

#[test]
fn group_label_jumps_within_projection() {
    let mut r = controller();
    let actions = apply(&mut r, Input::Group(GroupRef::Label("Chorus".into())));
    assert_eq!(sent(&actions)[0], Command::UpdatePosition { projection: 0, slide: 2 });
}

#[test]
fn video_loads_then_pauses_local_player() {
    let mut r = controller();
    assert!(apply(&mut r, Input::Video(Layer::Background)).is_empty());
    assert!(r.player().playback(Layer::Background).is_some());
    apply(&mut r, Input::Video(Layer::Background));
    let state = control::media::MediaPlayer::playback(r.player(), Layer::Background).expect("loaded");
    assert!(!state.is_playing);
}
