//! One-line renderings of reconciler notices.

use control::precedence::{Flag, OverrideFlags};
use control::protocol::TunnelStatus;
use control::reconciler::Notice;

#[must_use]
pub fn describe(notice: &Notice) -> String {
    match notice {
        Notice::Synced => "synced".to_owned(),
        Notice::ShowChanged => "show changed".to_owned(),
        Notice::PositionChanged { projection, slide, origin } => {
            format!("position {projection}:{slide} ({origin})")
        }
        Notice::ViewChanged(view) => format!("view {view}"),
        Notice::FlagsChanged(flags) => format!("flags [{}]", active_flags(flags)),
        Notice::MessageChanged { message, remaining, progress } => {
            let state = if message.is_open { "open" } else { "closed" };
            let mut line = format!("message {state} {:?}", message.text);
            if let (Some(remaining), Some(progress)) = (remaining, progress) {
                line.push_str(&format!(" remaining={remaining} progress={progress:.2}"));
            }
            line
        }
        Notice::ProgressRequested { consumer } => format!("progress requested by {consumer}"),
        Notice::QueueIndexChanged(index) => format!("loop index {index}"),
        Notice::ControllerPresence(has_any) => {
            if *has_any { "controller present".to_owned() } else { "no controller".to_owned() }
        }
        Notice::SettingsChanged(settings) => format!("settings revision {}", settings.revision()),
        Notice::TunnelChanged(status) => format!("tunnel {}", tunnel(status)),
        Notice::Seeked { layer, state } => {
            let verb = if state.is_playing { "playing" } else { "paused" };
            format!("{layer} video {verb} at {:.2}s", state.time)
        }
        Notice::Rejected { syscall, code, message } => {
            format!("rejected {syscall} [{}]: {message}", code.as_deref().unwrap_or("-"))
        }
    }
}

/// Active flags in precedence order, or `none`.
#[must_use]
pub fn active_flags(flags: &OverrideFlags) -> String {
    let active: Vec<&str> = Flag::PRIORITY.into_iter().filter(|flag| flags.get(*flag)).map(Flag::as_str).collect();
    if active.is_empty() { "none".to_owned() } else { active.join(",") }
}

#[must_use]
pub fn tunnel(status: &TunnelStatus) -> String {
    match (status.active, &status.url, &status.error) {
        (None, _, _) => "loading".to_owned(),
        (Some(true), Some(url), _) => format!("on {url}"),
        (Some(true), None, _) => "on".to_owned(),
        (Some(false), _, Some(error)) => format!("off ({error})"),
        (Some(false), _, None) => "off".to_owned(),
    }
}

#[cfg(test)]
#[path = "render_test.rs"]
mod tests;
