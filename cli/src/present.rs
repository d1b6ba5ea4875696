//! Line commands for the interactive `present` controller.

use std::str::FromStr;

use control::content::GroupRef;
use control::media::Layer;
use control::precedence::Flag;
use control::reconciler::{Action, Reconciler};

use crate::player::ClockPlayer;

pub const HELP: &str = "\
n | next            next slide
p | prev            previous slide
N | next-projection next projection
P | prev-projection previous projection
l | loop            next loop queue step
L | loop-back       previous loop queue step
goto <p> <s>        move to projection p, slide s
project <p> <s>     project p/s and clear stopped
group <n|label>     jump to a group in the current projection
<flag>              toggle stopped|transparent|cover|black|clear
msg <text>          toggle the live message
reorder <from> <to> move a projection in the queue
video <layer>       load or pause background|foreground
tunnel on|off       toggle the public tunnel
status              print the current state
help | quit";

#[derive(Clone, Debug, PartialEq)]
pub enum Input {
    Next,
    Prev,
    NextProjection,
    PrevProjection,
    LoopNext,
    LoopPrev,
    Goto { projection: usize, slide: usize },
    Project { projection: usize, slide: usize },
    Group(GroupRef),
    Toggle(Flag),
    Message(String),
    Reorder { from: usize, to: usize },
    Video(Layer),
    Tunnel(bool),
    Status,
    Help,
    Quit,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("unknown command `{0}`; try `help`")]
    Unknown(String),
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("invalid {name}: `{value}`")]
    Invalid { name: &'static str, value: String },
}

/// Parse one input line.
pub fn parse(line: &str) -> Result<Input, InputError> {
    let line = line.trim();
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let mut args = rest.split_whitespace();

    let input = match word {
        "n" | "next" => Input::Next,
        "p" | "prev" => Input::Prev,
        "N" | "next-projection" => Input::NextProjection,
        "P" | "prev-projection" => Input::PrevProjection,
        "l" | "loop" => Input::LoopNext,
        "L" | "loop-back" => Input::LoopPrev,
        "goto" => Input::Goto { projection: arg(&mut args, "projection")?, slide: arg(&mut args, "slide")? },
        "project" => Input::Project { projection: arg(&mut args, "projection")?, slide: arg(&mut args, "slide")? },
        "group" => {
            if rest.is_empty() {
                return Err(InputError::Missing("group"));
            }
            match rest.parse::<usize>() {
                Ok(ordinal) => Input::Group(GroupRef::Ordinal(ordinal)),
                Err(_) => Input::Group(GroupRef::Label(rest.to_owned())),
            }
        }
        "msg" => Input::Message(rest.to_owned()),
        "reorder" => Input::Reorder { from: arg(&mut args, "from")?, to: arg(&mut args, "to")? },
        "video" => Input::Video(arg(&mut args, "layer")?),
        "tunnel" => match args.next() {
            Some("on") => Input::Tunnel(true),
            Some("off") => Input::Tunnel(false),
            Some(other) => return Err(InputError::Invalid { name: "tunnel state", value: other.to_owned() }),
            None => return Err(InputError::Missing("tunnel state")),
        },
        "status" => Input::Status,
        "help" | "?" => Input::Help,
        "quit" | "exit" | "q" => Input::Quit,
        other => match Flag::from_str(other) {
            Ok(flag) => Input::Toggle(flag),
            Err(_) => return Err(InputError::Unknown(other.to_owned())),
        },
    };
    Ok(input)
}

fn arg<'a, T: FromStr>(args: &mut impl Iterator<Item = &'a str>, name: &'static str) -> Result<T, InputError> {
    let value = args.next().ok_or(InputError::Missing(name))?;
    value.parse().map_err(|_| InputError::Invalid { name, value: value.to_owned() })
}

/// Apply a parsed input to the controller surface.
pub fn apply(reconciler: &mut Reconciler<ClockPlayer>, input: Input) -> Vec<Action> {
    match input {
        Input::Next => reconciler.step_slide(1),
        Input::Prev => reconciler.step_slide(-1),
        Input::NextProjection => reconciler.step_projection(1),
        Input::PrevProjection => reconciler.step_projection(-1),
        Input::LoopNext => reconciler.advance_queue(1),
        Input::LoopPrev => reconciler.advance_queue(-1),
        Input::Goto { projection, slide } => reconciler.goto(projection, slide),
        Input::Project { projection, slide } => reconciler.project(projection, slide),
        Input::Group(group) => reconciler.goto_group(&group),
        Input::Toggle(flag) => {
            let active = !reconciler.flags().get(flag);
            reconciler.set_flag(flag, active)
        }
        Input::Message(text) => reconciler.toggle_message(&text, None),
        Input::Reorder { from, to } => reconciler.reorder_queue(from, to),
        Input::Video(layer) => {
            let player = reconciler.player_mut();
            if player.toggle_pause(layer).is_none() {
                player.load(layer);
            }
            Vec::new()
        }
        Input::Tunnel(enable) => reconciler.toggle_tunnel(enable),
        Input::Status | Input::Help | Input::Quit => Vec::new(),
    }
}

#[cfg(test)]
#[path = "present_test.rs"]
mod tests;
