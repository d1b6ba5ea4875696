mod connection;
mod player;
mod present;
mod render;

use std::collections::VecDeque;
use std::io::Read;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use frames::Frame;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::filter::LevelFilter;

use control::content::GroupRef;
use control::media::{Layer, MediaPlayer, NoMedia};
use control::precedence::Flag;
use control::protocol::{Command as Wire, TunnelStatus};
use control::reconciler::{Action, Notice, Reconciler, Role, commands};
use control::settings::Settings;

use crate::connection::Connection;
use crate::player::ClockPlayer;
use crate::present::Input;

const SYNC_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("health check failed: HTTP {0}")]
    Unhealthy(u16),
    #[error("websocket connect failed: {0}")]
    WsConnect(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("websocket closed")]
    WsClosed,
    #[error("frame decode failed: {0}")]
    Decode(#[from] frames::CodecError),
    #[error("timed out waiting for websocket frame")]
    Timeout,
    #[error("server returned {code} for {syscall}: {message}")]
    ServerError { syscall: String, code: String, message: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "cast", about = "Presentation relay controller and viewer")]
struct Cli {
    #[arg(long, env = "CAST_SERVER_URL", default_value = "http://127.0.0.1:3000")]
    server_url: String,

    /// Log engine diagnostics to stderr.
    #[arg(long, short, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check `/healthz`.
    Ping,
    /// Print the full session snapshot.
    Snapshot,
    /// Move to a position.
    Goto {
        projection: usize,
        slide: usize,
        /// Project explicitly, clearing `stopped`.
        #[arg(long, default_value_t = false)]
        project: bool,
    },
    /// Next slide in the current projection.
    Next,
    /// Previous slide in the current projection.
    Prev,
    /// Step the loop queue.
    Loop {
        #[arg(value_enum)]
        direction: Direction,
    },
    /// Jump to a group (1-based ordinal or label) in the current projection.
    Group { group: String },
    /// Set an override flag.
    Flag {
        flag: Flag,
        #[arg(value_enum)]
        state: Switch,
    },
    /// Toggle the live message.
    Message(MessageArgs),
    /// Move a projection within the queue.
    Reorder { from: usize, to: usize },
    Settings(SettingsCommand),
    Tunnel {
        #[arg(value_enum)]
        action: TunnelAction,
    },
    /// Follow the session as a display and print every change.
    Watch(SurfaceArgs),
    /// Drive the session as a controller from stdin.
    Present(SurfaceArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Direction {
    Next,
    Prev,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Switch {
    On,
    Off,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TunnelAction {
    Status,
    On,
    Off,
}

#[derive(Args, Debug)]
struct MessageArgs {
    #[arg(default_value = "")]
    text: String,
    #[arg(long, conflicts_with = "close")]
    open: bool,
    #[arg(long)]
    close: bool,
}

#[derive(Args, Debug)]
struct SettingsCommand {
    #[command(subcommand)]
    command: SettingsSubcommand,
}

#[derive(Subcommand, Debug)]
enum SettingsSubcommand {
    Get,
    /// Replace the settings record with a JSON document.
    Set {
        #[arg(default_value = "-", help = "Input file path, or - for stdin")]
        input: String,
    },
}

#[derive(Args, Debug)]
struct SurfaceArgs {
    /// Video layers loaded on this surface.
    #[arg(long = "video", value_enum)]
    videos: Vec<VideoLayer>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum VideoLayer {
    Background,
    Foreground,
}

impl From<VideoLayer> for Layer {
    fn from(layer: VideoLayer) -> Self {
        match layer {
            VideoLayer::Background => Layer::Background,
            VideoLayer::Foreground => Layer::Foreground,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let level = if cli.verbose { LevelFilter::DEBUG } else { LevelFilter::WARN };
    tracing_subscriber::fmt().with_writer(std::io::stderr).with_max_level(level).init();

    let url = cli.server_url.as_str();
    match cli.command {
        Command::Ping => run_ping(url).await,
        Command::Snapshot => {
            let reply = one_shot(url, &Wire::InitScreen).await?;
            print_json(&reply.data)
        }
        Command::Goto { projection, slide, project } => {
            let command = if project {
                Wire::ProjectPosition { projection, slide }
            } else {
                Wire::UpdatePosition { projection, slide }
            };
            one_shot(url, &command).await.map(drop)
        }
        Command::Next => run_stateful(url, |r| r.step_slide(1)).await,
        Command::Prev => run_stateful(url, |r| r.step_slide(-1)).await,
        Command::Loop { direction } => {
            let delta = match direction {
                Direction::Next => 1,
                Direction::Prev => -1,
            };
            run_stateful(url, |r| r.advance_queue(delta)).await
        }
        Command::Group { group } => {
            let group = group.parse().map_or(GroupRef::Label(group), GroupRef::Ordinal);
            run_stateful(url, |r| r.goto_group(&group)).await
        }
        Command::Flag { flag, state } => {
            let active = matches!(state, Switch::On);
            one_shot(url, &Wire::SetOverride { flag, active }).await.map(drop)
        }
        Command::Message(args) => {
            let force_open = match (args.open, args.close) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            one_shot(url, &Wire::ToggleMessage { text: args.text, force_open }).await.map(drop)
        }
        Command::Reorder { from, to } => run_stateful(url, |r| r.reorder_queue(from, to)).await,
        Command::Settings(settings) => run_settings(url, settings).await,
        Command::Tunnel { action } => {
            let command = match action {
                TunnelAction::Status => Wire::TunnelStatus,
                TunnelAction::On => Wire::ToggleTunnel { enable: true },
                TunnelAction::Off => Wire::ToggleTunnel { enable: false },
            };
            run_tunnel(url, &command).await
        }
        Command::Watch(args) => run_surface(url, Role::Display, args).await,
        Command::Present(args) => run_surface(url, Role::Controller, args).await,
    }
}

// =============================================================================
// ONE-SHOT COMMANDS
// =============================================================================

async fn run_ping(base_url: &str) -> Result<(), CliError> {
    let client = reqwest::Client::new();
    let url = format!("{}/healthz", base_url.trim_end_matches('/'));
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::Unhealthy(status.as_u16()));
    }
    println!("ok");
    Ok(())
}

async fn one_shot(base_url: &str, command: &Wire) -> Result<Frame, CliError> {
    let mut conn = Connection::open(base_url).await?;
    let reply = conn.request(command).await;
    conn.close().await;
    reply
}

/// Sync a display surface, run one local action against it and send the
/// resulting commands in order.
async fn run_stateful<F>(base_url: &str, act: F) -> Result<(), CliError>
where
    F: FnOnce(&mut Reconciler) -> Vec<Action>,
{
    let mut conn = Connection::open(base_url).await?;
    let mut reconciler = Reconciler::new(Role::Display, NoMedia);
    sync(&mut conn, &mut reconciler).await?;

    let actions = act(&mut reconciler);
    for action in &actions {
        match action {
            Action::Send(command) => {
                conn.request(command).await?;
            }
            Action::Notify(notice) => println!("{}", render::describe(notice)),
        }
    }
    conn.close().await;
    Ok(())
}

async fn sync<P: MediaPlayer>(conn: &mut Connection, reconciler: &mut Reconciler<P>) -> Result<(), CliError> {
    let welcome = conn.welcome().clone();
    let mut pending = reconciler.handle_frame(&welcome);
    loop {
        for command in commands(&pending) {
            conn.send(&command.to_frame()).await?;
        }
        if reconciler.is_synced() {
            return Ok(());
        }
        let frame = tokio::time::timeout(SYNC_TIMEOUT, conn.recv()).await.map_err(|_| CliError::Timeout)??;
        pending = reconciler.handle_frame(&frame);
    }
}

async fn run_settings(base_url: &str, settings: SettingsCommand) -> Result<(), CliError> {
    let command = match settings.command {
        SettingsSubcommand::Get => Wire::InitSettings,
        SettingsSubcommand::Set { input } => {
            let text = if input == "-" {
                let mut text = String::new();
                std::io::stdin().read_to_string(&mut text)?;
                text
            } else {
                std::fs::read_to_string(&input)?
            };
            let settings = Settings::from_value(serde_json::from_str(&text)?)?;
            Wire::UpdateSettings { settings }
        }
    };
    let reply = one_shot(base_url, &command).await?;
    print_json(reply.get("settings").unwrap_or(&Value::Null))
}

async fn run_tunnel(base_url: &str, command: &Wire) -> Result<(), CliError> {
    let mut conn = Connection::open(base_url).await?;
    if matches!(command, Wire::ToggleTunnel { .. }) && conn.welcome().get_bool("is_local") != Some(true) {
        eprintln!("warning: this connection is not local; the server will refuse tunnel control");
    }
    let reply = conn.request(command).await;
    conn.close().await;
    let status = TunnelStatus::from_data(&reply?.data);
    println!("tunnel {}", render::tunnel(&status));
    Ok(())
}

// =============================================================================
// LIVE SURFACES
// =============================================================================

async fn run_surface(base_url: &str, role: Role, args: SurfaceArgs) -> Result<(), CliError> {
    let mut conn = Connection::open(base_url).await?;
    let mut reconciler = Reconciler::new(role, ClockPlayer::default());
    let layers: Vec<Layer> = args.videos.into_iter().map(Layer::from).collect();
    if role == Role::Controller {
        for layer in &layers {
            reconciler.player_mut().load(*layer);
        }
    }

    let welcome = conn.welcome().clone();
    let actions = reconciler.handle_frame(&welcome);
    perform(&mut conn, &mut reconciler, actions).await?;

    let interactive = role == Role::Controller;
    if interactive {
        println!("{}", present::HELP);
    }
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut mounted = false;

    loop {
        tokio::select! {
            frame = conn.recv() => {
                let actions = reconciler.handle_frame(&frame?);
                perform(&mut conn, &mut reconciler, actions).await?;
                if role == Role::Display && !mounted && reconciler.is_synced() {
                    mounted = true;
                    for layer in &layers {
                        let actions = reconciler.mount_video(*layer);
                        perform(&mut conn, &mut reconciler, actions).await?;
                    }
                }
            }
            line = stdin.next_line(), if interactive => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match present::parse(&line) {
                    Ok(Input::Quit) => break,
                    Ok(Input::Help) => println!("{}", present::HELP),
                    Ok(Input::Status) => print_status(&reconciler),
                    Ok(input) => {
                        let actions = present::apply(&mut reconciler, input);
                        perform(&mut conn, &mut reconciler, actions).await?;
                    }
                    Err(e) => eprintln!("{e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    conn.close().await;
    Ok(())
}

/// Execute reconciler actions: send commands, print notices, and answer
/// progress requests addressed to this controller.
async fn perform(
    conn: &mut Connection,
    reconciler: &mut Reconciler<ClockPlayer>,
    actions: Vec<Action>,
) -> Result<(), CliError> {
    let mut queue: VecDeque<Action> = actions.into();
    while let Some(action) = queue.pop_front() {
        match action {
            Action::Send(command) => conn.send(&command.to_frame()).await?,
            Action::Notify(notice) => {
                println!("{}", render::describe(&notice));
                // No marquee runs in a terminal; report the banner as fully shown.
                if let Notice::ProgressRequested { consumer } = &notice {
                    queue.extend(reconciler.report_message_progress(consumer, 0, 0.0));
                }
            }
        }
    }
    Ok(())
}

fn print_status(reconciler: &Reconciler<ClockPlayer>) {
    let control = reconciler.control();
    println!(
        "position {}:{} view {} flags [{}] loop {} controller {} tunnel {}",
        control.projection(),
        control.slide(),
        reconciler.view(),
        render::active_flags(&reconciler.flags()),
        reconciler.queue().index(),
        reconciler.has_controller(),
        render::tunnel(reconciler.tunnel()),
    );
    let message = reconciler.message();
    if !message.is_cleared() {
        println!("message {} {:?}", if message.is_open { "open" } else { "closed" }, message.text);
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
