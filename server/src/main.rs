mod config;
mod routes;
mod services;
mod state;

use std::net::SocketAddr;
use std::path::Path;

use control::content::Show;

use crate::config::ServerConfig;
use crate::services::relay::Relay;
use crate::services::session::Session;
use crate::services::settings::{load_settings, spawn_settings_writer};
use crate::services::tunnel::TunnelManager;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = ServerConfig::from_env();

    let settings = load_settings(&config.settings_path);
    let show = match config.show_path.as_deref().map(load_show).transpose() {
        Ok(show) => show,
        Err(message) => {
            tracing::error!(error = %message, "show load failed");
            std::process::exit(1);
        }
    };
    if show.is_none() {
        tracing::warn!("no SHOW_PATH configured; positions are unbounded");
    }

    let (writer, settings_task) = spawn_settings_writer(config.settings_path.clone(), settings.clone());
    let settings_flush_timeout = config.settings_flush_timeout;
    let tunnel = TunnelManager::new(config.tunnel_program.clone(), config.port, config.tunnel_start_timeout);
    let relay = Relay::new(Session::new(settings, show, writer));

    let listen_addr = config.listen_addr();
    let port = config.port;
    let state = state::AppState::new(relay, tunnel, config);
    let tunnel = state.tunnel.clone();

    let app = routes::app(state);
    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%listen_addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };

    tracing::info!(%port, "cast relay listening");
    let served = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await;
    tunnel.shutdown().await;
    settings_task.finish(settings_flush_timeout).await;
    if let Err(e) = served {
        tracing::error!(error = %e, "server failed");
        std::process::exit(1);
    }
}

fn load_show(path: &Path) -> Result<Show, String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
    let show = Show::from_json(&text).map_err(|e| format!("{}: {e}", path.display()))?;
    tracing::info!(path = %path.display(), projections = show.len(), "show loaded");
    Ok(show)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "ctrl-c handler failed; running until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
