//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the relay (session plus connected peers) behind one async
//! mutex, the tunnel manager, and the resolved configuration.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::ServerConfig;
use crate::services::relay::Relay;
use crate::services::settings::SettingsWriter;
use crate::services::tunnel::TunnelManager;

pub type SharedRelay = Arc<Mutex<Relay<SettingsWriter>>>;

/// Shared application state. All fields are Arc-wrapped so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    pub relay: SharedRelay,
    pub tunnel: Arc<TunnelManager>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(relay: Relay<SettingsWriter>, tunnel: TunnelManager, config: ServerConfig) -> Self {
        Self { relay: Arc::new(Mutex::new(relay)), tunnel: Arc::new(tunnel), config: Arc::new(config) }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
