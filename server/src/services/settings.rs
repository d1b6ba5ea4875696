//! Settings persistence: file-backed settings document.
//!
//! DESIGN
//! ======
//! The session hands every saved record to [`SettingsWriter`], which
//! publishes it on a latest-value channel without blocking. A single
//! background task wakes on change and writes the current record
//! atomically (temp file + rename) as pretty JSON. A burst of saves
//! coalesces to the newest record; the newest is never dropped. On
//! shutdown [`SettingsTask::finish`] flushes anything still unwritten.
//!
//! ERROR HANDLING
//! ==============
//! Writes are best effort: failures are logged and the in-memory record
//! stays authoritative. At startup a missing or unreadable file yields the
//! built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use control::settings::Settings;

use crate::services::session::SettingsStore;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings json error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// LOAD
// =============================================================================

/// Read settings from `path`, falling back to defaults.
#[must_use]
pub fn load_settings(path: &Path) -> Settings {
    match read_settings(path) {
        Ok(settings) => {
            info!(path = %path.display(), revision = settings.revision(), "settings loaded");
            settings
        }
        Err(SettingsError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no settings file; using defaults");
            Settings::default()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "settings unreadable; using defaults");
            Settings::default()
        }
    }
}

/// # Errors
///
/// Returns [`SettingsError`] when the file is missing or not a settings
/// document.
pub fn read_settings(path: &Path) -> Result<Settings, SettingsError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Write `settings` to `path` via a sibling temp file.
///
/// # Errors
///
/// Returns [`SettingsError::Io`] when the directory or file cannot be
/// written.
pub async fn write_settings(path: &Path, settings: &Settings) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let body = serde_json::to_vec_pretty(settings)?;
    let tmp = temp_path(path);
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(std::ffi::OsStr::to_os_string).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

// =============================================================================
// WRITER
// =============================================================================

/// Publish side of the settings writer. Holds only the newest record; the
/// background task writes whatever is current when it wakes.
#[derive(Clone)]
pub struct SettingsWriter {
    tx: watch::Sender<Settings>,
}

#[cfg(test)]
impl SettingsWriter {
    /// Writer whose records land in the returned receiver instead of on disk.
    pub(crate) fn detached() -> (Self, watch::Receiver<Settings>) {
        let (tx, rx) = watch::channel(Settings::default());
        (Self { tx }, rx)
    }
}

impl SettingsStore for SettingsWriter {
    fn save(&mut self, settings: &Settings) {
        // Replaces any record the task has not written yet.
        self.tx.send_replace(settings.clone());
    }
}

/// Handle to the background writer task.
pub struct SettingsTask {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl SettingsTask {
    /// Stop the writer after a final write of any unwritten record.
    pub async fn finish(self, limit: Duration) {
        let _ = self.stop.send(());
        match tokio::time::timeout(limit, self.handle).await {
            Ok(Ok(())) => info!("settings writer stopped"),
            Ok(Err(e)) => error!(error = %e, "settings writer task failed"),
            Err(_) => warn!(timeout_ms = limit.as_millis(), "settings writer did not stop in time"),
        }
    }
}

/// Spawn the background writer, seeded with the record already on disk.
/// The task ends when every [`SettingsWriter`] clone is dropped or the
/// [`SettingsTask`] is finished or dropped, writing the newest record first.
#[must_use]
pub fn spawn_settings_writer(path: PathBuf, initial: Settings) -> (SettingsWriter, SettingsTask) {
    let (tx, mut rx) = watch::channel(initial);
    let (stop, mut stop_rx) = oneshot::channel::<()>();
    info!(path = %path.display(), "settings writer configured");

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let latest = rx.borrow_and_update().clone();
                    persist(&path, &latest).await;
                }
                _ = &mut stop_rx => {
                    if rx.has_changed().unwrap_or(true) {
                        let latest = rx.borrow_and_update().clone();
                        persist(&path, &latest).await;
                    }
                    break;
                }
            }
        }
    });

    (SettingsWriter { tx }, SettingsTask { stop, handle })
}

async fn persist(path: &Path, settings: &Settings) {
    match write_settings(path, settings).await {
        Ok(()) => debug!(revision = settings.revision(), "settings persisted"),
        Err(e) => error!(path = %path.display(), error = %e, "settings write failed"),
    }
}

#[cfg(test)]
#[path = "settings_test.rs"]
mod tests;
