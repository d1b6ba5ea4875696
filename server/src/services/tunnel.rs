//! Tunnel manager: outbound quick tunnel for remote control.
//!
//! DESIGN
//! ======
//! A child process (`cloudflared tunnel --url http://localhost:{port}` by
//! default) publishes the local server. Its stderr is scanned line by line
//! for the `https://<name>.trycloudflare.com` URL; once found, a drain task
//! keeps reading so the child never blocks on a full pipe.
//!
//! Start and stop are transitions guarded by a busy flag. [`TunnelManager::begin`]
//! claims the flag and returns a [`BusyGuard`] that releases it on drop, so
//! every exit path (success, error, panic, cancelled task) frees it. A
//! transition requested while another is in flight fails with
//! [`TunnelError::Busy`]. While busy, [`TunnelManager::status`] reports
//! `active = None`.
//!
//! ERROR HANDLING
//! ==============
//! A start that prints no URL within the timeout kills the child and fails.
//! A child that exits before printing a URL fails the start. The failure
//! message is kept and reported in the next status.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use frames::ErrorCode;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use control::protocol::TunnelStatus;

const URL_SCHEME: &str = "https://";
const URL_SUFFIX: &str = ".trycloudflare.com";

#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("tunnel is already transitioning states")]
    Busy,
    #[error("tunnel control is only allowed from the local machine")]
    Forbidden,
    #[error("failed to spawn tunnel process: {0}")]
    Spawn(std::io::Error),
    #[error("timed out after {0:?} waiting for tunnel url")]
    TimedOut(Duration),
    #[error("tunnel process exited before publishing a url")]
    Exited,
    #[error("failed to read tunnel output: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorCode for TunnelError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Busy => "E_TUNNEL_BUSY",
            Self::Forbidden => "E_FORBIDDEN",
            Self::Spawn(_) => "E_TUNNEL_SPAWN",
            Self::TimedOut(_) => "E_TUNNEL_TIMEOUT",
            Self::Exited | Self::Io(_) => "E_TUNNEL_EXITED",
        }
    }
}

/// Holds the busy flag for one transition.
pub struct BusyGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[derive(Default)]
struct Running {
    child: Option<Child>,
    url: Option<String>,
    last_error: Option<String>,
}

pub struct TunnelManager {
    program: String,
    args: Vec<String>,
    start_timeout: Duration,
    busy: Arc<AtomicBool>,
    running: Mutex<Running>,
}

impl TunnelManager {
    /// Manager that publishes `http://localhost:{port}` through `program`.
    #[must_use]
    pub fn new(program: impl Into<String>, port: u16, start_timeout: Duration) -> Self {
        let args = vec!["tunnel".to_owned(), "--url".to_owned(), format!("http://localhost:{port}")];
        Self::with_command(program, args, start_timeout)
    }

    #[must_use]
    pub fn with_command(program: impl Into<String>, args: Vec<String>, start_timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            start_timeout,
            busy: Arc::new(AtomicBool::new(false)),
            running: Mutex::new(Running::default()),
        }
    }

    /// Claim the transition lock.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::Busy`] while another transition holds it.
    pub fn begin(&self) -> Result<BusyGuard, TunnelError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| TunnelError::Busy)?;
        Ok(BusyGuard { busy: Arc::clone(&self.busy) })
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub async fn status(&self) -> TunnelStatus {
        if self.is_busy() {
            return TunnelStatus::default();
        }
        let mut running = self.running.lock().await;
        if let Some(child) = running.child.as_mut() {
            if let Ok(Some(exit)) = child.try_wait() {
                warn!(%exit, "tunnel process exited");
                running.child = None;
                running.url = None;
                running.last_error = Some(format!("tunnel process exited ({exit})"));
            }
        }
        settled(&running)
    }

    /// Start or stop according to `enable`.
    ///
    /// # Errors
    ///
    /// Propagates [`TunnelManager::start`] failures.
    pub async fn toggle(&self, guard: BusyGuard, enable: bool) -> Result<TunnelStatus, TunnelError> {
        if enable { self.start(guard).await } else { Ok(self.stop(guard).await) }
    }

    /// Spawn the tunnel and wait for its public URL.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::Spawn`], [`TunnelError::TimedOut`] or
    /// [`TunnelError::Exited`]; the child is gone in every error case.
    pub async fn start(&self, _guard: BusyGuard) -> Result<TunnelStatus, TunnelError> {
        let mut running = self.running.lock().await;
        if running.child.is_some() {
            return Ok(settled(&running));
        }

        info!(program = %self.program, args = ?self.args, "tunnel: starting");
        let result = self.spawn_and_wait().await;
        match result {
            Ok((child, url)) => {
                info!(%url, "tunnel: ready");
                running.child = Some(child);
                running.url = Some(url);
                running.last_error = None;
                Ok(settled(&running))
            }
            Err(e) => {
                warn!(error = %e, "tunnel: start failed");
                running.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn spawn_and_wait(&self) -> Result<(Child, String), TunnelError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(TunnelError::Spawn)?;

        let Some(stderr) = child.stderr.take() else {
            kill(&mut child).await;
            return Err(TunnelError::Exited);
        };
        let mut lines = BufReader::new(stderr).lines();

        match tokio::time::timeout(self.start_timeout, wait_for_url(&mut lines)).await {
            Ok(Ok(url)) => {
                tokio::spawn(drain(lines));
                Ok((child, url))
            }
            Ok(Err(e)) => {
                kill(&mut child).await;
                Err(e)
            }
            Err(_) => {
                kill(&mut child).await;
                Err(TunnelError::TimedOut(self.start_timeout))
            }
        }
    }

    /// Kill the tunnel and wait for it to exit.
    pub async fn stop(&self, _guard: BusyGuard) -> TunnelStatus {
        let mut running = self.running.lock().await;
        if let Some(mut child) = running.child.take() {
            info!("tunnel: stopping");
            kill(&mut child).await;
        }
        running.url = None;
        running.last_error = None;
        settled(&running)
    }

    /// Kill any running tunnel on server shutdown.
    pub async fn shutdown(&self) {
        let mut running = self.running.lock().await;
        if let Some(mut child) = running.child.take() {
            info!("tunnel: killing on shutdown");
            kill(&mut child).await;
        }
        running.url = None;
    }
}

fn settled(running: &Running) -> TunnelStatus {
    TunnelStatus {
        active: Some(running.child.is_some()),
        url: running.url.clone(),
        error: running.last_error.clone(),
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "tunnel: kill failed");
    }
}

async fn wait_for_url(lines: &mut Lines<BufReader<ChildStderr>>) -> Result<String, TunnelError> {
    while let Some(line) = lines.next_line().await? {
        debug!(%line, "tunnel output");
        if let Some(url) = find_tunnel_url(&line) {
            return Ok(url);
        }
    }
    Err(TunnelError::Exited)
}

async fn drain(mut lines: Lines<BufReader<ChildStderr>>) {
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(%line, "tunnel output");
    }
}

/// First `https://<name>.trycloudflare.com` URL in `line`.
#[must_use]
pub fn find_tunnel_url(line: &str) -> Option<String> {
    let is_name_char = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
    let mut rest = line;
    while let Some(at) = rest.find(URL_SCHEME) {
        let after = &rest[at + URL_SCHEME.len()..];
        let name_len = after.find(|c: char| !is_name_char(c)).unwrap_or(after.len());
        let (name, tail) = after.split_at(name_len);
        if !name.is_empty() && tail.starts_with(URL_SUFFIX) {
            return Some(format!("{URL_SCHEME}{name}{URL_SUFFIX}"));
        }
        rest = after;
    }
    None
}

#[cfg(test)]
#[path = "tunnel_test.rs"]
mod tests;
