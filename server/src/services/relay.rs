//! Relay: connected peers plus the session they drive.
//!
//! DESIGN
//! ======
//! `PeerTable` maps connection ids to each connection's outbound queue and
//! implements the session's [`Fanout`] port: events become request frames
//! stamped with their originating connection and are pushed with
//! `try_send`, so a slow client never stalls the session.
//!
//! `Relay` owns the table and the [`Session`] and is shared behind one
//! async mutex; that lock is what serializes inbound commands.

use std::collections::HashMap;

use frames::Frame;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use control::protocol::{Command, Event};

use crate::services::session::{Audience, Fanout, Reply, Session, SettingsStore};

// =============================================================================
// PEERS
// =============================================================================

struct Peer {
    tx: mpsc::Sender<Frame>,
}

#[derive(Default)]
pub struct PeerTable {
    peers: HashMap<String, Peer>,
}

impl PeerTable {
    fn len(&self) -> usize {
        self.peers.len()
    }

    #[cfg(test)]
    pub fn contains(&self, connection_id: &str) -> bool {
        self.peers.contains_key(connection_id)
    }

    /// Queue `frame` for one connection. Returns `false` if it is unknown.
    pub fn send_to(&self, connection_id: &str, frame: Frame) -> bool {
        let Some(peer) = self.peers.get(connection_id) else {
            return false;
        };
        enqueue(connection_id, &peer.tx, frame);
        true
    }

    pub fn broadcast(&self, frame: &Frame, exclude: Option<&str>) {
        for (connection_id, peer) in &self.peers {
            if exclude == Some(connection_id.as_str()) {
                continue;
            }
            enqueue(connection_id, &peer.tx, frame.clone());
        }
    }
}

impl Fanout for PeerTable {
    fn deliver(&mut self, audience: Audience, from: Option<&str>, event: Event) {
        let mut frame = event.to_frame();
        frame.from = from.map(str::to_owned);
        match audience {
            Audience::All => self.broadcast(&frame, None),
            Audience::AllExcept(connection_id) => self.broadcast(&frame, Some(&connection_id)),
            Audience::Only(connection_id) => {
                let syscall = frame.syscall.clone();
                if !self.send_to(&connection_id, frame) {
                    debug!(target_id = %connection_id, %syscall, "relay: target not connected; dropping");
                }
            }
        }
    }
}

/// Best-effort, non-blocking enqueue.
fn enqueue(connection_id: &str, tx: &mpsc::Sender<Frame>, frame: Frame) {
    match tx.try_send(frame) {
        Ok(()) => {}
        Err(TrySendError::Full(frame)) => {
            warn!(%connection_id, syscall = %frame.syscall, "relay: client queue full; dropping frame");
        }
        Err(TrySendError::Closed(frame)) => {
            debug!(%connection_id, syscall = %frame.syscall, "relay: client queue closed; dropping frame");
        }
    }
}

// =============================================================================
// RELAY
// =============================================================================

pub struct Relay<S: SettingsStore> {
    session: Session<S>,
    peers: PeerTable,
}

impl<S: SettingsStore> Relay<S> {
    pub fn new(session: Session<S>) -> Self {
        Self { session, peers: PeerTable::default() }
    }

    #[cfg(test)]
    pub fn session(&self) -> &Session<S> {
        &self.session
    }

    #[cfg(test)]
    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    pub fn connect(&mut self, connection_id: &str, tx: mpsc::Sender<Frame>, is_local: bool) {
        self.peers.peers.insert(connection_id.to_owned(), Peer { tx });
        info!(%connection_id, is_local, peers = self.peers.len(), "relay: peer joined");
    }

    /// Forget a connection and drop it from the controller registry.
    pub fn disconnect(&mut self, connection_id: &str) {
        if self.peers.peers.remove(connection_id).is_none() {
            return;
        }
        self.session.disconnect(connection_id, &mut self.peers);
        info!(%connection_id, peers = self.peers.len(), "relay: peer left");
    }

    /// Apply one request frame from `sender` and build the reply for it.
    pub fn handle(&mut self, sender: &str, request: &Frame) -> Frame {
        let command = match Command::from_frame(request) {
            Ok(command) => command,
            Err(e) => return request.error_from(&e),
        };
        match self.session.handle(sender, command, &mut self.peers) {
            Ok(Reply::Done) => request.done(),
            Ok(Reply::Data(data)) => request.done_with(data),
            Err(e) => request.error_from(&e),
        }
    }

    /// Push a server-originated event to everyone.
    pub fn broadcast(&mut self, event: Event) {
        self.peers.deliver(Audience::All, None, event);
    }

    pub fn send_to(&self, connection_id: &str, frame: Frame) -> bool {
        self.peers.send_to(connection_id, frame)
    }
}

#[cfg(test)]
#[path = "relay_test.rs"]
mod tests;
