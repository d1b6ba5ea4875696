//! Presentation control engine shared by the relay server and its clients.
//!
//! ARCHITECTURE
//! ============
//! Everything in this crate is synchronous and I/O-free. The server drives
//! the session state machine with decoded [`protocol::Command`]s; clients
//! drive a [`reconciler::Reconciler`] with inbound frames and local user
//! actions, and execute the [`reconciler::Action`]s it returns.
//!
//! Leaves first: `precedence` and `content` have no dependencies, `groups`
//! and `loop_queue` resolve abstract queue steps against the active
//! projection, `control_state` is a client's clamped view of the position,
//! and `reconciler` ties them to the wire `protocol`.

pub mod content;
pub mod control_state;
pub mod groups;
pub mod loop_queue;
pub mod media;
pub mod precedence;
pub mod protocol;
pub mod reconciler;
pub mod settings;
