//! Domain services used by the websocket route.
//!
//! ARCHITECTURE
//! ============
//! `session` is the pure state machine, `relay` binds it to connected peers,
//! `settings` persists the durable settings document off the hot path and
//! `tunnel` supervises the optional public tunnel process. Route handlers
//! stay focused on transport and frame translation.

pub mod relay;
pub mod session;
pub mod settings;
pub mod tunnel;
