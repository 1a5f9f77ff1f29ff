//! Tunnel forwarding over shared jump sessions.
//!
//! This module provides:
//! - The [`DialSession`] / [`SessionConnector`] seam to the SSH transport
//! - [`Tunnel`]s: one local listener and its accept loop each
//! - Per-connection relays copying both directions until both are done
//!
//! The main entry point is [`ForwardingEngine`], which establishes one session
//! per jump node, binds every tunnel and supervises them until shutdown.

mod engine;
mod relay;
mod traits;
mod tunnel;

// Re-export public API
pub use engine::{EngineHandle, EngineReport, ForwardingEngine, JumpPlan, TunnelInfo, TunnelOutcome};
pub use traits::{DialSession, ForwardStream, ForwardStreamIo, SessionConnector};
pub use tunnel::{Tunnel, TunnelId, TunnelState};
