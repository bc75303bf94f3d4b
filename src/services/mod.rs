//! Engine internals behind the command layer.
//!
//! - [`config`] / [`context`]: configuration file, env overrides, and the
//!   per-invocation context handed to everything else.
//! - [`registry`] / [`resolver`]: the static service catalog and the pure
//!   dependency questions asked of it.
//! - [`entitlement`]: one service bound to the live host.
//! - [`lock`] / [`state`]: the single-writer lock and the durable client
//!   state (machine token, notices, status cache).
//! - [`orchestrator`]: the operation lifecycles, built from all of the above.
//! - [`host`]: the traits the engine mutates the host through.
//! - [`output`]: progress narration and the response envelope.

pub mod config;
pub mod context;
pub mod entitlement;
pub mod host;
pub mod lock;
pub mod orchestrator;
pub mod output;
pub mod registry;
pub mod resolver;
pub mod state;
