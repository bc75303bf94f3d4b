//! Command handler layer.
//!
//! ## Files
//! - `runtime.rs`: enable/disable/attach/detach/status.
//! - `api.rs`: the versioned `pro api u.pro.*.v1` endpoints.
//!
//! ## Principles
//! - Parse/match CLI inputs here.
//! - Delegate lifecycle semantics to `services/*`.
//! - Keep the response envelope stable.

pub mod api;
pub mod runtime;

pub use api::handle_api_command;
pub use runtime::{handle_runtime_commands, report_error};
