//! ComfyUI websocket and REST client library.
//!
//! Provides typed stream-event parsing, websocket connection handling,
//! HTTP API wrappers, bounded reconnection, history parsing and the
//! per-job execution monitor that turns the event stream into a terminal
//! phase.

pub mod api;
pub mod client;
pub mod history;
pub mod messages;
pub mod monitor;
pub mod reconnect;
