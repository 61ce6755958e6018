//! Job lifecycle callbacks.
//!
//! This crate provides the best-effort notification path:
//!
//! - [`CallbackEvent`] - the outbound envelope (`{action, job_id, ...}`).
//! - [`CallbackSender`] - non-blocking handle jobs use to enqueue events.
//! - [`CallbackDispatcher`] - background task draining the queue.
//! - [`delivery`] - the webhook transport.

pub mod delivery;
pub mod dispatcher;
pub mod event;
pub mod sender;

pub use delivery::webhook::{WebhookDelivery, WebhookError};
pub use dispatcher::CallbackDispatcher;
pub use event::{CallbackAction, CallbackEvent};
pub use sender::{callback_channel, CallbackSender};
