//! Non-blocking callback queue.
//!
//! Jobs never wait on callback delivery: [`CallbackSender::notify`] uses
//! `try_send` and drops the event (with a warning) when the queue is full
//! or the dispatcher is gone.

use tokio::sync::mpsc;

use crate::event::CallbackEvent;

/// Default number of undelivered events held before new ones are dropped.
pub const CALLBACK_QUEUE_CAPACITY: usize = 1024;

/// Cloneable handle for enqueueing callback events.
#[derive(Debug, Clone)]
pub struct CallbackSender {
    tx: Option<mpsc::Sender<CallbackEvent>>,
}

/// Create a bounded callback queue.
pub fn callback_channel(capacity: usize) -> (CallbackSender, mpsc::Receiver<CallbackEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (CallbackSender { tx: Some(tx) }, rx)
}

impl CallbackSender {
    /// A sender that discards everything. Used when no callback endpoint
    /// is configured.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Enqueue an event without waiting.
    pub fn notify(&self, event: CallbackEvent) {
        let Some(tx) = &self.tx else {
            return;
        };

        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(
                    job_id = %event.job_id,
                    action = event.action_name(),
                    "Callback queue full, dropping event",
                );
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                tracing::debug!(
                    job_id = %event.job_id,
                    action = event.action_name(),
                    "Callback dispatcher stopped, dropping event",
                );
            }
        }
    }
}
