//! Background callback dispatcher.
//!
//! [`CallbackDispatcher`] drains the queue fed by [`CallbackSender`] and
//! delivers events one at a time, so a job's callbacks arrive in the order
//! they were enqueued. Delivery failures are logged and swallowed. The
//! loop exits once every sender has been dropped.

use genrelay_core::config::CallbackConfig;
use tokio::sync::mpsc;

use crate::delivery::webhook::{WebhookDelivery, WebhookError};
use crate::event::CallbackEvent;
use crate::sender::{callback_channel, CallbackSender, CALLBACK_QUEUE_CAPACITY};

/// Background service that posts queued callback events.
pub struct CallbackDispatcher;

impl CallbackDispatcher {
    /// Run the delivery loop until the channel closes.
    pub async fn run(delivery: WebhookDelivery, mut receiver: mpsc::Receiver<CallbackEvent>) {
        while let Some(event) = receiver.recv().await {
            match delivery.deliver(&event).await {
                Ok(()) => {
                    tracing::debug!(
                        job_id = %event.job_id,
                        action = event.action_name(),
                        "Callback delivered",
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %event.job_id,
                        action = event.action_name(),
                        error = %e,
                        "Callback delivery failed",
                    );
                }
            }
        }
        tracing::info!("Callback queue closed, dispatcher shutting down");
    }

    /// Start a dispatcher for `config`, or return a disabled sender when
    /// callbacks are not configured.
    pub fn spawn(config: Option<&CallbackConfig>) -> Result<CallbackSender, WebhookError> {
        let Some(config) = config else {
            tracing::info!("No callback endpoint configured, callbacks disabled");
            return Ok(CallbackSender::disabled());
        };

        let delivery = WebhookDelivery::new(config)?;
        let (sender, receiver) = callback_channel(CALLBACK_QUEUE_CAPACITY);
        tracing::info!(endpoint = %delivery.endpoint(), "Callback dispatcher started");
        tokio::spawn(Self::run(delivery, receiver));
        Ok(sender)
    }
}
