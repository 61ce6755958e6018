//! Bounded fixed-delay reconnection for ComfyUI WebSocket connections.
//!
//! A job holds one [`ReconnectBudget`] for its whole lifetime: attempts
//! spent on an earlier outage are not refunded after a successful
//! reconnect. [`reconnect_loop`] spends from that budget until the
//! connection is restored, the budget runs out, or the job's deadline
//! passes.

use std::time::Duration;

use tokio::time::Instant;

use crate::client::{ComfyUIClient, ComfyUIConnection};

/// Tunable parameters for reconnection.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    /// Total attempts allowed over a job's lifetime.
    pub max_attempts: u32,
    /// Pause between consecutive attempts.
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 100,
            delay: Duration::from_secs(3),
        }
    }
}

/// Attempts remaining for one job.
#[derive(Debug, Clone)]
pub struct ReconnectBudget {
    policy: ReconnectPolicy,
    used: u32,
}

impl ReconnectBudget {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, used: 0 }
    }

    /// Spend one attempt. Returns the 1-based attempt number, or `None`
    /// once the budget is exhausted.
    pub fn take(&mut self) -> Option<u32> {
        if self.used >= self.policy.max_attempts {
            return None;
        }
        self.used += 1;
        Some(self.used)
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn remaining(&self) -> u32 {
        self.policy.max_attempts - self.used
    }

    pub fn delay(&self) -> Duration {
        self.policy.delay
    }
}

/// Why reconnection gave up.
#[derive(Debug, thiserror::Error)]
pub enum ReconnectError {
    /// Every attempt in the budget failed.
    #[error("{last_error}")]
    Exhausted { attempts: u32, last_error: String },

    /// The job's deadline passed while reconnecting.
    #[error("Deadline reached while reconnecting")]
    DeadlineExceeded,
}

/// Try to re-establish the stream for `client_id`.
///
/// `initial_error` describes the failure that triggered the reconnect; it
/// is reported as the last error if the budget is already empty.
pub async fn reconnect_loop(
    client: &ComfyUIClient,
    client_id: &str,
    budget: &mut ReconnectBudget,
    deadline: Instant,
    initial_error: String,
) -> Result<ComfyUIConnection, ReconnectError> {
    let mut last_error = initial_error;

    while let Some(attempt) = budget.take() {
        if Instant::now() >= deadline {
            return Err(ReconnectError::DeadlineExceeded);
        }

        tracing::info!(
            client_id = %client_id,
            attempt,
            remaining = budget.remaining(),
            "Reconnecting to ComfyUI",
        );

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                return Err(ReconnectError::DeadlineExceeded);
            }
            result = client.connect(client_id) => {
                match result {
                    Ok(conn) => {
                        tracing::info!(client_id = %client_id, attempt, "Reconnected to ComfyUI");
                        return Ok(conn);
                    }
                    Err(e) => {
                        tracing::warn!(
                            client_id = %client_id,
                            error = %e,
                            "Reconnect attempt {attempt} failed",
                        );
                        last_error = e.to_string();
                    }
                }
            }
        }

        if budget.remaining() == 0 {
            break;
        }

        // Wait before the next attempt, bounded by the deadline.
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                return Err(ReconnectError::DeadlineExceeded);
            }
            _ = tokio::time::sleep(budget.delay()) => {}
        }
    }

    Err(ReconnectError::Exhausted {
        attempts: budget.used(),
        last_error,
    })
}
