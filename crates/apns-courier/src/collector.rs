//! Correlates asynchronous gateway errors with the frames of a batch.
//!
//! The gateway never acknowledges success. After a batch is written the
//! collector waits a bounded window: silence means every frame was accepted;
//! an error frame names the first rejected identifier, and the gateway drops
//! everything written after it.

use crate::error::{CourierError, CourierResult};
use crate::gateway::GatewayConnection;
use crate::protocol::{ErrorFrame, GatewayStatus};
use std::time::Duration;
use tracing::{debug, warn};

/// What the gateway made of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// No error frame within the poll window.
    Delivered,
    /// The frame at `identifier` failed; frames after it were not processed.
    Rejected {
        identifier: usize,
        status: GatewayStatus,
    },
}

impl BatchOutcome {
    /// Status of the frame at `index`, or `None` if the gateway never reached it.
    pub fn status_at(&self, index: usize) -> Option<GatewayStatus> {
        match *self {
            BatchOutcome::Delivered => Some(GatewayStatus::NoError),
            BatchOutcome::Rejected { identifier, status } => {
                if index < identifier {
                    Some(GatewayStatus::NoError)
                } else if index == identifier {
                    Some(status)
                } else {
                    None
                }
            }
        }
    }
}

/// Reads the gateway's verdict on a written batch.
#[derive(Debug, Clone)]
pub struct ResultCollector {
    poll_timeout: Duration,
}

impl ResultCollector {
    pub fn new(poll_timeout: Duration) -> Self {
        Self { poll_timeout }
    }

    /// Wait for the verdict on a batch of `batch_len` frames.
    ///
    /// Fails with `Protocol` when the error frame cannot be decoded or names an
    /// identifier outside the batch, and with `Connection` when the gateway
    /// hangs up without saying why.
    pub async fn collect(
        &self,
        conn: &mut dyn GatewayConnection,
        batch_len: usize,
    ) -> CourierResult<BatchOutcome> {
        if !conn.poll_readable(self.poll_timeout).await? {
            debug!(
                batch_len,
                timeout_ms = self.poll_timeout.as_millis() as u64,
                "No error frame within poll window"
            );
            return Ok(BatchOutcome::Delivered);
        }

        let raw = conn.read_error_frame().await?.ok_or_else(|| {
            CourierError::Connection("Gateway closed the connection without an error frame".to_string())
        })?;

        let frame = ErrorFrame::decode(&raw).map_err(|e| {
            warn!(bytes = raw.len(), error = %e, "Undecodable error frame");
            e
        })?;

        let identifier = frame.identifier as usize;
        if identifier >= batch_len {
            warn!(
                identifier,
                batch_len,
                status = ?frame.status,
                "Error frame identifier outside the batch"
            );
            return Err(CourierError::Protocol(format!(
                "Error frame identifier {} out of range for batch of {}",
                identifier, batch_len
            )));
        }

        debug!(identifier, status = ?frame.status, "Gateway rejected frame");

        Ok(BatchOutcome::Rejected {
            identifier,
            status: frame.status,
        })
    }
}
