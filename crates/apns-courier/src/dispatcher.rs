//! Batch dispatch: select, encode, write, collect, commit.
//!
//! One call walks `Idle -> ConnectionOpen -> FramesWritten -> ResultsCollected
//! -> Committed`. Outcomes are persisted one notification at a time as soon
//! as the collector has spoken; nothing is committed before that.

use crate::application::gateway_credential;
use crate::collector::{BatchOutcome, ResultCollector};
use crate::error::{CourierError, CourierResult};
use crate::gateway::{GatewayConnection, GatewayConnector};
use crate::protocol::{GatewayStatus, NotificationFrame, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::store::PushStore;
use chrono::Utc;
use push_database::{Application, Notification};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default wait for an error frame after a batch.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(2);

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// How long silence must last before a batch counts as delivered.
    pub poll_timeout: Duration,
    /// Fresh connections allowed per call for frames cut off by an error.
    pub reconnect_attempts: u32,
    /// Leave notifications whose last result is terminal out of selection.
    pub skip_terminal_failures: bool,
    pub max_payload_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            reconnect_attempts: 0,
            skip_terminal_failures: false,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

/// Counters for one dispatch call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    /// Notifications selected for this call.
    pub pending: usize,
    /// Frames written, across every connection of the call.
    pub written: usize,
    /// Marked sent.
    pub delivered: usize,
    /// Rejected by the gateway; still pending.
    pub failed: usize,
    /// Cut off by an earlier failure and left untouched.
    pub requeued: usize,
    /// Could not be encoded; never written.
    pub rejected: usize,
}

impl DispatchSummary {
    pub fn is_noop(&self) -> bool {
        self.pending == 0
    }
}

/// A selected notification with its encoded frame.
struct Pending {
    notification: Notification,
    frame: NotificationFrame,
}

/// Sends an application's unsent notifications through the gateway.
pub struct Dispatcher {
    connector: Arc<dyn GatewayConnector>,
    store: Arc<dyn PushStore>,
    config: DispatchConfig,
    collector: ResultCollector,
}

impl Dispatcher {
    pub fn new(
        connector: Arc<dyn GatewayConnector>,
        store: Arc<dyn PushStore>,
        config: DispatchConfig,
    ) -> Self {
        let collector = ResultCollector::new(config.poll_timeout);
        Self {
            connector,
            store,
            config,
            collector,
        }
    }

    /// Dispatch every unsent notification of `app`.
    ///
    /// The application must already be normalised and validated. Callers are
    /// responsible for never running two calls for the same application at
    /// once.
    pub async fn dispatch(&self, app: &Application) -> CourierResult<DispatchSummary> {
        let mut summary = DispatchSummary::default();

        let mut selected = self.store.find_unsent_notifications(&app.id)?;
        if self.config.skip_terminal_failures {
            selected.retain(|n| !last_result_is_terminal(n));
        }

        summary.pending = selected.len();
        if selected.is_empty() {
            debug!(app_id = %app.id, "Nothing to dispatch");
            return Ok(summary);
        }

        let mut batch = Vec::with_capacity(selected.len());
        let mut rejected = Vec::new();
        for notification in selected {
            match NotificationFrame::from_notification(
                &notification,
                0,
                self.config.max_payload_size,
            ) {
                Ok(frame) => batch.push(Pending {
                    notification,
                    frame,
                }),
                Err(status) => {
                    warn!(
                        app_id = %app.id,
                        notification_id = %notification.id,
                        status = ?status,
                        "Notification cannot be encoded"
                    );
                    rejected.push((notification, status));
                }
            }
        }

        if batch.is_empty() {
            self.commit_rejections(rejected, &mut summary)?;
            return Ok(summary);
        }

        let (credential, sandbox) = gateway_credential(app);
        let mut reconnects_left = self.config.reconnect_attempts;

        loop {
            let mut conn = self.connector.open(credential, sandbox).await?;
            debug!(app_id = %app.id, sandbox, frames = batch.len(), "Gateway connection open");

            let result = self
                .run_batch(conn.as_mut(), batch, &mut rejected, &mut summary)
                .await;
            if let Err(e) = conn.close().await {
                debug!(error = %e, "Error closing gateway connection");
            }
            let remainder = result?;

            if remainder.is_empty() {
                break;
            }
            if reconnects_left == 0 {
                summary.requeued = remainder.len();
                break;
            }

            reconnects_left -= 1;
            info!(
                app_id = %app.id,
                remaining = remainder.len(),
                reconnects_left,
                "Resuming on a fresh connection"
            );
            batch = remainder;
        }

        info!(
            app_id = %app.id,
            pending = summary.pending,
            written = summary.written,
            delivered = summary.delivered,
            failed = summary.failed,
            requeued = summary.requeued,
            rejected = summary.rejected,
            "Dispatch complete"
        );

        Ok(summary)
    }

    /// Write one batch, collect the verdict, commit it.
    ///
    /// Local rejections are committed alongside the first verdict; a failed
    /// open, write or read leaves them pending. Returns the notifications
    /// the gateway never reached.
    async fn run_batch(
        &self,
        conn: &mut dyn GatewayConnection,
        mut batch: Vec<Pending>,
        rejected: &mut Vec<(Notification, GatewayStatus)>,
        summary: &mut DispatchSummary,
    ) -> CourierResult<Vec<Pending>> {
        for (index, pending) in batch.iter_mut().enumerate() {
            pending.frame.identifier = u32::try_from(index).map_err(|_| {
                CourierError::Protocol(format!("Batch too large: {} frames", index))
            })?;
            conn.write(&pending.frame.encode()).await?;
            summary.written += 1;
        }

        let outcome = match self.collector.collect(conn, batch.len()).await {
            Ok(outcome) => {
                self.commit_rejections(std::mem::take(rejected), summary)?;
                outcome
            }
            Err(e @ CourierError::Protocol(_)) => {
                self.commit_rejections(std::mem::take(rejected), summary)?;
                // Nothing in the batch can be trusted as delivered
                for pending in &batch {
                    self.commit_failure(
                        &pending.notification,
                        GatewayStatus::ProtocolDecodeError,
                    )?;
                    summary.failed += 1;
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        if let BatchOutcome::Rejected { identifier, status } = outcome {
            warn!(
                notification_id = %batch[identifier].notification.id,
                identifier,
                status = ?status,
                "Gateway rejected notification"
            );
        }

        let mut remainder = Vec::new();
        for (index, pending) in batch.into_iter().enumerate() {
            match outcome.status_at(index) {
                Some(status) if status.is_success() => {
                    self.commit_delivered(&pending.notification)?;
                    summary.delivered += 1;
                }
                Some(status) => {
                    self.commit_failure(&pending.notification, status)?;
                    summary.failed += 1;
                }
                None => remainder.push(pending),
            }
        }

        Ok(remainder)
    }

    fn commit_delivered(&self, notification: &Notification) -> CourierResult<()> {
        let mut updated = notification.clone();
        updated.sent = true;
        updated.result_code = Some(GatewayStatus::NoError.code());
        updated.attempts += 1;
        updated.sent_at = Some(Utc::now());
        self.store.save_notification(&updated)
    }

    fn commit_failure(&self, notification: &Notification, status: GatewayStatus) -> CourierResult<()> {
        let mut updated = notification.clone();
        updated.result_code = Some(status.code());
        updated.attempts += 1;
        self.store.save_notification(&updated)
    }

    fn commit_rejections(
        &self,
        rejected: Vec<(Notification, GatewayStatus)>,
        summary: &mut DispatchSummary,
    ) -> CourierResult<()> {
        for (mut notification, status) in rejected {
            notification.result_code = Some(status.code());
            self.store.save_notification(&notification)?;
            summary.rejected += 1;
        }
        Ok(())
    }
}

fn last_result_is_terminal(notification: &Notification) -> bool {
    notification
        .result_code
        .and_then(GatewayStatus::from_code)
        .is_some_and(GatewayStatus::is_terminal)
}
