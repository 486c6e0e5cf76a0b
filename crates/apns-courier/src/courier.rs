//! Worker loop driving dispatch passes.

use crate::error::{CourierError, CourierResult};
use crate::registry::AppRegistry;
use crate::DispatchSummary;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Outcome of one application within a pass.
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub app_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<DispatchSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The courier worker.
///
/// Runs dispatch passes over the registry, either once or on an interval.
pub struct Courier {
    registry: Arc<AppRegistry>,
    interval: Duration,
}

impl Courier {
    pub fn new(registry: Arc<AppRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Run one pass over a single application, or over all of them.
    pub async fn run_once(&self, app_id: Option<&str>) -> CourierResult<Vec<PassReport>> {
        let results = match app_id {
            Some(app_id) => vec![(
                app_id.to_string(),
                self.registry.push_notifications(app_id).await,
            )],
            None => self.registry.push_all().await?,
        };

        Ok(results
            .into_iter()
            .map(|(app_id, result)| {
                if let Err(e) = &result {
                    log_dispatch_error(&app_id, e);
                }
                match result {
                    Ok(summary) => PassReport {
                        app_id,
                        summary: Some(summary),
                        error: None,
                    },
                    Err(e) => PassReport {
                        app_id,
                        summary: None,
                        error: Some(e.to_string()),
                    },
                }
            })
            .collect())
    }

    /// Run passes until the future is dropped.
    pub async fn run(&self) -> CourierResult<()> {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting courier loop"
        );

        loop {
            match self.run_once(None).await {
                Ok(reports) => {
                    let delivered: usize = reports
                        .iter()
                        .filter_map(|r| r.summary.as_ref())
                        .map(|s| s.delivered)
                        .sum();
                    debug!(apps = reports.len(), delivered, "Pass complete");
                }
                Err(e) => {
                    // Only storage failures reach here
                    error!(error = %e, "Dispatch pass failed");
                }
            }

            tokio::time::sleep(self.interval).await;
        }
    }
}

fn log_dispatch_error(app_id: &str, e: &CourierError) {
    match e {
        e if e.is_connection() => {
            warn!(app_id = %app_id, error = %e, "Gateway unreachable, will retry next pass");
        }
        CourierError::Protocol(_) => {
            error!(app_id = %app_id, error = %e, "Gateway protocol violation");
        }
        CourierError::Config(_) => {
            warn!(app_id = %app_id, error = %e, "Application misconfigured, skipping");
        }
        _ => {
            error!(app_id = %app_id, error = %e, "Dispatch failed");
        }
    }
}
