//! Application registry: the entry point for registering applications,
//! queueing notifications, and pushing them.

use crate::application::{resolve_sandbox_mode, validate_credentials, DEFAULT_SANDBOX_MODE};
use crate::dispatcher::{DispatchSummary, Dispatcher};
use crate::error::{CourierError, CourierResult};
use crate::store::PushStore;
use push_database::{Application, NewApplication, NewNotification, Notification};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Registry of push applications.
///
/// Dispatches for the same application are serialized; different
/// applications may dispatch concurrently.
pub struct AppRegistry {
    store: Arc<dyn PushStore>,
    dispatcher: Dispatcher,
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl AppRegistry {
    pub fn new(store: Arc<dyn PushStore>, dispatcher: Dispatcher) -> Self {
        Self {
            store,
            dispatcher,
            locks: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new application. Sandbox mode defaults to on.
    pub fn register_application(&self, mut app: NewApplication) -> CourierResult<Application> {
        validate_credentials(&app.dev_cert, &app.prod_cert)?;
        if app.sandbox_mode.is_none() {
            app.sandbox_mode = Some(DEFAULT_SANDBOX_MODE);
        }

        let app = self.store.insert_application(&app)?;
        info!(app_id = %app.id, sandbox = ?app.sandbox_mode, "Registered application");
        Ok(app)
    }

    /// Queue a notification for an application.
    pub fn enqueue_notification(
        &self,
        app_id: &str,
        device_token: &str,
        payload: serde_json::Value,
    ) -> CourierResult<Notification> {
        if self.store.get_application(app_id)?.is_none() {
            return Err(CourierError::ApplicationNotFound(app_id.to_string()));
        }

        let notification = self
            .store
            .insert_notification(&NewNotification::new(app_id, device_token, payload))?;
        debug!(
            app_id = %app_id,
            notification_id = %notification.id,
            sequence = notification.sequence_number,
            "Queued notification"
        );
        Ok(notification)
    }

    /// Normalise and validate a stored application.
    ///
    /// A defaulted sandbox mode is persisted even when validation then fails.
    pub fn validate_application(&self, app_id: &str) -> CourierResult<Application> {
        let mut app = self.load(app_id)?;
        if resolve_sandbox_mode(&mut app) {
            self.store.save_application(&app)?;
            debug!(app_id = %app.id, "Defaulted sandbox mode");
        }
        validate_credentials(&app.dev_cert, &app.prod_cert)?;
        Ok(app)
    }

    /// Push every unsent notification of one application.
    pub async fn push_notifications(&self, app_id: &str) -> CourierResult<DispatchSummary> {
        // Unknown ids never get a lock entry
        self.load(app_id)?;

        let lock = self.lock_for(app_id).await;
        let _guard = lock.lock().await;

        let app = self.validate_application(app_id)?;
        self.dispatcher.dispatch(&app).await
    }

    /// Push every registered application in turn.
    ///
    /// Per-application failures are logged and reported, never fatal.
    pub async fn push_all(&self) -> CourierResult<Vec<(String, CourierResult<DispatchSummary>)>> {
        let apps = self.store.list_applications()?;
        let mut results = Vec::with_capacity(apps.len());

        for app in apps {
            let result = self.push_notifications(&app.id).await;
            if let Err(e) = &result {
                warn!(app_id = %app.id, error = %e, "Error pushing application");
            }
            results.push((app.id, result));
        }

        Ok(results)
    }

    fn load(&self, app_id: &str) -> CourierResult<Application> {
        self.store
            .get_application(app_id)?
            .ok_or_else(|| CourierError::ApplicationNotFound(app_id.to_string()))
    }

    /// Get or create the dispatch lock for an application.
    async fn lock_for(&self, app_id: &str) -> Arc<Mutex<()>> {
        {
            let locks = self.locks.read().await;
            if let Some(lock) = locks.get(app_id) {
                return lock.clone();
            }
        }

        let mut locks = self.locks.write().await;
        locks
            .entry(app_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    #[cfg(test)]
    pub(crate) async fn lock_count(&self) -> usize {
        self.locks.read().await.len()
    }
}
