//! Storage seam used by the registry and the dispatcher.

use crate::error::CourierResult;
use push_database::{Application, Database, NewApplication, NewNotification, Notification};

/// Persistence the dispatch engine depends on.
pub trait PushStore: Send + Sync {
    fn insert_application(&self, app: &NewApplication) -> CourierResult<Application>;

    fn get_application(&self, id: &str) -> CourierResult<Option<Application>>;

    fn list_applications(&self) -> CourierResult<Vec<Application>>;

    fn save_application(&self, app: &Application) -> CourierResult<()>;

    fn insert_notification(&self, notification: &NewNotification) -> CourierResult<Notification>;

    /// Unsent notifications of an application, in queue order.
    fn find_unsent_notifications(&self, app_id: &str) -> CourierResult<Vec<Notification>>;

    fn save_notification(&self, notification: &Notification) -> CourierResult<()>;
}

impl PushStore for Database {
    fn insert_application(&self, app: &NewApplication) -> CourierResult<Application> {
        Ok(Database::insert_application(self, app)?)
    }

    fn get_application(&self, id: &str) -> CourierResult<Option<Application>> {
        Ok(Database::get_application(self, id)?)
    }

    fn list_applications(&self) -> CourierResult<Vec<Application>> {
        Ok(Database::list_applications(self)?)
    }

    fn save_application(&self, app: &Application) -> CourierResult<()> {
        Database::update_application(self, app)?;
        Ok(())
    }

    fn insert_notification(&self, notification: &NewNotification) -> CourierResult<Notification> {
        Ok(Database::insert_notification(self, notification)?)
    }

    fn find_unsent_notifications(&self, app_id: &str) -> CourierResult<Vec<Notification>> {
        Ok(Database::find_unsent_notifications(self, app_id)?)
    }

    fn save_notification(&self, notification: &Notification) -> CourierResult<()> {
        Ok(Database::update_notification(self, notification)?)
    }
}
