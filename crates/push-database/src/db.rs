//! Database connection and query operations.

use crate::{
    migrations, Application, DatabaseError, DatabaseResult, NewApplication, NewNotification,
    Notification,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::debug;

const APPLICATION_COLUMNS: &str =
    "id, name, dev_cert, prod_cert, sandbox_mode, created_at, updated_at";

const NOTIFICATION_COLUMNS: &str = "id, app_id, sequence_number, device_token, payload, expires_at, \
     sent, result_code, attempts, sent_at, created_at, updated_at";

/// Database wrapper with query methods.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open a database at the given path, running migrations if needed.
    pub fn open(path: &Path) -> DatabaseResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database for testing.
    pub fn open_in_memory() -> DatabaseResult<Self> {
        let conn = Connection::open_in_memory()?;
        // Note: WAL mode doesn't apply to in-memory databases
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ==========================================
    // Applications
    // ==========================================

    /// Insert a new application.
    pub fn insert_application(&self, app: &NewApplication) -> DatabaseResult<Application> {
        let now = Utc::now().to_rfc3339();
        self.conn.lock().execute(
            "INSERT INTO applications (id, name, dev_cert, prod_cert, sandbox_mode, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                app.id,
                app.name,
                app.dev_cert,
                app.prod_cert,
                app.sandbox_mode,
                now
            ],
        )?;
        debug!(app_id = %app.id, "Inserted application");
        self.get_application(&app.id)?
            .ok_or_else(|| DatabaseError::NotFound("Application not found after insert".to_string()))
    }

    /// Get an application by ID.
    pub fn get_application(&self, id: &str) -> DatabaseResult<Option<Application>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = ?1"
        ))?;
        let app = stmt.query_row(params![id], map_application).optional()?;
        Ok(app)
    }

    /// List all applications, oldest first.
    pub fn list_applications(&self) -> DatabaseResult<Vec<Application>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications ORDER BY created_at, id"
        ))?;
        let apps = stmt
            .query_map([], map_application)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(apps)
    }

    /// Persist the mutable fields of an application.
    pub fn update_application(&self, app: &Application) -> DatabaseResult<bool> {
        let count = self.conn.lock().execute(
            "UPDATE applications
             SET name = ?2, dev_cert = ?3, prod_cert = ?4, sandbox_mode = ?5, updated_at = ?6
             WHERE id = ?1",
            params![
                app.id,
                app.name,
                app.dev_cert,
                app.prod_cert,
                app.sandbox_mode,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(count > 0)
    }

    // ==========================================
    // Notifications
    // ==========================================

    /// Insert a new notification at the tail of its application's queue.
    pub fn insert_notification(&self, notification: &NewNotification) -> DatabaseResult<Notification> {
        let payload = serde_json::to_string(&notification.payload)?;
        let now = Utc::now().to_rfc3339();
        {
            let conn = self.conn.lock();
            let next_sequence: i64 = conn.query_row(
                "SELECT COALESCE(MAX(sequence_number), 0) + 1 FROM notifications WHERE app_id = ?1",
                params![notification.app_id],
                |row| row.get(0),
            )?;
            conn.execute(
                "INSERT INTO notifications (id, app_id, sequence_number, device_token, payload, expires_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    notification.id,
                    notification.app_id,
                    next_sequence,
                    notification.device_token,
                    payload,
                    notification.expires_at.map(|dt| dt.to_rfc3339()),
                    now
                ],
            )?;
            debug!(
                app_id = %notification.app_id,
                notification_id = %notification.id,
                sequence = next_sequence,
                "Inserted notification"
            );
        }
        self.get_notification(&notification.id)?
            .ok_or_else(|| DatabaseError::NotFound("Notification not found after insert".to_string()))
    }

    /// Get a notification by ID.
    pub fn get_notification(&self, id: &str) -> DatabaseResult<Option<Notification>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1"
        ))?;
        let notification = stmt.query_row(params![id], map_notification).optional()?;
        Ok(notification)
    }

    /// Get the notifications of an application that were never sent, in queue order.
    pub fn find_unsent_notifications(&self, app_id: &str) -> DatabaseResult<Vec<Notification>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE app_id = ?1 AND sent = 0 ORDER BY sequence_number"
        ))?;
        let notifications = stmt
            .query_map(params![app_id], map_notification)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notifications)
    }

    /// Persist the dispatch state of a notification.
    ///
    /// A stored `sent = 1` is never cleared, whatever the record says.
    pub fn update_notification(&self, notification: &Notification) -> DatabaseResult<()> {
        let count = self.conn.lock().execute(
            "UPDATE notifications
             SET sent = CASE WHEN sent = 1 THEN 1 ELSE ?2 END,
                 result_code = ?3,
                 attempts = ?4,
                 sent_at = COALESCE(sent_at, ?5),
                 updated_at = ?6
             WHERE id = ?1",
            params![
                notification.id,
                notification.sent,
                notification.result_code,
                notification.attempts,
                notification.sent_at.map(|dt| dt.to_rfc3339()),
                Utc::now().to_rfc3339()
            ],
        )?;

        if count == 0 {
            return Err(DatabaseError::NotFound(format!(
                "Notification {}",
                notification.id
            )));
        }
        Ok(())
    }
}

// ==========================================
// Helpers
// ==========================================

fn map_application(row: &Row<'_>) -> rusqlite::Result<Application> {
    Ok(Application {
        id: row.get(0)?,
        name: row.get(1)?,
        dev_cert: row.get(2)?,
        prod_cert: row.get(3)?,
        sandbox_mode: row.get(4)?,
        created_at: parse_datetime(row.get::<_, String>(5)?),
        updated_at: parse_datetime(row.get::<_, String>(6)?),
    })
}

fn map_notification(row: &Row<'_>) -> rusqlite::Result<Notification> {
    let payload: String = row.get(4)?;
    let payload = serde_json::from_str(&payload).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Notification {
        id: row.get(0)?,
        app_id: row.get(1)?,
        sequence_number: row.get(2)?,
        device_token: row.get(3)?,
        payload,
        expires_at: row.get::<_, Option<String>>(5)?.map(parse_datetime),
        sent: row.get(6)?,
        result_code: row.get(7)?,
        attempts: row.get(8)?,
        sent_at: row.get::<_, Option<String>>(9)?.map(parse_datetime),
        created_at: parse_datetime(row.get::<_, String>(10)?),
        updated_at: parse_datetime(row.get::<_, String>(11)?),
    })
}

/// Parse an RFC3339 datetime string, falling back to current time on error.
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup_test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.insert_application(&NewApplication {
            id: "app-1".to_string(),
            name: "Test".to_string(),
            dev_cert: "dev-cert".to_string(),
            prod_cert: "prod-cert".to_string(),
            sandbox_mode: None,
        })
        .unwrap();
        db
    }

    fn enqueue(db: &Database, count: usize) -> Vec<Notification> {
        (0..count)
            .map(|i| {
                db.insert_notification(&NewNotification::new(
                    "app-1",
                    &"ab".repeat(32),
                    json!({ "aps": { "alert": format!("hello {}", i) } }),
                ))
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_application_roundtrip_keeps_unset_sandbox_mode() {
        let db = setup_test_db();

        let app = db.get_application("app-1").unwrap().unwrap();
        assert_eq!(app.name, "Test");
        assert_eq!(app.dev_cert, "dev-cert");
        assert!(app.sandbox_mode.is_none());

        assert!(db.get_application("missing").unwrap().is_none());
    }

    #[test]
    fn test_update_application_sandbox_mode() {
        let db = setup_test_db();

        let mut app = db.get_application("app-1").unwrap().unwrap();
        app.sandbox_mode = Some(false);
        assert!(db.update_application(&app).unwrap());

        let reloaded = db.get_application("app-1").unwrap().unwrap();
        assert_eq!(reloaded.sandbox_mode, Some(false));
    }

    #[test]
    fn test_list_applications() {
        let db = setup_test_db();
        db.insert_application(&NewApplication {
            id: "app-2".to_string(),
            name: "Other".to_string(),
            dev_cert: "d".to_string(),
            prod_cert: "p".to_string(),
            sandbox_mode: Some(true),
        })
        .unwrap();

        let ids: Vec<String> = db.list_applications().unwrap().into_iter().map(|a| a.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"app-1".to_string()));
        assert!(ids.contains(&"app-2".to_string()));
    }

    #[test]
    fn test_insert_notification_assigns_sequence() {
        let db = setup_test_db();
        let notifications = enqueue(&db, 3);

        let sequences: Vec<i64> = notifications.iter().map(|n| n.sequence_number).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert!(notifications.iter().all(|n| !n.sent && n.result_code.is_none()));
        assert_eq!(db.find_unsent_notifications("app-1").unwrap().len(), 3);
        assert_eq!(
            notifications[1].payload,
            json!({ "aps": { "alert": "hello 1" } })
        );
    }

    #[test]
    fn test_notification_requires_application() {
        let db = setup_test_db();
        let result =
            db.insert_notification(&NewNotification::new("missing", "00", json!({})));
        assert!(result.is_err());
    }

    #[test]
    fn test_find_unsent_notifications_skips_sent() {
        let db = setup_test_db();
        let notifications = enqueue(&db, 3);

        let mut first = notifications[0].clone();
        first.sent = true;
        first.result_code = Some(0);
        first.attempts = 1;
        first.sent_at = Some(Utc::now());
        db.update_notification(&first).unwrap();

        let unsent = db.find_unsent_notifications("app-1").unwrap();
        let ids: Vec<&str> = unsent.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec![notifications[1].id.as_str(), notifications[2].id.as_str()]);
    }

    #[test]
    fn test_update_notification_never_clears_sent() {
        let db = setup_test_db();
        let notification = enqueue(&db, 1).remove(0);

        let mut sent = notification.clone();
        sent.sent = true;
        sent.result_code = Some(0);
        db.update_notification(&sent).unwrap();

        // A stale copy must not resurrect the notification
        let mut stale = notification;
        stale.result_code = Some(8);
        db.update_notification(&stale).unwrap();

        let reloaded = db.get_notification(&stale.id).unwrap().unwrap();
        assert!(reloaded.sent);
        assert_eq!(reloaded.result_code, Some(8));
    }

    #[test]
    fn test_update_missing_notification() {
        let db = setup_test_db();
        let mut notification = enqueue(&db, 1).remove(0);
        notification.id = "missing".to_string();

        assert!(matches!(
            db.update_notification(&notification),
            Err(DatabaseError::NotFound(_))
        ));
    }

    #[test]
    fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("courier.db");

        {
            let db = Database::open(&path).unwrap();
            db.insert_application(&NewApplication {
                id: "app-1".to_string(),
                name: "Persisted".to_string(),
                dev_cert: "d".to_string(),
                prod_cert: "p".to_string(),
                sandbox_mode: Some(true),
            })
            .unwrap();
        }

        let db = Database::open(&path).unwrap();
        let app = db.get_application("app-1").unwrap().unwrap();
        assert_eq!(app.name, "Persisted");
        assert_eq!(app.sandbox_mode, Some(true));
    }
}
