//! SQLite storage layer for the APNS courier.
//!
//! This crate provides:
//! - Database migrations
//! - Model types for applications and notifications
//! - Query methods for the dispatch engine (pending selection, outcome commits)
//!
//! # Architecture
//!
//! A single `rusqlite::Connection` sits behind a mutex so the `Database` can be
//! shared across tasks with `Arc<Database>`. Every statement is short and
//! synchronous; callers on async runtimes invoke it directly.
//!
//! ```ignore
//! let db = Database::open(path)?;
//! let pending = db.find_unsent_notifications(&app.id)?;
//! ```

mod db;
mod error;
mod migrations;
mod models;

pub use db::Database;
pub use error::{DatabaseError, DatabaseResult};
pub use migrations::{run_migrations, CURRENT_VERSION};
pub use models::*;
