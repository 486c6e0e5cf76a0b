//! APNS courier: dispatches queued push notifications over the legacy
//! binary gateway protocol and correlates asynchronous error frames back
//! onto the notifications that caused them.
//!
//! # Core Invariants
//!
//! 1. **At-most-once**: a notification marked sent is never written again
//! 2. **Silence is success**: no error frame within the poll window means
//!    the whole batch was accepted
//! 3. **Fail-fast**: an error frame at identifier `i` delivers `0..i`,
//!    fails `i`, and leaves everything after `i` untouched
//! 4. **One dispatch per application**: calls for the same application are
//!    serialized
//!
//! # Architecture
//!
//! ```text
//! AppRegistry -> Dispatcher -> GatewayConnection
//!                    |                |
//!                    |<- Collector <--|
//!                    v
//!                PushStore
//! ```

pub mod application;
pub mod collector;
pub mod config;
pub mod courier;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod registry;
pub mod store;

#[cfg(test)]
mod tests;

pub use collector::{BatchOutcome, ResultCollector};
pub use config::CourierConfig;
pub use courier::{Courier, PassReport};
pub use dispatcher::{DispatchConfig, DispatchSummary, Dispatcher};
pub use error::{CourierError, CourierResult};
pub use gateway::{GatewayConnection, GatewayConnector, StreamConnection, TcpGatewayConnector};
pub use protocol::{ErrorFrame, GatewayStatus, NotificationFrame};
pub use registry::AppRegistry;
pub use store::PushStore;
