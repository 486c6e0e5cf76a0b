//! Scenario tests for the dispatch engine.
//!
//! - `harness.rs`   - Scripted fake gateway and test context
//! - `delivery.rs`  - Silence-as-success, idempotence, at-most-once
//! - `fail_fast.rs` - Error frames, truncation, reconnect-and-resume
//! - `failures.rs`  - Connection and protocol failures, local rejections
//! - `registry.rs`  - Validation, sandbox defaulting, serialization

mod delivery;
