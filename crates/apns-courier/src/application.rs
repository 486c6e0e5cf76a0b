//! Application configuration: sandbox-mode defaulting and credential checks.
//!
//! Normalisation is an explicit step run before every validation and every
//! dispatch, never a side effect of a read-only check.

use crate::error::{CourierError, CourierResult};
use push_database::Application;

/// Environment used when an application never chose one.
pub const DEFAULT_SANDBOX_MODE: bool = true;

/// Fill in an unset sandbox mode. Returns whether the application changed.
pub fn resolve_sandbox_mode(app: &mut Application) -> bool {
    if app.sandbox_mode.is_some() {
        return false;
    }
    app.sandbox_mode = Some(DEFAULT_SANDBOX_MODE);
    true
}

/// Both certificates must be present.
pub fn validate_credentials(dev_cert: &str, prod_cert: &str) -> CourierResult<()> {
    if dev_cert.trim().is_empty() {
        return Err(CourierError::Config(
            "Development certificate is required".to_string(),
        ));
    }
    if prod_cert.trim().is_empty() {
        return Err(CourierError::Config(
            "Production certificate is required".to_string(),
        ));
    }
    Ok(())
}

/// Credential and environment flag used to open a gateway connection.
pub fn gateway_credential(app: &Application) -> (&str, bool) {
    let sandbox = app.sandbox_mode.unwrap_or(DEFAULT_SANDBOX_MODE);
    if sandbox {
        (&app.dev_cert, true)
    } else {
        (&app.prod_cert, false)
    }
}
