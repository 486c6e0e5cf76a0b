//! Courier binary entry point.
//!
//! Usage: apns-courier [--once] [--app-id <id>]

use anyhow::Context;
use apns_courier::{
    AppRegistry, Courier, CourierConfig, Dispatcher, PushStore, TcpGatewayConnector,
};
use clap::Parser;
use push_database::Database;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Dispatches queued push notifications to the APNS gateway.
#[derive(Parser, Debug)]
#[command(name = "apns-courier")]
#[command(about = "Dispatches queued push notifications over the binary APNS protocol")]
struct Args {
    /// Path to the notification database.
    #[arg(long, env = "APNS_COURIER_DB")]
    database: Option<PathBuf>,

    /// Only dispatch this application.
    #[arg(long)]
    app_id: Option<String>,

    /// Run a single pass and print the results as JSON.
    #[arg(long)]
    once: bool,

    /// Seconds between passes in loop mode.
    #[arg(long, env = "APNS_DISPATCH_INTERVAL_SECS")]
    interval_secs: Option<u64>,

    /// How long gateway silence must last before a batch counts as delivered.
    #[arg(long, env = "APNS_POLL_TIMEOUT_MS")]
    poll_timeout_ms: Option<u64>,

    /// Sandbox gateway address.
    #[arg(long, env = "APNS_SANDBOX_GATEWAY")]
    sandbox_gateway: Option<String>,

    /// Production gateway address.
    #[arg(long, env = "APNS_PRODUCTION_GATEWAY")]
    production_gateway: Option<String>,

    /// Fresh connections allowed per dispatch after an error frame.
    #[arg(long, env = "APNS_RECONNECT_ATTEMPTS")]
    reconnect_attempts: Option<u32>,

    /// Stop retrying notifications the gateway rejected permanently.
    #[arg(long)]
    skip_terminal_failures: bool,

    /// JSONL log file [default: ~/.apns-courier/logs/apns-courier.jsonl]
    #[arg(long, env = "APNS_COURIER_LOG")]
    log_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    observability::init_with_config(observability::LogConfig {
        service_name: "apns-courier".into(),
        default_level: args.log_level.clone(),
        log_path: args
            .log_file
            .clone()
            .or_else(|| observability::default_log_path("apns-courier")),
        also_stderr: true,
    });

    info!("APNS courier starting...");

    let mut config = CourierConfig::from_env()?;

    // CLI args win over the environment
    if let Some(database) = args.database {
        config.database_path = database;
    }
    if let Some(secs) = args.interval_secs {
        config.dispatch_interval = Duration::from_secs(secs);
    }
    if let Some(ms) = args.poll_timeout_ms {
        config.poll_timeout = Duration::from_millis(ms);
    }
    if let Some(addr) = args.sandbox_gateway {
        config.sandbox_gateway = addr;
    }
    if let Some(addr) = args.production_gateway {
        config.production_gateway = addr;
    }
    if let Some(attempts) = args.reconnect_attempts {
        config.reconnect_attempts = attempts;
    }
    if args.skip_terminal_failures {
        config.skip_terminal_failures = true;
    }
    config.validate()?;

    info!(
        database = %config.database_path.display(),
        sandbox_gateway = %config.sandbox_gateway,
        production_gateway = %config.production_gateway,
        poll_timeout_ms = config.poll_timeout.as_millis() as u64,
        reconnect_attempts = config.reconnect_attempts,
        skip_terminal_failures = config.skip_terminal_failures,
        "Configuration loaded"
    );

    let db = Database::open(&config.database_path).with_context(|| {
        format!(
            "Failed to open database at {}",
            config.database_path.display()
        )
    })?;

    let mut connector =
        TcpGatewayConnector::new(&config.sandbox_gateway, &config.production_gateway);
    connector.connect_timeout = config.connect_timeout;

    let store: Arc<dyn PushStore> = Arc::new(db);
    let dispatcher = Dispatcher::new(Arc::new(connector), store.clone(), config.dispatch_config());
    let registry = Arc::new(AppRegistry::new(store, dispatcher));
    let courier = Courier::new(registry, config.dispatch_interval);

    if args.once {
        let reports = courier.run_once(args.app_id.as_deref()).await?;
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    tokio::select! {
        result = courier.run() => {
            if let Err(e) = result {
                error!(error = %e, "Courier exited with error");
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, exiting...");
        }
    }

    Ok(())
}
