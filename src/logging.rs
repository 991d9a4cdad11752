//! # Structured Logging Module
//!
//! Process-wide `tracing` subscriber setup plus helpers that give flow-start
//! and smart group lifecycle records a uniform shape.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::models::{GroupId, OrgId, StartId};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initializes structured logging once per process. `RUST_LOG` takes
/// precedence over the configured level.
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(filter_directive(config)));

        let json_layer = config.json.then(|| {
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_current_span(true)
        });
        let text_layer = (!config.json).then(|| {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
        });

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(json_layer)
            .with(text_layer);

        // a global subscriber may already be installed by the host process
        if subscriber.try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized");
        }

        tracing::info!(
            level = %config.level,
            json = config.json,
            "Structured logging initialized"
        );
    });
}

fn filter_directive(config: &LoggingConfig) -> String {
    if config.level.trim().is_empty() {
        "info".to_string()
    } else {
        config.level.clone()
    }
}

/// Log a flow start lifecycle transition
pub fn log_start_operation(
    operation: &str,
    start_id: StartId,
    org_id: OrgId,
    status: &str,
    contact_count: Option<usize>,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        start_id = %start_id,
        org_id = %org_id,
        status = %status,
        contact_count = contact_count,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "START_OPERATION"
    );
}

/// Log a smart group evaluation outcome
pub fn log_group_operation(
    operation: &str,
    group_id: GroupId,
    org_id: OrgId,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        group_id = %group_id,
        org_id = %org_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "GROUP_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "ERROR"
    );
}
