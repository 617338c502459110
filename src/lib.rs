//! Order intake client: screenshot upload with OCR reconciliation, the
//! upload state workflow, and the admin console API.

pub mod admin;
pub mod api;
pub mod cancellation;
pub mod config;
pub mod duplicate;
pub mod error;
pub mod mapper;
pub mod metrics;
pub mod orchestrator;
pub mod order;
pub mod prefs;
pub mod presenter;
pub mod session;
pub mod state_machine;

pub use admin::{AdminConsole, ConsoleError};
pub use api::http::HttpOrderApi;
pub use api::{ConsoleApi, ImageFile, OrderApi};
pub use config::ClientConfig;
pub use error::{ApiError, UploadError, ValidationError};
pub use orchestrator::{UploadOrchestrator, UploadOutcome};
pub use presenter::{present, StatusPayload};
pub use state_machine::UploadState;

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
/// A second call is a no-op.
pub fn init_tracing(config: &ClientConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(format!("order_intake={}", config.log_level))
            .unwrap_or_else(|_| EnvFilter::new("order_intake=info"))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(config.debug);

    let _ = if config.log_json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
