//! `order-intake <image>...`: upload order screenshots one after another and
//! print the status of each as JSON. Ctrl-C cancels the upload in flight.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use order_intake::admin::{AdminConsole, LoginForm, SESSION_RELOAD_DELAY};
use order_intake::orchestrator::NetworkFailure;
use order_intake::prefs::LocalPrefs;
use order_intake::presenter::{present, present_error};
use order_intake::{
    init_tracing, ClientConfig, HttpOrderApi, ImageFile, UploadError, UploadOrchestrator,
    UploadOutcome, UploadState,
};
use serde_json::json;
use tracing::{error, info, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(2);
        }
    };
    init_tracing(&config);

    let paths: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if paths.is_empty() {
        eprintln!("usage: order-intake <image>...");
        return ExitCode::from(2);
    }

    match run(config, paths).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "order_intake_failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn login_form() -> Option<LoginForm> {
    let username = std::env::var("ORDER_INTAKE_USERNAME").ok()?;
    let password = std::env::var("ORDER_INTAKE_PASSWORD").ok()?;
    Some(LoginForm {
        username,
        password,
        remember: true,
    })
}

async fn sign_in(console: &AdminConsole<HttpOrderApi>) -> Result<String, BoxError> {
    if let Some(form) = login_form() {
        console.login(&form).await?;
    }
    match console.check_auth().await? {
        Some(user) => Ok(user.username),
        None => Err("not signed in; set ORDER_INTAKE_USERNAME and ORDER_INTAKE_PASSWORD".into()),
    }
}

/// Returns whether every image was saved.
async fn run(config: ClientConfig, paths: Vec<PathBuf>) -> Result<bool, BoxError> {
    let api = Arc::new(HttpOrderApi::new(&config)?);
    let mut console = AdminConsole::new(api.clone(), &config);
    if let Some(path) = &config.prefs_path {
        console = console.with_prefs(Arc::new(LocalPrefs::open(path)?));
    }

    let username = sign_in(&console).await?;
    info!(username = %username, base_url = %api.base_url(), "signed_in");

    let orchestrator = UploadOrchestrator::new(api.clone(), &config);
    orchestrator.set_user(Some(username));

    let mut all_saved = true;
    for path in paths {
        let file = path.display().to_string();
        let image = match ImageFile::from_path(&path).await {
            Ok(image) => image,
            Err(e) => {
                warn!(file = %file, error = %e, "image_unreadable");
                println!("{}", json!({ "file": file, "error": e.to_string() }));
                all_saved = false;
                continue;
            }
        };

        let result = tokio::select! {
            result = orchestrator.upload(image) => result,
            _ = tokio::signal::ctrl_c() => {
                if let Err(e) = orchestrator.cancel() {
                    warn!(error = %e, "cancel_rejected");
                }
                Err(UploadError::Cancelled)
            }
        };

        let status = match &result {
            Ok(outcome) => present(outcome),
            Err(e) => present_error(e),
        };
        println!(
            "{}",
            json!({ "file": file, "state": orchestrator.state(), "status": status })
        );

        match result {
            Ok(UploadOutcome::Success { .. }) => {}
            Ok(UploadOutcome::NetworkFailed(NetworkFailure::SessionExpired { .. })) => {
                all_saved = false;
                tokio::time::sleep(SESSION_RELOAD_DELAY).await;
                let username = sign_in(&console).await?;
                orchestrator.set_user(Some(username));
            }
            Ok(_) => all_saved = false,
            Err(UploadError::Cancelled) => return Ok(false),
            Err(_) => all_saved = false,
        }

        match orchestrator.state() {
            UploadState::Success | UploadState::Error => orchestrator.next()?,
            UploadState::HasFile | UploadState::OcrFailed => {
                orchestrator.cancel()?;
            }
            UploadState::Initial | UploadState::Uploading => {}
        }
    }

    for (name, summary) in orchestrator.metrics().summary() {
        info!(metric = name, p50_ms = summary.p50_ms, p95_ms = summary.p95_ms, count = summary.count, "latency");
    }
    Ok(all_saved)
}
