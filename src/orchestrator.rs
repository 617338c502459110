//! Upload orchestrator: validate -> recognize -> duplicate check -> map ->
//! persist, with exactly one sequence in flight per session.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{info, info_span, warn, Instrument};

use crate::api::{ImageFile, OrderApi, CODE_BAD_REQUEST, CODE_CONFLICT, CODE_FORBIDDEN};
use crate::cancellation::GenerationGuard;
use crate::config::{ClientConfig, Timeouts};
use crate::duplicate::{check_exists, DuplicateCheck};
use crate::error::{ApiError, UploadError};
use crate::mapper::{lookup, normalize, source_of, MapContext};
use crate::metrics::{metric_names, MetricsRegistry, RequestIds};
use crate::order::{Order, OrderField};
use crate::session::UploadSession;
use crate::state_machine::{StateSnapshot, UploadState, UploadStateMachine, ViewConfig};

/// Network call an outcome refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Recognize,
    Persist,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Recognize => write!(f, "recognize"),
            Step::Persist => write!(f, "persist"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OcrFailure {
    NoOrderCode,
    /// Envelope 400: the server refused the image.
    Rejected { message: Option<String> },
    /// Envelope 403.
    Forbidden { message: Option<String> },
    ServiceError { message: Option<String> },
    SaveFailed { message: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkFailure {
    Timeout { step: Step },
    Unreachable { step: Step, detail: String },
    SessionExpired { step: Step },
    BadResponse { step: Step, detail: String },
}

impl NetworkFailure {
    fn from_api(step: Step, err: ApiError) -> Self {
        match err {
            ApiError::Timeout { .. } => NetworkFailure::Timeout { step },
            ApiError::SessionExpired { .. } => NetworkFailure::SessionExpired { step },
            ApiError::Http { .. } | ApiError::Decode { .. } | ApiError::Rejected { .. } => {
                NetworkFailure::BadResponse {
                    step,
                    detail: err.to_string(),
                }
            }
            other => NetworkFailure::Unreachable {
                step,
                detail: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Success {
        order_code: String,
        /// Canonical fields recognized by OCR.
        filled: usize,
        /// The duplicate check could not be completed; the server had the final word.
        check_unavailable: bool,
    },
    DuplicateError {
        order_code: String,
        uploader: Option<String>,
    },
    OcrFailed(OcrFailure),
    NetworkFailed(NetworkFailure),
}

impl UploadOutcome {
    /// State the machine settles in for this outcome.
    pub fn state(&self) -> UploadState {
        match self {
            UploadOutcome::Success { .. } => UploadState::Success,
            // Retryable with the same file.
            UploadOutcome::OcrFailed(_) | UploadOutcome::NetworkFailed(_) => UploadState::OcrFailed,
            UploadOutcome::DuplicateError { .. } => UploadState::Error,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            UploadOutcome::Success { .. } => "success",
            UploadOutcome::DuplicateError { .. } => "duplicate",
            UploadOutcome::OcrFailed(_) => "ocr_failed",
            UploadOutcome::NetworkFailed(_) => "network_failed",
        }
    }
}

/// Result of the recognize half of a sequence, before anything is saved.
#[derive(Debug, Clone)]
pub struct Recognition {
    pub order: Order,
    pub filled: usize,
    pub check: DuplicateCheck,
    pub raw: Value,
}

impl Recognition {
    pub fn order_code(&self) -> &str {
        &self.order.order_code
    }
}

fn text_at(source: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    source
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// Progress reported after OCR and after the duplicate check.
const PROGRESS_OCR_DONE: u8 = 50;
const PROGRESS_CHECK_DONE: u8 = 80;

/// Recognize the image and run the duplicate check. Shared by the upload
/// flow and the admin dialog. `progress` is called as each step completes.
pub(crate) async fn recognize<A: OrderApi>(
    api: &A,
    image: &ImageFile,
    username: Option<String>,
    timeouts: &Timeouts,
    metrics: &Arc<MetricsRegistry>,
    progress: &(dyn Fn(u8) + Sync),
) -> Result<Recognition, UploadOutcome> {
    let timer = metrics.stopwatch(metric_names::OCR_DONE);
    let response = match tokio::time::timeout(timeouts.ocr_processing, api.recognize(image)).await {
        Err(_) => {
            warn!(step = %Step::Recognize, "ocr_timeout");
            return Err(UploadOutcome::NetworkFailed(NetworkFailure::Timeout {
                step: Step::Recognize,
            }));
        }
        Ok(Err(e)) => {
            warn!(step = %Step::Recognize, error = %e, "ocr_request_failed");
            return Err(UploadOutcome::NetworkFailed(NetworkFailure::from_api(Step::Recognize, e)));
        }
        Ok(Ok(response)) => response,
    };
    timer.finish();

    let message = response.message().map(str::to_owned);
    if !response.is_success() {
        let code = response.code();
        warn!(code, status = response.status, message = ?message, "ocr_rejected");
        let data = response.envelope.data.unwrap_or(Value::Null);
        return Err(match code {
            CODE_CONFLICT => {
                let source = data.as_object();
                UploadOutcome::DuplicateError {
                    order_code: source
                        .and_then(|s| text_at(s, OrderField::OrderCode.key()))
                        .unwrap_or_default(),
                    uploader: source.and_then(|s| text_at(s, "existing_uploader")),
                }
            }
            CODE_BAD_REQUEST => UploadOutcome::OcrFailed(OcrFailure::Rejected { message }),
            CODE_FORBIDDEN => UploadOutcome::OcrFailed(OcrFailure::Forbidden { message }),
            _ => UploadOutcome::OcrFailed(OcrFailure::ServiceError { message }),
        });
    }

    let raw = response.envelope.data.unwrap_or(Value::Null);
    let Some(order_code) = source_of(&raw).and_then(|s| lookup(s, OrderField::OrderCode)) else {
        warn!("ocr_no_order_code");
        return Err(UploadOutcome::OcrFailed(OcrFailure::NoOrderCode));
    };
    info!(order_code = %order_code, "ocr_done");
    progress(PROGRESS_OCR_DONE);

    let timer = metrics.stopwatch(metric_names::DUPLICATE_CHECK);
    let check = check_exists(api, &order_code, timeouts.duplicate_check).await;
    timer.finish();
    progress(PROGRESS_CHECK_DONE);
    if let DuplicateCheck::Exists { uploader } = &check {
        info!(order_code = %order_code, uploader = ?uploader, "duplicate_detected");
        return Err(UploadOutcome::DuplicateError {
            order_code,
            uploader: uploader.clone(),
        });
    }

    // The image reference comes from the OCR response, falling back to the local name.
    let top = raw.as_object();
    let source = source_of(&raw);
    let image_field = |key: &str| {
        source
            .and_then(|s| text_at(s, key))
            .or_else(|| top.and_then(|t| text_at(t, key)))
    };
    let ctx = MapContext {
        username,
        img_path: image_field("img_path").unwrap_or_default(),
        img_filename: image_field("img_filename").unwrap_or_else(|| image.name.clone()),
    };
    let mapped = normalize(&raw, &ctx);

    Ok(Recognition {
        order: mapped.order,
        filled: mapped.filled,
        check,
        raw,
    })
}

/// Save a recognized order and classify the server's answer.
pub(crate) async fn persist<A: OrderApi>(
    api: &A,
    recognition: &Recognition,
    timeouts: &Timeouts,
    metrics: &Arc<MetricsRegistry>,
) -> UploadOutcome {
    let order = &recognition.order;
    if order.validate_for_create().is_err() {
        return UploadOutcome::OcrFailed(OcrFailure::NoOrderCode);
    }

    let timer = metrics.stopwatch(metric_names::PERSIST_DONE);
    let response = match tokio::time::timeout(timeouts.api_request, api.create_order(order)).await {
        Err(_) => {
            warn!(order_code = %order.order_code, "persist_timeout");
            return UploadOutcome::NetworkFailed(NetworkFailure::Timeout { step: Step::Persist });
        }
        Ok(Err(e)) => {
            warn!(order_code = %order.order_code, error = %e, "persist_failed");
            return UploadOutcome::NetworkFailed(NetworkFailure::from_api(Step::Persist, e));
        }
        Ok(Ok(response)) => response,
    };
    timer.finish();

    if response.is_success() {
        info!(order_code = %order.order_code, "order_saved");
        return UploadOutcome::Success {
            order_code: order.order_code.clone(),
            filled: recognition.filled,
            check_unavailable: recognition.check.is_unavailable(),
        };
    }

    let message = response.message().map(str::to_owned);
    warn!(order_code = %order.order_code, code = response.code(), message = ?message, "persist_rejected");
    if response.code() == CODE_CONFLICT {
        let uploader = response
            .envelope
            .data
            .as_ref()
            .and_then(Value::as_object)
            .and_then(|d| text_at(d, "existing_uploader"));
        return UploadOutcome::DuplicateError {
            order_code: order.order_code.clone(),
            uploader,
        };
    }
    UploadOutcome::OcrFailed(OcrFailure::SaveFailed { message })
}

pub struct UploadOrchestrator<A> {
    api: Arc<A>,
    timeouts: Timeouts,
    max_upload_bytes: u64,
    machine: UploadStateMachine,
    session: UploadSession,
    user: RwLock<Option<String>>,
    metrics: Arc<MetricsRegistry>,
    cancel_requested: Mutex<Option<Instant>>,
}

impl<A: OrderApi> UploadOrchestrator<A> {
    pub fn new(api: Arc<A>, config: &ClientConfig) -> Self {
        Self {
            api,
            timeouts: config.timeouts,
            max_upload_bytes: config.max_upload_bytes,
            machine: UploadStateMachine::new(),
            session: UploadSession::new(),
            user: RwLock::new(None),
            metrics: Arc::new(MetricsRegistry::new()),
            cancel_requested: Mutex::new(None),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Username recorded as the uploader of saved orders.
    pub fn set_user(&self, username: Option<String>) {
        *self.user.write() = username;
    }

    pub fn state(&self) -> UploadState {
        self.machine.current()
    }

    pub fn view(&self) -> ViewConfig {
        self.machine.current().view()
    }

    pub fn subscribe(&self) -> watch::Receiver<StateSnapshot> {
        self.machine.subscribe()
    }

    pub fn selected_file(&self) -> Option<Arc<ImageFile>> {
        self.session.selected()
    }

    /// Pick (or replace) the image. An invalid file is rejected before the
    /// state changes.
    pub fn select_file(&self, image: ImageFile) -> Result<(), UploadError> {
        if let Err(e) = image.validate(self.max_upload_bytes) {
            warn!(file = %image.name, error = %e, "file_rejected");
            return Err(e.into());
        }
        let name = image.name.clone();
        self.session.select(image, || {
            let state = self.machine.current();
            if state.is_terminal() {
                return Err(UploadError::InvalidState { state });
            }
            self.machine.transition(UploadState::HasFile).map(|_| ())
        })?;
        info!(file = %name, "file_selected");
        Ok(())
    }

    /// Run one full sequence. Returns `UploadError::Cancelled` when the
    /// sequence was cancelled; the state then already reads `initial`.
    pub async fn submit(&self) -> Result<UploadOutcome, UploadError> {
        let started = Instant::now();
        let (guard, image) = self.session.begin(|image| {
            let state = self.machine.current();
            if state == UploadState::Uploading {
                return Err(UploadError::Busy);
            }
            if !state.accepts_submit() {
                return Err(UploadError::InvalidState { state });
            }
            image.validate(self.max_upload_bytes)?;
            self.machine.transition(UploadState::Uploading).map(|_| ())
        })?;

        let ids = RequestIds::new(guard.my_generation());
        let span = info_span!(
            "upload",
            trace_id = %ids.trace_id,
            request_id = %ids.request_id,
            generation = ids.generation,
            file = %image.name,
        );

        let sequence = self.run_sequence(&guard, &image).instrument(span.clone());
        let Some(outcome) = guard.run(sequence).await else {
            if let Some(at) = self.cancel_requested.lock().take() {
                self.metrics.record(metric_names::CANCEL_LATENCY, at.elapsed());
            }
            span.in_scope(|| info!("upload_cancelled"));
            return Err(UploadError::Cancelled);
        };

        let published = self.session.complete(&guard, || self.machine.transition(outcome.state()));
        match published {
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e),
            None => {
                span.in_scope(|| info!("late_result_discarded"));
                return Err(UploadError::Cancelled);
            }
        }
        self.metrics.record(metric_names::UPLOAD_TOTAL, started.elapsed());
        span.in_scope(|| info!(outcome = outcome.kind(), "upload_finished"));
        Ok(outcome)
    }

    async fn run_sequence(&self, guard: &GenerationGuard, image: &ImageFile) -> UploadOutcome {
        self.progress(guard, 10);
        let username = self.user.read().clone();
        let report = |percent: u8| self.progress(guard, percent);
        let recognition =
            match recognize(self.api.as_ref(), image, username, &self.timeouts, &self.metrics, &report).await {
                Ok(recognition) => recognition,
                Err(outcome) => return outcome,
            };
        if recognition.check.is_unavailable() {
            warn!(order_code = %recognition.order_code(), "duplicate_check_unavailable_proceeding");
        }
        let outcome = persist(self.api.as_ref(), &recognition, &self.timeouts, &self.metrics).await;
        self.progress(guard, 90);
        outcome
    }

    fn progress(&self, guard: &GenerationGuard, percent: u8) {
        if guard.should_continue() {
            self.machine.set_progress(percent);
        }
    }

    /// Abort the in-flight sequence (if any), drop the file and go back to
    /// `initial`. Not available once a sequence has finished; use `next`.
    pub fn cancel(&self) -> Result<bool, UploadError> {
        let requested = Instant::now();
        let interrupted = self.session.cancel(|| {
            let state = self.machine.current();
            if state == UploadState::Initial || state.is_terminal() {
                return Err(UploadError::InvalidState { state });
            }
            self.machine.force_initial();
            Ok(())
        })?;
        if interrupted {
            *self.cancel_requested.lock() = Some(requested);
        }
        info!(interrupted, "upload_cancel");
        Ok(interrupted)
    }

    /// Leave `success` / `error` for a fresh `initial`.
    pub fn next(&self) -> Result<(), UploadError> {
        self.session.reset(|| {
            let state = self.machine.current();
            if !state.is_terminal() {
                return Err(UploadError::InvalidState { state });
            }
            self.machine.transition(UploadState::Initial).map(|_| ())
        })
    }

    /// Select `image` and submit it.
    pub async fn upload(&self, image: ImageFile) -> Result<UploadOutcome, UploadError> {
        self.select_file(image)?;
        self.submit().await
    }
}
