//! OCR status presenter: outcome -> user-facing severity, title, message, hint.
//! Pure. Server messages are used only when present and non-empty.

use serde::Serialize;

use crate::admin::SaveReport;
use crate::error::{UploadError, ValidationError};
use crate::orchestrator::{NetworkFailure, OcrFailure, Recognition, Step, UploadOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Warning,
    Error,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusPayload {
    pub severity: Severity,
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl StatusPayload {
    fn new(severity: Severity, title: &str, message: impl Into<String>, hint: Option<&str>) -> Self {
        Self {
            severity,
            title: title.to_string(),
            message: message.into(),
            hint: hint.map(str::to_owned),
        }
    }
}

/// One shape for every duplicate, wherever it was detected.
pub fn duplicate(order_code: &str, uploader: Option<&str>) -> StatusPayload {
    let who = uploader.unwrap_or("another user");
    StatusPayload::new(
        Severity::Warning,
        "Order already exists",
        format!("Order code \"{order_code}\" was uploaded by {who}"),
        Some("Find it in the order list instead of uploading it again."),
    )
}

fn server_or<'a>(message: &'a Option<String>, default: &'a str) -> &'a str {
    message
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(default)
}

pub fn present(outcome: &UploadOutcome) -> StatusPayload {
    match outcome {
        UploadOutcome::Success {
            order_code,
            check_unavailable,
            ..
        } => StatusPayload::new(
            Severity::Success,
            "Upload successful",
            format!("Order code: {order_code}"),
            check_unavailable
                .then_some("Duplicate check was unavailable; the server confirmed the order is new."),
        ),
        UploadOutcome::DuplicateError { order_code, uploader } => {
            duplicate(order_code, uploader.as_deref())
        }
        UploadOutcome::OcrFailed(failure) => present_ocr_failure(failure),
        UploadOutcome::NetworkFailed(failure) => present_network_failure(failure),
    }
}

fn present_ocr_failure(failure: &OcrFailure) -> StatusPayload {
    match failure {
        OcrFailure::NoOrderCode => StatusPayload::new(
            Severity::Error,
            "Recognition failed",
            "No order code recognized",
            Some("Make sure the order number is clearly visible in the screenshot."),
        ),
        OcrFailure::Rejected { message } => StatusPayload::new(
            Severity::Error,
            "Recognition failed",
            server_or(message, "The image could not be recognized"),
            Some("Upload a clearer screenshot of the order page."),
        ),
        OcrFailure::Forbidden { message } => StatusPayload::new(
            Severity::Error,
            "Permission denied",
            server_or(message, "You are not allowed to upload orders"),
            Some("Sign in with an account that can upload orders."),
        ),
        OcrFailure::ServiceError { message } => StatusPayload::new(
            Severity::Error,
            "Recognition failed",
            server_or(message, "The recognition service returned an error"),
            Some("Try again later."),
        ),
        OcrFailure::SaveFailed { message } => StatusPayload::new(
            Severity::Error,
            "Save failed",
            server_or(message, "The order could not be saved"),
            Some("Retry; if it keeps failing, contact an administrator."),
        ),
    }
}

fn present_network_failure(failure: &NetworkFailure) -> StatusPayload {
    match failure {
        NetworkFailure::Timeout { step: Step::Recognize } => StatusPayload::new(
            Severity::Error,
            "Request timed out",
            "Recognition took too long",
            Some("Try again later or upload a smaller image."),
        ),
        NetworkFailure::Timeout { step: Step::Persist } => StatusPayload::new(
            Severity::Error,
            "Request timed out",
            "Saving the order took too long",
            Some("Check the order list before retrying; the order may already be saved."),
        ),
        NetworkFailure::Unreachable { .. } => StatusPayload::new(
            Severity::Error,
            "Network error",
            "Could not reach the server",
            Some("Check your network connection and try again."),
        ),
        NetworkFailure::SessionExpired { .. } => StatusPayload::new(
            Severity::Warning,
            "Session expired",
            "Your session has expired",
            Some("Sign in again to continue."),
        ),
        NetworkFailure::BadResponse { .. } => StatusPayload::new(
            Severity::Error,
            "Server error",
            "The server sent an unexpected response",
            Some("Try again later."),
        ),
    }
}

/// Recognize-for-form result shown in the admin dialog.
pub fn present_recognition(recognition: &Recognition) -> StatusPayload {
    let message = format!(
        "Order code: {}, {} fields filled",
        recognition.order_code(),
        recognition.filled
    );
    if recognition.check.is_unavailable() {
        StatusPayload::new(
            Severity::Info,
            "Recognized, duplicate check unavailable",
            message,
            Some("The server will reject the order on save if it already exists."),
        )
    } else {
        StatusPayload::new(
            Severity::Success,
            "Recognized",
            message,
            Some("Review the fields before saving."),
        )
    }
}

/// Admin form save. Flags a save the duplicate pre-check could not vet.
pub fn present_saved(report: &SaveReport) -> StatusPayload {
    let message = format!("Order code: {}", report.order_code);
    if report.check_unavailable {
        StatusPayload::new(
            Severity::Info,
            "Saved, duplicate check unavailable",
            message,
            Some("The server accepted the order as new."),
        )
    } else {
        StatusPayload::new(Severity::Success, "Order saved", message, None)
    }
}

pub fn present_rejection(error: &ValidationError) -> StatusPayload {
    let hint = match error {
        ValidationError::TooLarge { limit, .. } => {
            Some(format!("Choose an image under {} MB.", limit / (1024 * 1024)))
        }
        ValidationError::NotAnImage { .. } | ValidationError::UnsupportedImageType { .. } => {
            Some("Choose a JPG, PNG or GIF image.".to_string())
        }
        _ => None,
    };
    StatusPayload {
        severity: Severity::Error,
        title: "Invalid input".to_string(),
        message: error.to_string(),
        hint,
    }
}

/// Control errors (busy, cancelled, wrong state).
pub fn present_error(error: &UploadError) -> StatusPayload {
    match error {
        UploadError::Invalid(e) => present_rejection(e),
        UploadError::NoFileSelected => {
            StatusPayload::new(Severity::Warning, "No file selected", "Choose an image first", None)
        }
        UploadError::Busy => StatusPayload::new(
            Severity::Info,
            "Upload in progress",
            "Wait for the current upload to finish",
            None,
        ),
        UploadError::Cancelled => {
            StatusPayload::new(Severity::Info, "Upload cancelled", "Nothing was saved", None)
        }
        UploadError::InvalidState { .. } | UploadError::InvalidTransition { .. } => {
            StatusPayload::new(Severity::Warning, "Action not available", error.to_string(), None)
        }
    }
}
