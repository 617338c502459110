//! Error taxonomy shared by the upload flow and the admin console.
//! Validation errors never leave the client; transport errors are converted
//! into outcomes at the orchestrator boundary.

use thiserror::Error;

use crate::state_machine::UploadState;

/// Failures talking to the order backend.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("{operation} failed: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },

    /// HTTP 403 on a mutating call: CSRF token or session cookie is stale.
    #[error("session expired during {operation}")]
    SessionExpired { operation: &'static str },

    #[error("{operation} returned HTTP {status}")]
    Http { operation: &'static str, status: u16 },

    #[error("{operation} returned a malformed body: {message}")]
    Decode {
        operation: &'static str,
        message: String,
    },

    /// The backend answered with a non-200 envelope where a file was expected.
    #[error("{operation} rejected with code {code}: {message}")]
    Rejected {
        operation: &'static str,
        code: i64,
        message: String,
    },

    #[error("{operation} could not write its output: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ApiError::Timeout { .. })
    }

    /// Map a reqwest failure, keeping timeouts distinct from other transport errors.
    pub(crate) fn from_reqwest(operation: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout { operation }
        } else {
            ApiError::Transport {
                operation,
                message: err.to_string(),
            }
        }
    }
}

/// A single field-level form problem (login/register forms).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: &'static str,
}

/// Client-side validation failures. No request is made when one is raised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("only image files are accepted (got {content_type})")]
    NotAnImage { content_type: String },

    #[error("unsupported image type {content_type}; use JPG, PNG or GIF")]
    UnsupportedImageType { content_type: String },

    #[error("image is {size} bytes, the limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("order code must not be empty")]
    MissingOrderCode,

    #[error("product name must not be empty")]
    MissingProductName,

    #[error("upload an order screenshot before submitting")]
    MissingImage,

    #[error("images can only be uploaded when creating an order")]
    UploadNotAllowed,

    #[error("no orders selected")]
    EmptySelection,

    #[error("invalid form: {}", describe_fields(.0))]
    Form(Vec<FieldError>),
}

fn describe_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors returned by the upload session controls (select/submit/cancel/next).
#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("no file selected")]
    NoFileSelected,

    #[error("an upload is already in progress")]
    Busy,

    /// The sequence was cancelled; its outcome has been discarded.
    #[error("upload cancelled")]
    Cancelled,

    #[error("not allowed while the upload is {state}")]
    InvalidState { state: UploadState },

    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: UploadState, to: UploadState },
}
