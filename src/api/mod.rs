//! Backend contract: response envelope, payload types and the collaborator
//! traits the upload flow and the admin console are written against.

pub mod http;

use std::future::Future;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ApiError, ValidationError};
use crate::order::Order;

pub const CODE_OK: i64 = 200;
pub const CODE_BAD_REQUEST: i64 = 400;
pub const CODE_FORBIDDEN: i64 = 403;
pub const CODE_CONFLICT: i64 = 409;

/// `{code, msg?, data?}`; `code == 200` is the application-level success signal.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub code: i64,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: Option<T>,
}

/// Transport status and envelope, kept apart so both can be checked.
#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    pub status: u16,
    pub envelope: Envelope<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: 200,
            envelope: Envelope {
                code: CODE_OK,
                msg: None,
                data: Some(data),
            },
        }
    }

    /// Envelope-only failure carried in an HTTP 200, the backend's usual style.
    pub fn failure(code: i64, msg: Option<&str>, data: Option<T>) -> Self {
        Self {
            status: 200,
            envelope: Envelope {
                code,
                msg: msg.map(str::to_owned),
                data,
            },
        }
    }

    pub fn code(&self) -> i64 {
        self.envelope.code
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status) && self.envelope.code == CODE_OK
    }

    /// Server message, only when present and non-empty.
    pub fn message(&self) -> Option<&str> {
        self.envelope
            .msg
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }
}

/// An image picked for recognition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

const FORM_IMAGE_TYPES: [&str; 4] = ["image/jpeg", "image/jpg", "image/png", "image/gif"];

impl ImageFile {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    /// Read a file from disk, inferring the content type from its extension.
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        Ok(Self::new(name, content_type_for(path), bytes))
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Standalone upload guard: any `image/*`, at most `max_bytes`.
    pub fn validate(&self, max_bytes: u64) -> Result<(), ValidationError> {
        if !self.content_type.starts_with("image/") {
            return Err(ValidationError::NotAnImage {
                content_type: self.content_type.clone(),
            });
        }
        if self.size() > max_bytes {
            return Err(ValidationError::TooLarge {
                size: self.size(),
                limit: max_bytes,
            });
        }
        Ok(())
    }

    /// Admin form guard: JPG/PNG/GIF only.
    pub fn validate_for_form(&self, max_bytes: u64) -> Result<(), ValidationError> {
        self.validate(max_bytes)?;
        if !FORM_IMAGE_TYPES.contains(&self.content_type.as_str()) {
            return Err(ValidationError::UnsupportedImageType {
                content_type: self.content_type.clone(),
            });
        }
        Ok(())
    }
}

fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExistingOrder {
    #[serde(default)]
    pub order_code: Option<String>,
    #[serde(default)]
    pub upload_user: Option<String>,
}

/// `GET /api/orders/check/{code}/` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckData {
    pub exists: bool,
    #[serde(default)]
    pub order: Option<ExistingOrder>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub username: String,
    #[serde(default)]
    pub is_superuser: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthState {
    pub authenticated: bool,
    #[serde(default)]
    pub user: Option<SessionUser>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub remember: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: u32,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub has_previous: bool,
    #[serde(default)]
    pub has_next: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderList {
    #[serde(default)]
    pub orders: Vec<Order>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

/// Listing / export filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderQuery {
    pub page: u32,
    pub page_size: u32,
    pub keyword: String,
    /// Inclusive; only sent when both ends are set.
    pub date_range: Option<(NaiveDate, NaiveDate)>,
}

impl Default for OrderQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 10,
            keyword: String::new(),
            date_range: None,
        }
    }
}

impl OrderQuery {
    fn filter_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        let keyword = self.keyword.trim();
        if !keyword.is_empty() {
            params.push(("keyword", keyword.to_string()));
        }
        if let Some((start, end)) = self.date_range {
            params.push(("start_date", start.format("%Y-%m-%d").to_string()));
            params.push(("end_date", end.format("%Y-%m-%d").to_string()));
        }
        params
    }

    pub fn list_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("page", self.page.max(1).to_string()),
            ("page_size", self.page_size.max(1).to_string()),
        ];
        params.extend(self.filter_params());
        params
    }

    pub fn export_params(&self) -> Vec<(&'static str, String)> {
        self.filter_params()
    }
}

/// A spreadsheet written to disk by an export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFile {
    pub filename: String,
    pub path: PathBuf,
    pub bytes_written: u64,
}

/// Collaborators used by the upload flow. These are the only suspension
/// points of an upload sequence.
pub trait OrderApi: Send + Sync {
    /// `POST /api/orders/ocr-for-form/` with the image as multipart field `image`.
    fn recognize(
        &self,
        image: &ImageFile,
    ) -> impl Future<Output = Result<ApiResponse<Value>, ApiError>> + Send;

    /// `GET /api/orders/check/{order_code}/`.
    fn check_order(
        &self,
        order_code: &str,
    ) -> impl Future<Output = Result<ApiResponse<CheckData>, ApiError>> + Send;

    /// `POST /api/orders/add/`.
    fn create_order(
        &self,
        order: &Order,
    ) -> impl Future<Output = Result<ApiResponse<Value>, ApiError>> + Send;
}

/// Remaining endpoints used by the admin console.
pub trait ConsoleApi: OrderApi {
    fn login(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<ApiResponse<SessionUser>, ApiError>> + Send;

    fn register(
        &self,
        registration: &Registration,
    ) -> impl Future<Output = Result<ApiResponse<Value>, ApiError>> + Send;

    fn logout(&self) -> impl Future<Output = Result<ApiResponse<Value>, ApiError>> + Send;

    fn check_auth(&self) -> impl Future<Output = Result<ApiResponse<AuthState>, ApiError>> + Send;

    fn list_orders(
        &self,
        query: &OrderQuery,
    ) -> impl Future<Output = Result<ApiResponse<OrderList>, ApiError>> + Send;

    fn update_order(
        &self,
        order: &Order,
    ) -> impl Future<Output = Result<ApiResponse<Value>, ApiError>> + Send;

    fn batch_delete(
        &self,
        order_ids: &[i64],
    ) -> impl Future<Output = Result<ApiResponse<Value>, ApiError>> + Send;

    /// Stream the spreadsheet for `query` into `dest_dir`.
    fn export(
        &self,
        query: &OrderQuery,
        dest_dir: &Path,
    ) -> impl Future<Output = Result<ExportFile, ApiError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(content_type: &str, size: usize) -> ImageFile {
        ImageFile::new("shot", content_type, vec![0u8; size])
    }

    #[test]
    fn image_guard_checks_type_then_size() {
        let limit = 5 * 1024 * 1024;
        assert!(image("image/jpeg", 2 * 1024 * 1024).validate(limit).is_ok());
        assert!(image("image/png", limit as usize).validate(limit).is_ok());
        assert_eq!(
            image("application/pdf", 10).validate(limit),
            Err(ValidationError::NotAnImage {
                content_type: "application/pdf".into()
            })
        );
        assert!(matches!(
            image("image/jpeg", 6 * 1024 * 1024).validate(limit),
            Err(ValidationError::TooLarge { .. })
        ));
    }

    #[test]
    fn form_guard_only_takes_common_formats() {
        let limit = 5 * 1024 * 1024;
        assert!(image("image/gif", 10).validate_for_form(limit).is_ok());
        assert!(matches!(
            image("image/webp", 10).validate_for_form(limit),
            Err(ValidationError::UnsupportedImageType { .. })
        ));
    }

    #[test]
    fn success_needs_transport_and_envelope_agreement() {
        let ok: ApiResponse<Value> = ApiResponse::ok(Value::Null);
        assert!(ok.is_success());

        let conflict: ApiResponse<Value> = ApiResponse::failure(CODE_CONFLICT, Some("exists"), None);
        assert!(!conflict.is_success());

        let mut wrong_status = ApiResponse::ok(Value::Null);
        wrong_status.status = 500;
        assert!(!wrong_status.is_success());
    }

    #[test]
    fn blank_server_messages_are_ignored() {
        let resp: ApiResponse<Value> = ApiResponse::failure(500, Some("   "), None);
        assert_eq!(resp.message(), None);
    }

    #[test]
    fn query_params_skip_empty_filters() {
        let query = OrderQuery {
            page: 2,
            page_size: 20,
            keyword: "  GB  ".into(),
            date_range: NaiveDate::from_ymd_opt(2024, 5, 1).zip(NaiveDate::from_ymd_opt(2024, 5, 31)),
        };
        assert_eq!(
            query.list_params(),
            vec![
                ("page", "2".to_string()),
                ("page_size", "20".to_string()),
                ("keyword", "GB".to_string()),
                ("start_date", "2024-05-01".to_string()),
                ("end_date", "2024-05-31".to_string()),
            ]
        );
        assert!(OrderQuery::default().export_params().is_empty());
    }
}
