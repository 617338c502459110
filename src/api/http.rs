//! reqwest-backed implementation of [`OrderApi`] and [`ConsoleApi`].
//! Session cookies live in a shared jar; mutating calls echo the `csrftoken`
//! cookie in `X-CSRFToken`.

use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::StreamExt;
use percent_encoding::percent_decode_str;
use regex::Regex;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::CONTENT_DISPOSITION;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{
    ApiResponse, AuthState, CheckData, ConsoleApi, Credentials, Envelope, ExportFile, ImageFile,
    OrderApi, OrderList, OrderQuery, Registration, SessionUser, CODE_OK,
};
use crate::config::{ClientConfig, Timeouts};
use crate::error::ApiError;
use crate::order::Order;

pub const DEFAULT_EXPORT_FILENAME: &str = "orders.xlsx";

const CSRF_COOKIE: &str = "csrftoken";
const CSRF_HEADER: &str = "X-CSRFToken";

pub struct HttpOrderApi {
    http: reqwest::Client,
    jar: Arc<Jar>,
    base: Url,
    base_url: String,
    timeouts: Timeouts,
}

impl HttpOrderApi {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let base = Url::parse(&base_url).map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        let jar = Arc::new(Jar::default());

        let http = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(config.timeouts.api_request)
            .build()
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;

        Ok(Self {
            http,
            jar,
            base,
            base_url,
            timeouts: config.timeouts,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `/api/orders/check/{code}/` with the code as one encoded path segment.
    fn check_url(&self, order_code: &str) -> Result<Url, ApiError> {
        let mut url = Url::parse(&self.endpoint("/api/orders/check/"))
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidRequest("base URL cannot carry a path".into()))?
            .pop_if_empty()
            .push(order_code)
            .push("");
        Ok(url)
    }

    fn csrf_token(&self) -> Option<String> {
        let header = self.jar.cookies(&self.base)?;
        let cookies = header.to_str().ok()?;
        cookie_value(cookies, CSRF_COOKIE)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let builder = self.http.post(self.endpoint(path));
        match self.csrf_token() {
            Some(token) => builder.header(CSRF_HEADER, token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
        mutating: bool,
    ) -> Result<ApiResponse<T>, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest(operation, e))?;
        let status = response.status();
        if mutating && status == StatusCode::FORBIDDEN {
            warn!(operation, "session_expired");
            return Err(ApiError::SessionExpired { operation });
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::from_reqwest(operation, e))?;
        let parsed = decode_envelope(operation, status.as_u16(), &body)?;
        debug!(operation, status = status.as_u16(), code = parsed.code(), "api_response");
        Ok(parsed)
    }
}

impl OrderApi for HttpOrderApi {
    async fn recognize(&self, image: &ImageFile) -> Result<ApiResponse<Value>, ApiError> {
        let part = Part::bytes(image.bytes.clone())
            .file_name(image.name.clone())
            .mime_str(&image.content_type)
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        let form = Form::new().part("image", part);
        let request = self
            .post("/api/orders/ocr-for-form/")
            .multipart(form)
            .timeout(self.timeouts.ocr_processing);
        self.send("recognize", request, true).await
    }

    async fn check_order(&self, order_code: &str) -> Result<ApiResponse<CheckData>, ApiError> {
        let url = self.check_url(order_code)?;
        let request = self.http.get(url).timeout(self.timeouts.duplicate_check);
        self.send("check_order", request, false).await
    }

    async fn create_order(&self, order: &Order) -> Result<ApiResponse<Value>, ApiError> {
        let request = self.post("/api/orders/add/").json(order);
        self.send("create_order", request, true).await
    }
}

impl ConsoleApi for HttpOrderApi {
    async fn login(&self, credentials: &Credentials) -> Result<ApiResponse<SessionUser>, ApiError> {
        let request = self.post("/api/login/").json(credentials);
        self.send("login", request, true).await
    }

    async fn register(&self, registration: &Registration) -> Result<ApiResponse<Value>, ApiError> {
        let request = self.post("/api/register/").json(registration);
        self.send("register", request, true).await
    }

    async fn logout(&self) -> Result<ApiResponse<Value>, ApiError> {
        self.send("logout", self.post("/api/logout/"), true).await
    }

    async fn check_auth(&self) -> Result<ApiResponse<AuthState>, ApiError> {
        let request = self.http.get(self.endpoint("/api/check-auth/"));
        self.send("check_auth", request, false).await
    }

    async fn list_orders(&self, query: &OrderQuery) -> Result<ApiResponse<OrderList>, ApiError> {
        let request = self
            .http
            .get(self.endpoint("/api/orders/"))
            .query(&query.list_params());
        self.send("list_orders", request, false).await
    }

    async fn update_order(&self, order: &Order) -> Result<ApiResponse<Value>, ApiError> {
        let request = self.post("/api/orders/update/").json(order);
        self.send("update_order", request, true).await
    }

    async fn batch_delete(&self, order_ids: &[i64]) -> Result<ApiResponse<Value>, ApiError> {
        let request = self
            .post("/api/orders/batch-delete/")
            .json(&json!({ "order_ids": order_ids }));
        self.send("batch_delete", request, true).await
    }

    async fn export(&self, query: &OrderQuery, dest_dir: &Path) -> Result<ExportFile, ApiError> {
        const OP: &str = "export";
        let response = self
            .http
            .get(self.endpoint("/api/orders/export/"))
            .query(&query.export_params())
            .timeout(self.timeouts.upload_file)
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest(OP, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Http {
                operation: OP,
                status: status.as_u16(),
            });
        }

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));
        if is_json {
            // The backend reports "nothing to export" as an envelope, not a file.
            let body = response
                .bytes()
                .await
                .map_err(|e| ApiError::from_reqwest(OP, e))?;
            let envelope: ApiResponse<Value> = decode_envelope(OP, status.as_u16(), &body)?;
            return Err(ApiError::Rejected {
                operation: OP,
                code: envelope.code(),
                message: envelope.message().unwrap_or("no file returned").to_string(),
            });
        }

        let filename = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(content_disposition_filename)
            .unwrap_or_else(|| DEFAULT_EXPORT_FILENAME.to_string());
        let path = dest_dir.join(&filename);

        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|source| ApiError::Io { operation: OP, source })?;
        let mut stream = response.bytes_stream();
        let mut bytes_written = 0u64;

        let copied: Result<(), ApiError> = async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| ApiError::from_reqwest(OP, e))?;
                file.write_all(&chunk)
                    .await
                    .map_err(|source| ApiError::Io { operation: OP, source })?;
                bytes_written += chunk.len() as u64;
            }
            file.flush()
                .await
                .map_err(|source| ApiError::Io { operation: OP, source })
        }
        .await;

        if let Err(e) = copied {
            drop(file);
            if let Err(rm) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %rm, "export_cleanup_failed");
            }
            return Err(e);
        }

        debug!(file = %filename, bytes = bytes_written, "export_written");
        Ok(ExportFile {
            filename,
            path,
            bytes_written,
        })
    }
}

/// Parse a response body as an envelope. A body that is not an envelope is
/// an HTTP error when the status already says so, a decode error otherwise.
/// `data` that does not fit `T` only matters on success.
pub fn decode_envelope<T: DeserializeOwned>(
    operation: &'static str,
    status: u16,
    body: &[u8],
) -> Result<ApiResponse<T>, ApiError> {
    let raw: Envelope<Value> = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(_) if !(200..300).contains(&status) => {
            return Err(ApiError::Http { operation, status });
        }
        Err(e) => {
            return Err(ApiError::Decode {
                operation,
                message: e.to_string(),
            });
        }
    };

    let data = match raw.data {
        None | Some(Value::Null) => None,
        Some(value) => match serde_json::from_value::<T>(value) {
            Ok(data) => Some(data),
            Err(e) if raw.code == CODE_OK => {
                return Err(ApiError::Decode {
                    operation,
                    message: e.to_string(),
                });
            }
            Err(_) => None,
        },
    };

    Ok(ApiResponse {
        status,
        envelope: Envelope {
            code: raw.code,
            msg: raw.msg,
            data,
        },
    })
}

/// File name from a `Content-Disposition` header, percent-decoded and
/// stripped of any directory part.
pub fn content_disposition_filename(header: &str) -> Option<String> {
    static FILENAME: OnceLock<Regex> = OnceLock::new();
    let re = FILENAME.get_or_init(|| {
        Regex::new(r#"(?i)filename\*?=(?:UTF-8'')?"?([^";]+)"?"#).expect("static regex")
    });
    let raw = re.captures(header)?.get(1)?.as_str().trim();
    let decoded = percent_decode_str(raw).decode_utf8_lossy();
    let name = decoded
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}

fn cookie_value(cookies: &str, name: &str) -> Option<String> {
    cookies
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}
