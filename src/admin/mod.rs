//! Admin console: authentication, order listing, manual order forms,
//! batch delete and spreadsheet export.

pub mod dialog;
pub mod forms;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::api::{ConsoleApi, ExportFile, OrderList, OrderQuery, Pagination, SessionUser, CODE_CONFLICT};
use crate::config::{ClientConfig, Timeouts};
use crate::duplicate::{check_exists, DuplicateCheck};
use crate::error::{ApiError, FieldError, ValidationError};
use crate::order::Order;
use crate::prefs::{LocalPrefs, PrefsError};

pub use forms::{LoginForm, RegisterForm};

/// Pause before the surface re-authenticates after a session expiry.
pub const SESSION_RELOAD_DELAY: Duration = Duration::from_millis(1500);

/// Exports larger than this need the caller's explicit confirmation.
pub const EXPORT_CONFIRM_THRESHOLD: u64 = 1000;

pub const DEFAULT_PAGE_SIZE: u32 = 10;

const FIELD_FORMAT_ERROR: &str = "Field format error, contact an administrator";

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("session expired, sign in again")]
    SessionExpired,

    #[error("order code \"{order_code}\" already exists")]
    Duplicate {
        order_code: String,
        uploader: Option<String>,
    },

    #[error("{message}")]
    Rejected { code: i64, message: String },

    #[error("exporting {rows} orders needs confirmation")]
    ExportNeedsConfirmation { rows: u64 },

    #[error("no orders to export")]
    NothingToExport,

    #[error(transparent)]
    Api(ApiError),

    #[error(transparent)]
    Prefs(#[from] PrefsError),
}

impl From<ApiError> for ConsoleError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::SessionExpired { .. } => ConsoleError::SessionExpired,
            other => ConsoleError::Api(other),
        }
    }
}

impl ConsoleError {
    /// The surface should wait [`SESSION_RELOAD_DELAY`] and sign in again.
    pub fn needs_reauth(&self) -> bool {
        matches!(self, ConsoleError::SessionExpired)
    }

    fn rejected(code: i64, message: Option<&str>, default: &str) -> Self {
        ConsoleError::Rejected {
            code,
            message: message.unwrap_or(default).to_string(),
        }
    }
}

/// Where a user lands after signing in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Landing {
    Console,
    UploadPage,
}

impl Landing {
    pub fn for_user(user: &SessionUser) -> Self {
        if user.is_superuser {
            Landing::Console
        } else {
            Landing::UploadPage
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMode {
    Create,
    Edit,
}

/// When an export is large, the caller must confirm before it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportGuard {
    Unconfirmed,
    Confirmed,
}

/// What a successful form save reports back to the dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    pub order_code: String,
    /// The create pre-check could not run; only the server's 409 guarded the save.
    pub check_unavailable: bool,
}

#[derive(Debug, Clone, Default)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub pagination: Pagination,
}

/// Slice `items` into 1-based page `page` of `page_size`.
pub fn paginate<T: Clone>(items: &[T], page: u32, page_size: u32) -> (Vec<T>, Pagination) {
    let page_size = if page_size == 0 { DEFAULT_PAGE_SIZE } else { page_size };
    let total = items.len() as u64;
    let total_pages = total.div_ceil(page_size as u64).max(1) as u32;
    let page = page.clamp(1, total_pages);
    let start = ((page - 1) as usize) * page_size as usize;
    let slice = items
        .iter()
        .skip(start)
        .take(page_size as usize)
        .cloned()
        .collect();
    let pagination = Pagination {
        page,
        page_size,
        total_pages,
        total_count: total,
        has_previous: page > 1,
        has_next: page < total_pages,
    };
    (slice, pagination)
}

fn save_message(message: Option<&str>) -> String {
    match message {
        Some(m) if m.contains("unexpected keyword argument") => FIELD_FORMAT_ERROR.to_string(),
        Some(m) => m.to_string(),
        None => "Save failed".to_string(),
    }
}

fn existing_uploader(data: Option<&Value>) -> Option<String> {
    data.and_then(|d| d.get("existing_uploader"))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

pub struct AdminConsole<A> {
    api: Arc<A>,
    base_url: String,
    timeouts: Timeouts,
    prefs: Option<Arc<LocalPrefs>>,
    user: RwLock<Option<SessionUser>>,
}

impl<A: ConsoleApi> AdminConsole<A> {
    pub fn new(api: Arc<A>, config: &ClientConfig) -> Self {
        Self {
            api,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeouts: config.timeouts,
            prefs: None,
            user: RwLock::new(None),
        }
    }

    pub fn with_prefs(mut self, prefs: Arc<LocalPrefs>) -> Self {
        self.prefs = Some(prefs);
        self
    }

    pub fn current_user(&self) -> Option<SessionUser> {
        self.user.read().clone()
    }

    /// Username to pre-fill in the login form.
    pub fn remembered_user(&self) -> Result<Option<String>, ConsoleError> {
        match &self.prefs {
            Some(prefs) => Ok(prefs.remembered_user()?),
            None => Ok(None),
        }
    }

    /// True the first time only; the mobile layout tip is shown once.
    pub fn take_mobile_tip(&self) -> Result<bool, ConsoleError> {
        match &self.prefs {
            Some(prefs) => Ok(prefs.mark_mobile_tip_shown()?),
            None => Ok(false),
        }
    }

    pub async fn login(&self, form: &LoginForm) -> Result<(SessionUser, Landing), ConsoleError> {
        let credentials = form.validate()?;
        let response = self.api.login(&credentials).await?;
        if !response.is_success() {
            warn!(username = %credentials.username, code = response.code(), "login_rejected");
            return Err(ConsoleError::rejected(
                response.code(),
                response.message(),
                "Invalid username or password",
            ));
        }
        let user = response.envelope.data.ok_or(ApiError::Decode {
            operation: "login",
            message: "missing user".into(),
        })?;

        if let Some(prefs) = &self.prefs {
            let remembered = credentials.remember.then_some(credentials.username.as_str());
            prefs.remember_user(remembered)?;
        }
        *self.user.write() = Some(user.clone());
        info!(username = %user.username, superuser = user.is_superuser, "login");
        let landing = Landing::for_user(&user);
        Ok((user, landing))
    }

    pub async fn register(&self, form: &RegisterForm) -> Result<(), ConsoleError> {
        let registration = form.validate()?;
        let response = self.api.register(&registration).await?;
        if !response.is_success() {
            return Err(ConsoleError::rejected(
                response.code(),
                response.message(),
                "Registration failed",
            ));
        }
        info!(username = %registration.username, "registered");
        Ok(())
    }

    /// Local state is cleared even when the request fails.
    pub async fn logout(&self) -> Result<(), ConsoleError> {
        let result = self.api.logout().await;
        *self.user.write() = None;
        if let Some(prefs) = &self.prefs {
            prefs.remember_user(None)?;
        }
        match result {
            Ok(_) => Ok(()),
            Err(ApiError::SessionExpired { .. }) => Ok(()),
            Err(e) => {
                warn!(error = %e, "logout_failed");
                Err(e.into())
            }
        }
    }

    pub async fn check_auth(&self) -> Result<Option<SessionUser>, ConsoleError> {
        let response = match self.api.check_auth().await {
            Ok(response) => response,
            Err(ApiError::Http { status: 401, .. }) => {
                *self.user.write() = None;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let user = response
            .is_success()
            .then_some(response.envelope.data)
            .flatten()
            .filter(|auth| auth.authenticated)
            .and_then(|auth| auth.user);
        *self.user.write() = user.clone();
        Ok(user)
    }

    async fn fetch_orders(&self, query: &OrderQuery) -> Result<OrderList, ConsoleError> {
        let response = self.api.list_orders(query).await?;
        if !response.is_success() {
            return Err(ConsoleError::rejected(
                response.code(),
                response.message(),
                "Could not load orders",
            ));
        }
        Ok(response.envelope.data.unwrap_or_default())
    }

    /// Fetch one page of matching orders. The server's pagination wins; a
    /// server that returns everything is paged client-side.
    pub async fn list_orders(&self, query: &OrderQuery) -> Result<OrderPage, ConsoleError> {
        let list = self.fetch_orders(query).await?;
        if let Some(pagination) = list.pagination {
            return Ok(OrderPage {
                orders: list.orders,
                pagination,
            });
        }
        let (orders, pagination) = paginate(&list.orders, query.page, query.page_size);
        Ok(OrderPage { orders, pagination })
    }

    pub async fn batch_delete(&self, order_ids: &[i64]) -> Result<usize, ConsoleError> {
        if order_ids.is_empty() {
            return Err(ValidationError::EmptySelection.into());
        }
        let response = self.api.batch_delete(order_ids).await?;
        if !response.is_success() {
            return Err(ConsoleError::rejected(
                response.code(),
                response.message(),
                "Delete failed",
            ));
        }
        info!(count = order_ids.len(), "orders_deleted");
        Ok(order_ids.len())
    }

    /// Save a manually edited order. Create mode needs a recognized screenshot.
    pub async fn submit_order_form(&self, form: &Order, mode: FormMode) -> Result<SaveReport, ConsoleError> {
        let mut order = form.clone();
        order.order_code = order.order_code.trim().to_string();
        if order.order_code.is_empty() {
            return Err(ValidationError::MissingOrderCode.into());
        }
        if order.product_name.trim().is_empty() {
            return Err(ValidationError::MissingProductName.into());
        }
        if order.upload_user.trim().is_empty() {
            if let Some(user) = self.user.read().as_ref() {
                order.upload_user = user.username.clone();
            }
        }

        let mut check_unavailable = false;
        let response = match mode {
            FormMode::Create => {
                if order.img_path.trim().is_empty() {
                    return Err(ValidationError::MissingImage.into());
                }
                order.id = None;
                let check =
                    check_exists(self.api.as_ref(), &order.order_code, self.timeouts.duplicate_check).await;
                match check {
                    DuplicateCheck::Exists { uploader } => {
                        return Err(ConsoleError::Duplicate {
                            order_code: order.order_code,
                            uploader,
                        });
                    }
                    DuplicateCheck::Unavailable { reason } => {
                        warn!(order_code = %order.order_code, reason = %reason, "duplicate_check_unavailable_proceeding");
                        check_unavailable = true;
                    }
                    DuplicateCheck::NotFound => {}
                }
                self.api.create_order(&order).await?
            }
            FormMode::Edit => {
                if order.id.is_none() {
                    return Err(ValidationError::Form(vec![FieldError {
                        field: "id",
                        message: "an existing order is required",
                    }])
                    .into());
                }
                self.api.update_order(&order).await?
            }
        };

        if response.is_success() {
            info!(order_code = %order.order_code, mode = ?mode, check_unavailable, "order_saved");
            return Ok(SaveReport {
                order_code: order.order_code,
                check_unavailable,
            });
        }
        if mode == FormMode::Create && response.code() == CODE_CONFLICT {
            return Err(ConsoleError::Duplicate {
                uploader: existing_uploader(response.envelope.data.as_ref()),
                order_code: order.order_code,
            });
        }
        let message = save_message(response.message());
        warn!(order_code = %order.order_code, code = response.code(), message = %message, "order_save_failed");
        Err(ConsoleError::Rejected {
            code: response.code(),
            message,
        })
    }

    /// Write the spreadsheet for `query` into `dest_dir`.
    pub async fn export(
        &self,
        query: &OrderQuery,
        dest_dir: &Path,
        guard: ExportGuard,
    ) -> Result<ExportFile, ConsoleError> {
        let list = self.fetch_orders(query).await?;
        let server_total = list.pagination.as_ref().map_or(0, |p| p.total_count);
        let rows = server_total.max(list.orders.len() as u64);
        if rows == 0 {
            return Err(ConsoleError::NothingToExport);
        }
        if rows > EXPORT_CONFIRM_THRESHOLD && guard == ExportGuard::Unconfirmed {
            return Err(ConsoleError::ExportNeedsConfirmation { rows });
        }
        let file = self.api.export(query, dest_dir).await?;
        info!(file = %file.filename, rows, bytes = file.bytes_written, "export_done");
        Ok(file)
    }

    /// Absolute URL for an order's stored image.
    pub fn resolve_image_url(&self, img_path: &str) -> Option<String> {
        resolve_image_url(&self.base_url, img_path)
    }
}

pub fn resolve_image_url(base_url: &str, img_path: &str) -> Option<String> {
    let path = img_path.trim();
    if path.is_empty() {
        return None;
    }
    if path.starts_with("http://") || path.starts_with("https://") {
        return Some(path.to_string());
    }
    let base = base_url.trim_end_matches('/');
    if path.starts_with('/') {
        Some(format!("{base}{path}"))
    } else {
        Some(format!("{base}/{path}"))
    }
}
