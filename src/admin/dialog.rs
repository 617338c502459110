//! Admin order dialog: recognizes a screenshot into an editable form instead
//! of saving it directly.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use super::FormMode;
use crate::api::{ImageFile, OrderApi};
use crate::cancellation::TaskGeneration;
use crate::config::{ClientConfig, Timeouts};
use crate::error::{UploadError, ValidationError};
use crate::metrics::MetricsRegistry;
use crate::order::{Order, OrderField};
use crate::orchestrator::{recognize, Recognition, UploadOutcome};
use crate::presenter::{present, present_recognition, StatusPayload};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogMode {
    Create,
    View,
    Edit,
}

impl DialogMode {
    /// How the form is saved; `None` for a read-only view.
    pub fn form_mode(self) -> Option<FormMode> {
        match self {
            DialogMode::Create => Some(FormMode::Create),
            DialogMode::Edit => Some(FormMode::Edit),
            DialogMode::View => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum DialogResult {
    Filled(Recognition),
    Failed(UploadOutcome),
}

impl DialogResult {
    pub fn status(&self) -> StatusPayload {
        match self {
            DialogResult::Filled(recognition) => present_recognition(recognition),
            DialogResult::Failed(outcome) => present(outcome),
        }
    }
}

pub struct OrderDialog<A> {
    api: Arc<A>,
    timeouts: Timeouts,
    max_upload_bytes: u64,
    metrics: Arc<MetricsRegistry>,
    mode: RwLock<Option<DialogMode>>,
    form: RwLock<Order>,
    user: RwLock<Option<String>>,
    in_flight: Mutex<Option<u64>>,
    tasks: TaskGeneration,
}

impl<A: OrderApi> OrderDialog<A> {
    pub fn new(api: Arc<A>, config: &ClientConfig) -> Self {
        Self {
            api,
            timeouts: config.timeouts,
            max_upload_bytes: config.max_upload_bytes,
            metrics: Arc::new(MetricsRegistry::new()),
            mode: RwLock::new(None),
            form: RwLock::new(Order::default()),
            user: RwLock::new(None),
            in_flight: Mutex::new(None),
            tasks: TaskGeneration::new(),
        }
    }

    pub fn set_user(&self, username: Option<String>) {
        *self.user.write() = username;
    }

    /// Open for a new order, or for viewing / editing `existing`.
    pub fn open(&self, mode: DialogMode, existing: Option<Order>) {
        self.tasks.invalidate();
        *self.in_flight.lock() = None;
        *self.form.write() = match mode {
            DialogMode::Create => Order::default(),
            DialogMode::View | DialogMode::Edit => existing.unwrap_or_default(),
        };
        *self.mode.write() = Some(mode);
    }

    /// Close the dialog, abandoning any recognition in flight.
    pub fn close(&self) {
        self.tasks.invalidate();
        *self.in_flight.lock() = None;
        *self.mode.write() = None;
        *self.form.write() = Order::default();
    }

    pub fn mode(&self) -> Option<DialogMode> {
        *self.mode.read()
    }

    pub fn form(&self) -> Order {
        self.form.read().clone()
    }

    /// Manual edit of one field; ignored in view mode.
    pub fn set_field(&self, field: OrderField, value: impl Into<String>) {
        if matches!(self.mode(), Some(DialogMode::Create | DialogMode::Edit)) {
            self.form.write().set(field, value.into());
        }
    }

    /// Recognize `image` and fill the form with the result. Only allowed
    /// while creating a new order.
    pub async fn recognize(&self, image: ImageFile) -> Result<DialogResult, UploadError> {
        if self.mode() != Some(DialogMode::Create) {
            return Err(ValidationError::UploadNotAllowed.into());
        }
        image.validate_for_form(self.max_upload_bytes)?;

        let guard = {
            let mut in_flight = self.in_flight.lock();
            if in_flight.is_some() {
                return Err(UploadError::Busy);
            }
            let guard = self.tasks.cancel_and_advance();
            *in_flight = Some(guard.my_generation());
            guard
        };

        let username = self.user.read().clone();
        let no_progress = |_: u8| {};
        let run = recognize(self.api.as_ref(), &image, username, &self.timeouts, &self.metrics, &no_progress);
        let result = guard.run(run).await;

        let mut in_flight = self.in_flight.lock();
        if *in_flight != Some(guard.my_generation()) || !guard.should_continue() {
            return Err(UploadError::Cancelled);
        }
        *in_flight = None;

        match result {
            None => Err(UploadError::Cancelled),
            Some(Ok(recognition)) => {
                *self.form.write() = recognition.order.clone();
                info!(order_code = %recognition.order_code(), filled = recognition.filled, "form_filled");
                Ok(DialogResult::Filled(recognition))
            }
            Some(Err(outcome)) => {
                warn!(outcome = outcome.kind(), file = %image.name, "form_recognition_failed");
                Ok(DialogResult::Failed(outcome))
            }
        }
    }
}
