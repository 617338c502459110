//! Duplicate checker. Fails soft: anything short of a clear answer from the
//! backend is `Unavailable`, never `NotFound`.

use std::time::Duration;

use tracing::{debug, warn};

use crate::api::OrderApi;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateCheck {
    Exists { uploader: Option<String> },
    NotFound,
    Unavailable { reason: String },
}

impl DuplicateCheck {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, DuplicateCheck::Unavailable { .. })
    }
}

pub async fn check_exists<A: OrderApi>(api: &A, order_code: &str, limit: Duration) -> DuplicateCheck {
    let result = match tokio::time::timeout(limit, api.check_order(order_code)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(order_code, timeout_ms = limit.as_millis() as u64, "duplicate_check_unavailable");
            return DuplicateCheck::Unavailable {
                reason: "duplicate check timed out".into(),
            };
        }
    };

    let response = match result {
        Ok(response) => response,
        Err(e) => {
            warn!(order_code, error = %e, "duplicate_check_unavailable");
            return DuplicateCheck::Unavailable { reason: e.to_string() };
        }
    };

    if !response.is_success() {
        let reason = response
            .message()
            .map(str::to_owned)
            .unwrap_or_else(|| format!("check returned code {}", response.code()));
        warn!(order_code, code = response.code(), reason = %reason, "duplicate_check_unavailable");
        return DuplicateCheck::Unavailable { reason };
    }

    match response.envelope.data {
        Some(data) if data.exists => {
            let uploader = data
                .order
                .and_then(|o| o.upload_user)
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty());
            debug!(order_code, uploader = ?uploader, "duplicate_found");
            DuplicateCheck::Exists { uploader }
        }
        Some(_) => DuplicateCheck::NotFound,
        None => DuplicateCheck::Unavailable {
            reason: "check response carried no data".into(),
        },
    }
}
