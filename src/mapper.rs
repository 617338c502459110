//! Field mapper: raw OCR payload (English or Chinese keys, possibly nested,
//! possibly partial) -> canonical [`Order`]. Pure and deterministic.

use serde_json::{Map, Value};

use crate::order::{MissingPolicy, Order, OrderField};

pub const STATUS_PAID: &str = "paid";
pub const STATUS_SHIPPED: &str = "shipped";
pub const STATUS_PENDING: &str = "pending payment";

/// Uploader recorded when no session user is known.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Values the mapper must carry through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapContext {
    pub username: Option<String>,
    pub img_path: String,
    pub img_filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedOrder {
    pub order: Order,
    /// Canonical fields actually taken from the payload.
    pub filled: usize,
}

/// Marker stored for a display field the OCR did not recognize.
pub fn placeholder(field: OrderField) -> String {
    format!("[not recognized: {}]", field.key())
}

/// The record holding the extracted fields: `extracted_data`, then `data`,
/// then the payload itself.
pub fn source_of(raw: &Value) -> Option<&Map<String, Value>> {
    ["extracted_data", "data"]
        .iter()
        .find_map(|key| raw.get(*key).and_then(Value::as_object))
        .or_else(|| raw.as_object())
}

/// First non-empty trimmed value for `field`, English alias first.
pub fn lookup(source: &Map<String, Value>, field: OrderField) -> Option<String> {
    [field.key(), field.label()]
        .iter()
        .find_map(|alias| source.get(*alias).and_then(scalar_text))
}

fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Status rule used when OCR reports none.
pub fn derive_status(payment_method: &str, tracking_number: &str) -> &'static str {
    let lower = payment_method.to_lowercase();
    let paid = payment_method.contains("已付") || (lower.contains("paid") && !lower.contains("unpaid"));
    if paid {
        STATUS_PAID
    } else if !tracking_number.trim().is_empty() {
        STATUS_SHIPPED
    } else {
        STATUS_PENDING
    }
}

pub fn normalize(raw: &Value, ctx: &MapContext) -> MappedOrder {
    let mut order = Order::default();
    let mut filled = 0;

    if let Some(source) = source_of(raw) {
        for field in OrderField::ALL {
            if let Some(value) = lookup(source, field) {
                order.set(field, value);
                filled += 1;
            }
        }
    }

    // Status is derived from what OCR actually saw, before placeholders land.
    if order.order_status.is_empty() {
        order.order_status = derive_status(&order.payment_method, &order.tracking_number).to_string();
    }

    for field in OrderField::ALL {
        if field.missing_policy() == MissingPolicy::Placeholder && order.get(field).is_empty() {
            order.set(field, placeholder(field));
        }
    }

    order.upload_user = ctx
        .username
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .unwrap_or(ANONYMOUS_USER)
        .to_string();
    order.img_path = ctx.img_path.clone();
    order.img_filename = ctx.img_filename.clone();

    MappedOrder { order, filled }
}
