//! Canonical order record and its bilingual field catalogue.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ValidationError;

/// How a canonical field is filled when OCR does not supply it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingPolicy {
    /// Left empty; the caller must refuse to persist (order code).
    Required,
    /// Visible `[not recognized: <field>]` marker.
    Placeholder,
    /// Empty string (prices, amounts, timestamps).
    Empty,
    /// Derived from other fields (order status).
    Derived,
}

/// The sixteen order fields an OCR payload can populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderField {
    OrderCode,
    ProductName,
    Specification,
    ProductPrice,
    PaymentMethod,
    ActualAmount,
    LogisticsCompany,
    TrackingNumber,
    OrderStatus,
    Receiver,
    Contact,
    ShippingAddress,
    ShopName,
    OrderTime,
    GroupTime,
    ShipTime,
}

impl OrderField {
    pub const ALL: [OrderField; 16] = [
        OrderField::OrderCode,
        OrderField::ProductName,
        OrderField::Specification,
        OrderField::ProductPrice,
        OrderField::PaymentMethod,
        OrderField::ActualAmount,
        OrderField::LogisticsCompany,
        OrderField::TrackingNumber,
        OrderField::OrderStatus,
        OrderField::Receiver,
        OrderField::Contact,
        OrderField::ShippingAddress,
        OrderField::ShopName,
        OrderField::OrderTime,
        OrderField::GroupTime,
        OrderField::ShipTime,
    ];

    /// English key, also the wire name of the field.
    pub fn key(self) -> &'static str {
        match self {
            OrderField::OrderCode => "order_code",
            OrderField::ProductName => "product_name",
            OrderField::Specification => "specification",
            OrderField::ProductPrice => "product_price",
            OrderField::PaymentMethod => "payment_method",
            OrderField::ActualAmount => "actual_amount",
            OrderField::LogisticsCompany => "logistics_company",
            OrderField::TrackingNumber => "tracking_number",
            OrderField::OrderStatus => "order_status",
            OrderField::Receiver => "receiver",
            OrderField::Contact => "contact",
            OrderField::ShippingAddress => "shipping_address",
            OrderField::ShopName => "shop_name",
            OrderField::OrderTime => "order_time",
            OrderField::GroupTime => "group_time",
            OrderField::ShipTime => "ship_time",
        }
    }

    /// Chinese label the OCR service may use instead of the English key.
    pub fn label(self) -> &'static str {
        match self {
            OrderField::OrderCode => "订单编号",
            OrderField::ProductName => "商品名称",
            OrderField::Specification => "商品规格",
            OrderField::ProductPrice => "商品价格",
            OrderField::PaymentMethod => "支付方式",
            OrderField::ActualAmount => "实付金额",
            OrderField::LogisticsCompany => "物流公司",
            OrderField::TrackingNumber => "快递单号",
            OrderField::OrderStatus => "订单状态",
            OrderField::Receiver => "收件人",
            OrderField::Contact => "联系方式",
            OrderField::ShippingAddress => "收货地址",
            OrderField::ShopName => "店铺名称",
            OrderField::OrderTime => "下单时间",
            OrderField::GroupTime => "拼单时间",
            OrderField::ShipTime => "发货时间",
        }
    }

    pub fn missing_policy(self) -> MissingPolicy {
        match self {
            OrderField::OrderCode => MissingPolicy::Required,
            OrderField::OrderStatus => MissingPolicy::Derived,
            OrderField::ProductPrice
            | OrderField::ActualAmount
            | OrderField::OrderTime
            | OrderField::GroupTime
            | OrderField::ShipTime => MissingPolicy::Empty,
            _ => MissingPolicy::Placeholder,
        }
    }
}

/// An order as exchanged with the backend. `id` is `None` until persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub order_code: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub upload_user: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub product_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub specification: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub product_price: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub payment_method: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub actual_amount: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub logistics_company: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub tracking_number: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub order_status: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub receiver: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub contact: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub shipping_address: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub shop_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub order_time: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub group_time: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub ship_time: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub img_path: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub img_filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

impl Order {
    pub fn get(&self, field: OrderField) -> &str {
        match field {
            OrderField::OrderCode => &self.order_code,
            OrderField::ProductName => &self.product_name,
            OrderField::Specification => &self.specification,
            OrderField::ProductPrice => &self.product_price,
            OrderField::PaymentMethod => &self.payment_method,
            OrderField::ActualAmount => &self.actual_amount,
            OrderField::LogisticsCompany => &self.logistics_company,
            OrderField::TrackingNumber => &self.tracking_number,
            OrderField::OrderStatus => &self.order_status,
            OrderField::Receiver => &self.receiver,
            OrderField::Contact => &self.contact,
            OrderField::ShippingAddress => &self.shipping_address,
            OrderField::ShopName => &self.shop_name,
            OrderField::OrderTime => &self.order_time,
            OrderField::GroupTime => &self.group_time,
            OrderField::ShipTime => &self.ship_time,
        }
    }

    pub fn set(&mut self, field: OrderField, value: String) {
        let slot = match field {
            OrderField::OrderCode => &mut self.order_code,
            OrderField::ProductName => &mut self.product_name,
            OrderField::Specification => &mut self.specification,
            OrderField::ProductPrice => &mut self.product_price,
            OrderField::PaymentMethod => &mut self.payment_method,
            OrderField::ActualAmount => &mut self.actual_amount,
            OrderField::LogisticsCompany => &mut self.logistics_company,
            OrderField::TrackingNumber => &mut self.tracking_number,
            OrderField::OrderStatus => &mut self.order_status,
            OrderField::Receiver => &mut self.receiver,
            OrderField::Contact => &mut self.contact,
            OrderField::ShippingAddress => &mut self.shipping_address,
            OrderField::ShopName => &mut self.shop_name,
            OrderField::OrderTime => &mut self.order_time,
            OrderField::GroupTime => &mut self.group_time,
            OrderField::ShipTime => &mut self.ship_time,
        };
        *slot = value;
    }

    /// Persisting without an order code is refused before any request.
    pub fn validate_for_create(&self) -> Result<(), ValidationError> {
        if self.order_code.trim().is_empty() {
            return Err(ValidationError::MissingOrderCode);
        }
        Ok(())
    }
}

/// Accepts strings, numbers and null; the backend is not consistent about prices.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_field_has_distinct_aliases() {
        let mut seen = std::collections::HashSet::new();
        for field in OrderField::ALL {
            assert!(seen.insert(field.key()), "duplicate key {}", field.key());
            assert!(seen.insert(field.label()), "duplicate label {}", field.label());
        }
        assert_eq!(seen.len(), 32);
    }

    #[test]
    fn set_then_get_addresses_the_same_slot() {
        let mut order = Order::default();
        for (i, field) in OrderField::ALL.into_iter().enumerate() {
            order.set(field, format!("v{i}"));
        }
        for (i, field) in OrderField::ALL.into_iter().enumerate() {
            assert_eq!(order.get(field), format!("v{i}"));
        }
    }

    #[test]
    fn listing_rows_tolerate_nulls_and_numbers() {
        let order: Order = serde_json::from_value(serde_json::json!({
            "id": 7,
            "order_code": "GB1001",
            "product_price": 12.5,
            "receiver": null,
            "create_time": "2024-05-01 10:00:00"
        }))
        .unwrap();
        assert_eq!(order.id, Some(7));
        assert_eq!(order.product_price, "12.5");
        assert_eq!(order.receiver, "");
        assert_eq!(order.create_time.as_deref(), Some("2024-05-01 10:00:00"));
    }

    #[test]
    fn create_payload_sends_null_id_and_omits_timestamps() {
        let order = Order {
            order_code: "GB1001".into(),
            ..Order::default()
        };
        let json = serde_json::to_value(&order).unwrap();
        assert!(json["id"].is_null());
        assert!(json.get("create_time").is_none());
    }

    #[test]
    fn blank_order_code_cannot_be_persisted() {
        let order = Order {
            order_code: "   ".into(),
            ..Order::default()
        };
        assert_eq!(order.validate_for_create(), Err(ValidationError::MissingOrderCode));
    }
}
