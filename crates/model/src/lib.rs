use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Expected total length of an order id, prefix included.
pub const ORDER_ID_LEN: usize = 12;

/// Fixed prefix every order id carries.
pub const ORDER_ID_PREFIX: &str = "ORD-";

/// Batch label clients use for the "no batch assigned yet" bucket.
/// Orders in that bucket are stored with `batch = NULL`; the literal is a
/// wire-level alias, never a stored value.
pub const UNBATCHED_LABEL: &str = "New Batch";

/// Validation errors for the small domain newtypes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("order id must be exactly {ORDER_ID_LEN} characters")]
    OrderIdLength,
    #[error("order id must start with {ORDER_ID_PREFIX:?}")]
    OrderIdPrefix,
    #[error("order id suffix must be ASCII letters or digits")]
    OrderIdCharset,
    #[error("status must not be empty")]
    EmptyStatus,
    #[error("batch label must not be empty")]
    EmptyBatchLabel,
}

/// Validated order identifier: `ORD-` followed by 8 alphanumerics.
///
/// Every entry point that receives an order id as a parameter parses it
/// into this type before touching the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        if raw.len() != ORDER_ID_LEN {
            return Err(ParseError::OrderIdLength);
        }
        let Some(suffix) = raw.strip_prefix(ORDER_ID_PREFIX) else {
            return Err(ParseError::OrderIdPrefix);
        };
        if !suffix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ParseError::OrderIdCharset);
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Order status label. The set of statuses is open: any non-blank string
/// is accepted, the dashboard conventions (pending/processing/shipped/...)
/// are not enforced here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StatusTag(String);

impl StatusTag {
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ParseError::EmptyStatus);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StatusTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A batch reference as supplied by clients.
///
/// `NULL` in the store and the [`UNBATCHED_LABEL`] literal on the wire
/// denote the same logical bucket, so both parse to [`BatchRef::Unbatched`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchRef {
    Unbatched,
    Named(String),
}

impl BatchRef {
    pub fn parse(label: &str) -> Result<Self, ParseError> {
        let trimmed = label.trim();
        if trimmed.is_empty() {
            return Err(ParseError::EmptyBatchLabel);
        }
        if trimmed == UNBATCHED_LABEL {
            return Ok(Self::Unbatched);
        }
        Ok(Self::Named(trimmed.to_string()))
    }
}

/// Order header row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub order_id: String,
    pub status: String,
    pub batch: Option<String>,
    pub date_created: DateTime<Utc>,
    pub estimated_time: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// One fulfillment line belonging to an order. Customer fields repeat
/// identically across every line of the same order; the line-level status
/// is written once at creation and never updated through this API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackingLine {
    pub order_id: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_contact: String,
    pub product_name: String,
    pub product_size: String,
    pub product_quantity: i32,
    pub total_amount: f64,
    pub status: String,
}

/// Minimal tracking projection returned by the per-order lines lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackingItem {
    pub name: String,
    pub size: String,
    pub quantity: i32,
}

/// One item inside a grouped order view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItem {
    pub product_name: String,
    pub product_size: String,
    pub product_quantity: i32,
    pub total_amount: f64,
    pub status: String,
}

/// Order header with its items nested, as served to the dashboard.
/// Customer fields are taken from the first tracking line and absent for
/// an order that has no lines at all.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderDetails {
    pub order_id: String,
    pub status: String,
    pub batch: Option<String>,
    pub date_created: DateTime<Utc>,
    pub estimated_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_contact: Option<String>,
    pub items: Vec<OrderItem>,
}

/// Flat row produced by the orders/tracking LEFT JOIN, before grouping.
/// Tracking columns are NULL for an order with no lines.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderDetailRow {
    pub order_id: String,
    pub status: String,
    pub batch: Option<String>,
    pub date_created: DateTime<Utc>,
    pub estimated_time: Option<DateTime<Utc>>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_contact: Option<String>,
    pub product_name: Option<String>,
    pub product_size: Option<String>,
    pub product_quantity: Option<i32>,
    pub total_amount: Option<f64>,
    pub line_status: Option<String>,
}

/// Summary row for the batch management table: one representative tracking
/// line (MAX aggregate) stands in for the whole order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManageRow {
    pub order_id: String,
    pub status: String,
    pub batch: Option<String>,
    pub date_created: DateTime<Utc>,
    pub estimated_time: Option<DateTime<Utc>>,
    pub customer_name: String,
    pub customer_contact: String,
    pub customer_email: String,
    pub product_name: String,
}

/// Catalog product as served to clients. The blob-store file id is kept
/// out of this shape; only the repository deals with it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: i32,
    pub name: String,
    pub price: f64,
    pub category: String,
    pub image: String,
    pub size: String,
    pub description: Option<String>,
    #[serde(rename = "disabledSizes")]
    pub disabled_sizes: Option<String>,
}

/// Reduced product row for storefront listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductSummary {
    pub id: i32,
    pub name: String,
    pub price: f64,
    pub image: String,
}

/// Insert shape for a new catalog product. `image` and `file_id` come back
/// from the blob-store upload, never from the client.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProduct {
    pub name: String,
    pub price: f64,
    pub category: String,
    pub image: String,
    pub file_id: String,
    pub size: String,
    pub description: Option<String>,
    pub disabled_sizes: Option<String>,
}

/// Partial update for a catalog product; `None` leaves the column as-is.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub price: Option<f64>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub size: Option<String>,
    #[serde(rename = "disabledSizes")]
    pub disabled_sizes: Option<String>,
}

/// Admin credential row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admin {
    pub id: i32,
    pub email: String,
    pub password_hash: String,
}

/// Invoice payload as posted by the dashboard. Transient: rendered to a
/// document and discarded, never persisted or reloaded from the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvoiceRequest {
    pub id: String,
    pub name: String,
    pub email: String,
    pub number: String,
    #[serde(rename = "Delivery Company")]
    pub delivery_company: String,
    #[serde(rename = "State")]
    pub state: String,
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "Pickup Address", default, skip_serializing_if = "Option::is_none")]
    pub pickup_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    pub items: Vec<InvoiceLine>,
    pub subtotal: f64,
    pub tax: f64,
    pub total: f64,
}

/// One invoice table row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvoiceLine {
    pub name: String,
    pub size: String,
    pub unit_price: f64,
    pub total: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_order_id() {
        let id = OrderId::parse("ORD-aaaa1111").unwrap();
        assert_eq!(id.as_str(), "ORD-aaaa1111");
        assert_eq!(id.to_string(), "ORD-aaaa1111");
    }

    #[test]
    fn test_reject_wrong_length() {
        assert_eq!(OrderId::parse("ORD-abc").unwrap_err(), ParseError::OrderIdLength);
        assert_eq!(
            OrderId::parse("ORD-aaaa11112").unwrap_err(),
            ParseError::OrderIdLength
        );
    }

    #[test]
    fn test_reject_wrong_prefix() {
        assert_eq!(
            OrderId::parse("XRD-aaaa1111").unwrap_err(),
            ParseError::OrderIdPrefix
        );
        // Lowercase prefix does not count either.
        assert_eq!(
            OrderId::parse("ord-aaaa1111").unwrap_err(),
            ParseError::OrderIdPrefix
        );
    }

    #[test]
    fn test_reject_bad_suffix_charset() {
        assert_eq!(
            OrderId::parse("ORD-aaaa 111").unwrap_err(),
            ParseError::OrderIdCharset
        );
        assert_eq!(
            OrderId::parse("ORD-aaaa_111").unwrap_err(),
            ParseError::OrderIdCharset
        );
    }

    #[test]
    fn test_status_tag_trims_and_rejects_blank() {
        assert_eq!(StatusTag::parse(" shipped ").unwrap().as_str(), "shipped");
        assert_eq!(StatusTag::parse("   ").unwrap_err(), ParseError::EmptyStatus);
        assert_eq!(StatusTag::parse("").unwrap_err(), ParseError::EmptyStatus);
    }

    #[test]
    fn test_batch_ref_sentinel_maps_to_unbatched() {
        assert_eq!(BatchRef::parse("New Batch").unwrap(), BatchRef::Unbatched);
        assert_eq!(
            BatchRef::parse("week-49").unwrap(),
            BatchRef::Named("week-49".to_string())
        );
        assert_eq!(BatchRef::parse("").unwrap_err(), ParseError::EmptyBatchLabel);
    }

    #[test]
    fn test_deserialize_invoice_request_wire_names() {
        let json = r#"
        {
            "id": "ORD-aaaa1111",
            "name": "Ada Obi",
            "email": "ada@example.com",
            "number": "+2348000000000",
            "Delivery Company": "GIG",
            "State": "Lagos",
            "Location": "Ikeja",
            "Pickup Address": "14 Allen Avenue, Ikeja, Lagos",
            "date": "2025-01-10",
            "items": [
                {"name": "Sneaker A", "size": "42", "unit_price": 5000.0, "total": 10000.0}
            ],
            "subtotal": 10000.0,
            "tax": 1000.0,
            "total": 11000.0
        }
        "#;
        let req: InvoiceRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.delivery_company, "GIG");
        assert_eq!(req.pickup_address.as_deref(), Some("14 Allen Avenue, Ikeja, Lagos"));
        assert_eq!(req.items.len(), 1);
        assert_eq!(req.items[0].unit_price, 5000.0);
    }

    #[test]
    fn test_invoice_request_pickup_address_optional() {
        let json = r#"
        {
            "id": "ORD-bbbb2222",
            "name": "Ada Obi",
            "email": "ada@example.com",
            "number": "+2348000000000",
            "Delivery Company": "GIG",
            "State": "Lagos",
            "Location": "Ikeja",
            "items": [],
            "subtotal": 0,
            "tax": 0,
            "total": 0
        }
        "#;
        let req: InvoiceRequest = serde_json::from_str(json).unwrap();
        assert!(req.pickup_address.is_none());
        assert!(req.date.is_none());
    }

    #[test]
    fn test_order_details_omits_absent_customer() {
        let details = OrderDetails {
            order_id: "ORD-cccc3333".to_string(),
            status: "pending".to_string(),
            batch: None,
            date_created: Utc::now(),
            estimated_time: None,
            customer_name: None,
            customer_email: None,
            customer_contact: None,
            items: Vec::new(),
        };
        let json = serde_json::to_string(&details).unwrap();
        assert!(!json.contains("customer_name"));
        assert!(json.contains("\"items\":[]"));
    }
}
