//! # Validation Module
//!
//! Input validation for receiving, ordering and history queries.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: CLI / caller                                                  │
//! │  └── Type validation (argument parsing, deserialization)                │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                   │
//! │  ├── Codes, names, quantities, prices, discounts                        │
//! │  └── Runs before any stock is read                                      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                             │
//! │  ├── CHECK (quantity_on_shelf >= 0), CHECK (quantity_reserved >= 0)     │
//! │  ├── UNIQUE (sku), UNIQUE (batch_code), UNIQUE (order_number)           │
//! │  └── Foreign keys, append-only triggers on movements                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use stockwell_core::validation::{validate_batch_code, validate_quantity};
//!
//! validate_batch_code("MILK-2025-01").unwrap();
//! validate_quantity(5).unwrap();
//! ```

use chrono::{DateTime, Utc};

use crate::error::ValidationError;
use crate::types::{NewBatch, NewOrder, OrderRequest, PageRequest};
use crate::{MAX_LINE_QUANTITY, MAX_ORDER_LINES, MAX_PAGE_SIZE};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Shared rules for business codes (SKU, batch code).
fn validate_code(field: &str, value: &str, max: usize) -> ValidationResult<()> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::required(field));
    }

    if value.len() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }

    if !value
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates a SKU (Stock Keeping Unit).
///
/// ## Rules
/// - Must not be empty
/// - At most 50 characters
/// - Letters, digits, hyphens, underscores only
///
/// ## Example
/// ```rust
/// use stockwell_core::validation::validate_sku;
///
/// assert!(validate_sku("MILK-1L").is_ok());
/// assert!(validate_sku("").is_err());
/// assert!(validate_sku("A".repeat(100).as_str()).is_err());
/// ```
pub fn validate_sku(sku: &str) -> ValidationResult<()> {
    validate_code("sku", sku, 50)
}

/// Validates a lot's batch code. Same alphabet as a SKU, up to 64 chars.
pub fn validate_batch_code(code: &str) -> ValidationResult<()> {
    validate_code("batch_code", code, 64)
}

/// Validates a product name: non-empty, at most 200 characters.
pub fn validate_product_name(name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::required("name"));
    }

    if name.len() > 200 {
        return Err(ValidationError::TooLong {
            field: "name".to_string(),
            max: 200,
        });
    }

    Ok(())
}

/// Validates an opaque reference supplied by a collaborator
/// (actor, customer, product, batch, order).
pub fn validate_reference(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::required(field));
    }
    if value.len() > 128 {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 128,
        });
    }
    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a unit quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed `MAX_LINE_QUANTITY`
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::must_be_positive("quantity"));
    }

    if qty > MAX_LINE_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_LINE_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a money amount in cents. Zero is allowed (free goods,
/// free shipping).
///
/// ```rust
/// use stockwell_core::validation::validate_price_cents;
///
/// assert!(validate_price_cents("unit_price", 1099).is_ok());
/// assert!(validate_price_cents("unit_price", 0).is_ok());
/// assert!(validate_price_cents("unit_price", -100).is_err());
/// ```
pub fn validate_price_cents(field: &str, cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: i64::MAX,
        });
    }

    Ok(())
}

/// Validates a discount in basis points (0 to 10000, i.e. 0% to 100%).
pub fn validate_discount_bps(bps: u32) -> ValidationResult<()> {
    if bps > 10000 {
        return Err(ValidationError::OutOfRange {
            field: "discount_bps".to_string(),
            min: 0,
            max: 10000,
        });
    }

    Ok(())
}

// =============================================================================
// Collection Validators
// =============================================================================

/// An order carries between 1 and `MAX_ORDER_LINES` lines.
pub fn validate_line_count(count: usize) -> ValidationResult<()> {
    if count == 0 || count > MAX_ORDER_LINES {
        return Err(ValidationError::OutOfRange {
            field: "lines".to_string(),
            min: 1,
            max: MAX_ORDER_LINES as i64,
        });
    }

    Ok(())
}

/// Validates a page request against `MAX_PAGE_SIZE`.
pub fn validate_page(page: &PageRequest) -> ValidationResult<()> {
    if page.limit == 0 || page.limit > MAX_PAGE_SIZE {
        return Err(ValidationError::OutOfRange {
            field: "limit".to_string(),
            min: 1,
            max: MAX_PAGE_SIZE as i64,
        });
    }

    Ok(())
}

/// A history window must not end before it starts.
pub fn validate_date_range(
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> ValidationResult<()> {
    if let (Some(from), Some(to)) = (from, to) {
        if to < from {
            return Err(ValidationError::InvalidFormat {
                field: "to".to_string(),
                reason: "must not be earlier than from".to_string(),
            });
        }
    }

    Ok(())
}

// =============================================================================
// Aggregate Validators
// =============================================================================

/// Validates a lot before it is received.
pub fn validate_new_batch(batch: &NewBatch) -> ValidationResult<()> {
    validate_batch_code(&batch.batch_code)?;
    validate_reference("product_id", batch.product_id.as_str())?;
    validate_quantity(batch.quantity)?;
    validate_price_cents("unit_cost", batch.unit_cost_cents)?;
    validate_price_cents("unit_price", batch.unit_price_cents)?;
    Ok(())
}

fn validate_order_header(
    customer: &str,
    actor: &str,
    discount_bps: u32,
    shipping_fee_cents: i64,
    total_override_cents: Option<i64>,
) -> ValidationResult<()> {
    validate_reference("customer_id", customer)?;
    validate_reference("actor_id", actor)?;
    validate_discount_bps(discount_bps)?;
    validate_price_cents("shipping_fee", shipping_fee_cents)?;
    if let Some(total) = total_override_cents {
        validate_price_cents("total", total)?;
    }
    Ok(())
}

/// Validates pre-allocated order input for `create_order`.
pub fn validate_new_order(order: &NewOrder) -> ValidationResult<()> {
    validate_order_header(
        order.customer_id.as_str(),
        order.actor_id.as_str(),
        order.discount_bps,
        order.shipping_fee_cents,
        order.total_override_cents,
    )?;
    validate_line_count(order.lines.len())?;
    for line in &order.lines {
        validate_reference("product_id", line.product_id.as_str())?;
        validate_reference("batch_id", line.batch_id.as_str())?;
        validate_quantity(line.quantity)?;
        validate_price_cents("unit_price", line.unit_price_cents)?;
    }
    Ok(())
}

/// Validates an order request for `place_order`.
pub fn validate_order_request(request: &OrderRequest) -> ValidationResult<()> {
    validate_order_header(
        request.customer_id.as_str(),
        request.actor_id.as_str(),
        request.discount_bps,
        request.shipping_fee_cents,
        request.total_override_cents,
    )?;
    validate_line_count(request.items.len())?;
    for item in &request.items {
        validate_reference("product_id", item.product_id.as_str())?;
        validate_quantity(item.quantity)?;
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActorId, BatchId, CustomerId, NewOrderLine, OrderItemRequest, ProductId};
    use chrono::{Duration, NaiveDate};

    fn new_order(lines: Vec<NewOrderLine>) -> NewOrder {
        NewOrder {
            customer_id: CustomerId::guest(),
            actor_id: ActorId::from("clerk-1"),
            lines,
            discount_bps: 0,
            shipping_fee_cents: 0,
            total_override_cents: None,
        }
    }

    fn line(qty: i64) -> NewOrderLine {
        NewOrderLine {
            product_id: ProductId::from("milk"),
            batch_id: BatchId::from("b1"),
            quantity: qty,
            unit_price_cents: 120,
        }
    }

    #[test]
    fn test_validate_codes() {
        assert!(validate_sku("MILK-1L").is_ok());
        assert!(validate_sku("product_1").is_ok());
        assert!(validate_sku("   ").is_err());
        assert!(validate_sku("has space").is_err());
        assert!(validate_batch_code("LOT-2025-01-A").is_ok());
        assert!(validate_batch_code(&"A".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_product_name() {
        assert!(validate_product_name("Whole Milk 1L").is_ok());
        assert!(validate_product_name("").is_err());
        assert!(validate_product_name(&"A".repeat(300)).is_err());
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(MAX_LINE_QUANTITY).is_ok());
        assert_eq!(
            validate_quantity(0).unwrap_err(),
            ValidationError::must_be_positive("quantity")
        );
        assert!(validate_quantity(-1).is_err());
        assert!(validate_quantity(MAX_LINE_QUANTITY + 1).is_err());
    }

    #[test]
    fn test_validate_discount_bps() {
        assert!(validate_discount_bps(0).is_ok());
        assert!(validate_discount_bps(10000).is_ok());
        assert!(validate_discount_bps(10001).is_err());
    }

    #[test]
    fn test_validate_page() {
        assert!(validate_page(&PageRequest::first(50)).is_ok());
        assert!(validate_page(&PageRequest::first(0)).is_err());
        assert!(validate_page(&PageRequest::first(MAX_PAGE_SIZE + 1)).is_err());
    }

    #[test]
    fn test_validate_date_range() {
        let now = Utc::now();
        assert!(validate_date_range(Some(now), Some(now)).is_ok());
        assert!(validate_date_range(None, Some(now)).is_ok());
        assert!(validate_date_range(Some(now), Some(now - Duration::hours(1))).is_err());
    }

    #[test]
    fn test_validate_new_order() {
        assert!(validate_new_order(&new_order(vec![line(2)])).is_ok());
        assert!(validate_new_order(&new_order(vec![])).is_err());
        assert!(validate_new_order(&new_order(vec![line(2), line(0)])).is_err());

        let mut order = new_order(vec![line(1)]);
        order.discount_bps = 20000;
        assert!(validate_new_order(&order).is_err());

        let mut order = new_order(vec![line(1)]);
        order.actor_id = ActorId::from("");
        assert_eq!(
            validate_new_order(&order).unwrap_err(),
            ValidationError::required("actor_id")
        );
    }

    #[test]
    fn test_validate_order_request_and_batch() {
        let request = OrderRequest {
            customer_id: CustomerId::from("c-1"),
            actor_id: ActorId::from("admin"),
            items: vec![OrderItemRequest {
                product_id: ProductId::from("milk"),
                quantity: 3,
            }],
            discount_bps: 500,
            shipping_fee_cents: 300,
            total_override_cents: None,
        };
        assert!(validate_order_request(&request).is_ok());

        let batch = NewBatch {
            batch_code: "MILK-0101".to_string(),
            product_id: ProductId::from("milk"),
            expiry_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            unit_cost_cents: 80,
            unit_price_cents: -1,
            quantity: 10,
        };
        assert!(validate_new_batch(&batch).is_err());
    }
}
