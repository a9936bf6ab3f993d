//! Core domain types for the checkout engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::amount::Rate;
use crate::Amount;

/// Most units a single cart line may hold.
pub const MAX_ITEM_QUANTITY: u32 = 999;

/// Most distinct lines in one cart.
pub const MAX_CART_ITEMS: usize = 100;

/// Highest accepted unit price. With the other two limits this keeps any cart
/// total exactly representable both as scaled `i64` and as a JSON number.
pub const MAX_UNIT_PRICE: Amount = Amount::from_units(100_000);

/// A cart change that would take the cart outside its limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CartLimit {
    #[error("quantity per item cannot exceed {}", MAX_ITEM_QUANTITY)]
    Quantity,

    #[error("cart cannot hold more than {} distinct items", MAX_CART_ITEMS)]
    Items,

    #[error("unit price cannot exceed {}", MAX_UNIT_PRICE)]
    Price,

    #[error("tax rate must be between 0 and 1")]
    TaxRate,
}

/// Opaque user identity supplied by a trusted caller.
pub type UserId = String;

/// Checkout session identifier (UUID v4 string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        SessionId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        SessionId(value.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Catalog record. Read-only to the checkout core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub barcode: String,
    pub name: String,
    pub price: Amount,
    pub tax_rate: Rate,
    pub stock: u32,
}

/// One line of a cart. Unique per barcode within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub barcode: String,
    pub name: String,
    pub price: Amount,
    pub tax_rate: Rate,
    pub qty: u32,
}

impl CartItem {
    /// `price * qty * (1 + tax_rate)`
    pub fn line_total(&self) -> Amount {
        self.price.times(self.qty).apply_rate(self.tax_rate.one_plus())
    }
}

impl From<(&Product, u32)> for CartItem {
    fn from((product, qty): (&Product, u32)) -> Self {
        Self {
            barcode: product.barcode.clone(),
            name: product.name.clone(),
            price: product.price,
            tax_rate: product.tax_rate,
            qty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Cart may be mutated.
    #[default]
    Active,
    /// Paid; cart is frozen.
    Locked,
}

/// A settled payment. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    #[serde(rename = "ref")]
    pub reference: String,
    pub paid_at: DateTime<Utc>,
    /// Pre-discount total, tax included.
    pub total: Amount,
    pub coupon_code: Option<String>,
    pub coupon_discount: Amount,
    pub credits_used: Amount,
    pub final_payable_amount: Amount,
    pub cashback: Amount,
    pub piggy_savings: Amount,
}

/// Payment slot of a session: a pending placeholder until settled.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PaymentState {
    #[default]
    Pending,
    Paid(Payment),
}

impl PaymentState {
    pub fn is_paid(&self) -> bool {
        matches!(self, PaymentState::Paid(_))
    }

    pub fn settled(&self) -> Option<&Payment> {
        match self {
            PaymentState::Paid(payment) => Some(payment),
            PaymentState::Pending => None,
        }
    }
}

/// One shopper's checkout instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub store_id: String,
    pub status: SessionStatus,
    pub items: Vec<CartItem>,
    pub payment: PaymentState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: UserId, store_id: String, now: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::generate(),
            user_id,
            store_id,
            status: SessionStatus::Active,
            items: Vec::new(),
            payment: PaymentState::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Sum of line totals, tax included, unrounded.
    pub fn total(&self) -> Amount {
        self.items.iter().map(CartItem::line_total).sum()
    }

    /// Add an item, merging quantities when the barcode is already in the cart.
    ///
    /// The cart is left untouched when the change would break a limit.
    pub fn add_item(&mut self, item: CartItem) -> Result<(), CartLimit> {
        if item.price > MAX_UNIT_PRICE {
            return Err(CartLimit::Price);
        }
        if !item.tax_rate.is_fraction() {
            return Err(CartLimit::TaxRate);
        }
        match self.items.iter_mut().find(|i| i.barcode == item.barcode) {
            Some(existing) => {
                existing.qty = existing
                    .qty
                    .checked_add(item.qty)
                    .filter(|qty| *qty <= MAX_ITEM_QUANTITY)
                    .ok_or(CartLimit::Quantity)?;
            }
            None => {
                if item.qty > MAX_ITEM_QUANTITY {
                    return Err(CartLimit::Quantity);
                }
                if self.items.len() >= MAX_CART_ITEMS {
                    return Err(CartLimit::Items);
                }
                self.items.push(item);
            }
        }
        Ok(())
    }

    pub fn remove_item(&mut self, barcode: &str) {
        self.items.retain(|i| i.barcode != barcode);
    }

    /// Record a settled payment and freeze the cart.
    pub fn settle(&mut self, payment: Payment) {
        self.payment = PaymentState::Paid(payment);
        self.status = SessionStatus::Locked;
    }
}

/// Per-user reward balances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub credits: Amount,
    pub piggy_bank: Amount,
}

impl User {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            credits: Amount::ZERO,
            piggy_bank: Amount::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Discount {
    /// Fraction of the total.
    Percent(Rate),
    /// Fixed amount.
    Flat(Amount),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    pub code: String,
    #[serde(default)]
    pub label: String,
    pub discount: Discount,
    #[serde(default)]
    pub used: bool,
    #[serde(default)]
    pub used_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Coupon {
    pub fn new(code: impl Into<String>, discount: Discount) -> Self {
        Self {
            code: code.into(),
            label: String::new(),
            discount,
            used: false,
            used_at: None,
            expires_at: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Unused and not expired at `now`.
    pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool {
        !self.used && self.expires_at.is_none_or(|exp| exp > now)
    }
}

/// Signed, time-bounded proof that a session was paid and what its cart held.
///
/// Field names are part of the wire contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrPayload {
    pub session_id: SessionId,
    pub total: Amount,
    /// Hex SHA-256 cart fingerprint.
    pub item_hash: String,
    /// Issue time, epoch millis.
    pub ts: i64,
    /// Expiry time, epoch millis.
    pub exp: i64,
    /// Hex HMAC-SHA256.
    pub sig: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(barcode: &str, price: i64, qty: u32) -> CartItem {
        CartItem {
            barcode: barcode.to_string(),
            name: barcode.to_string(),
            price: Amount::from_units(price),
            tax_rate: Rate::from_scaled(500),
            qty,
        }
    }

    #[test]
    fn line_total_includes_tax() {
        assert_eq!(item("12345", 60, 1).line_total(), Amount::from_units(63));
        assert_eq!(item("12345", 60, 2).line_total(), Amount::from_units(126));
    }

    #[test]
    fn add_item_merges_same_barcode() {
        let mut session = Session::new("u".into(), "store-1".into(), Utc::now());
        session.add_item(item("12345", 60, 1)).unwrap();
        session.add_item(item("67890", 40, 1)).unwrap();
        session.add_item(item("12345", 60, 2)).unwrap();

        assert_eq!(session.items.len(), 2);
        assert_eq!(session.items[0].qty, 3);
        assert_eq!(session.total(), Amount::from_units(189 + 42));
    }

    #[test]
    fn add_item_rejects_quantity_overflow() {
        let mut session = Session::new("u".into(), "store-1".into(), Utc::now());
        session.add_item(item("12345", 60, MAX_ITEM_QUANTITY)).unwrap();

        assert_eq!(session.add_item(item("12345", 60, 1)), Err(CartLimit::Quantity));
        assert_eq!(
            session.add_item(item("12345", 60, u32::MAX)),
            Err(CartLimit::Quantity)
        );
        assert_eq!(
            session.add_item(item("67890", 40, MAX_ITEM_QUANTITY + 1)),
            Err(CartLimit::Quantity)
        );
        assert_eq!(session.items.len(), 1);
        assert_eq!(session.items[0].qty, MAX_ITEM_QUANTITY);
    }

    #[test]
    fn add_item_rejects_price_and_tax_out_of_range() {
        let mut session = Session::new("u".into(), "store-1".into(), Utc::now());
        let pricey = CartItem {
            price: MAX_UNIT_PRICE + Amount::from_scaled(1),
            ..item("1", 0, 1)
        };
        assert_eq!(session.add_item(pricey), Err(CartLimit::Price));

        let taxed = CartItem {
            tax_rate: Rate::from_scaled(10_001),
            ..item("2", 1, 1)
        };
        assert_eq!(session.add_item(taxed), Err(CartLimit::TaxRate));
        assert!(session.items.is_empty());
    }

    #[test]
    fn add_item_caps_distinct_lines() {
        let mut session = Session::new("u".into(), "store-1".into(), Utc::now());
        for n in 0..MAX_CART_ITEMS {
            session.add_item(item(&n.to_string(), 1, 1)).unwrap();
        }
        assert_eq!(session.add_item(item("extra", 1, 1)), Err(CartLimit::Items));
        // merging into an existing line is still fine
        session.add_item(item("0", 1, 1)).unwrap();
        assert_eq!(session.items.len(), MAX_CART_ITEMS);
    }

    #[test]
    fn full_cart_total_stays_exact() {
        let mut session = Session::new("u".into(), "store-1".into(), Utc::now());
        for n in 0..MAX_CART_ITEMS {
            let line = CartItem {
                barcode: n.to_string(),
                name: "max".into(),
                price: MAX_UNIT_PRICE,
                tax_rate: Rate::ONE,
                qty: MAX_ITEM_QUANTITY,
            };
            session.add_item(line).unwrap();
        }
        // 100 lines * 999 units * 100000 * 2
        let expected = Amount::from_units(19_980_000_000);
        assert_eq!(session.total(), expected);
        assert_eq!(Amount::from_float(session.total().to_float()), expected);
    }

    #[test]
    fn remove_item_drops_line() {
        let mut session = Session::new("u".into(), "store-1".into(), Utc::now());
        session.add_item(item("12345", 60, 1)).unwrap();
        session.remove_item("12345");
        session.remove_item("missing");
        assert!(session.items.is_empty());
    }

    #[test]
    fn coupon_redeemable_checks_used_and_expiry() {
        let now = Utc::now();
        let coupon = Coupon::new("SAVE10", Discount::Percent(Rate::from_scaled(1_000)));
        assert!(coupon.is_redeemable(now));

        let expired = coupon.clone().expiring_at(now - chrono::Duration::seconds(1));
        assert!(!expired.is_redeemable(now));

        let used = Coupon {
            used: true,
            ..coupon
        };
        assert!(!used.is_redeemable(now));
    }

    #[test]
    fn payload_uses_wire_field_names() {
        let payload = QrPayload {
            session_id: SessionId::from("abc"),
            total: Amount::from_units(63),
            item_hash: "ff".into(),
            ts: 1,
            exp: 2,
            sig: "00".into(),
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(
            json,
            r#"{"sessionId":"abc","total":63.0,"itemHash":"ff","ts":1,"exp":2,"sig":"00"}"#
        );
    }

    #[test]
    fn pending_payment_serializes_status() {
        let json = serde_json::to_string(&PaymentState::Pending).unwrap();
        assert_eq!(json, r#"{"status":"pending"}"#);
    }
}
