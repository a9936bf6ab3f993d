//! Checkout session engine.
//!
//! [`Checkout`] ties the session store, the rewards ledger, the payment
//! computation, the payload codec and the exit gate together behind the
//! operations a transport exposes: open a session, scan and remove items,
//! pay, issue the exit payload and verify it.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::amount::Rate;
use crate::catalog::{Catalog, InMemoryCatalog};
use crate::clock::Clock;
use crate::codec::PayloadCodec;
use crate::config::Config;
use crate::gate::{VerificationGate, Verdict};
use crate::ledger::RewardsLedger;
use crate::model::{
    CartItem, CartLimit, Coupon, Payment, QrPayload, Session, SessionId, User, MAX_ITEM_QUANTITY,
    MAX_UNIT_PRICE,
};
use crate::store::SessionStore;
use crate::Amount;

mod error;
pub use error::{CheckoutError, ErrorKind, ValidationError};

mod payment;
pub use payment::{quote, PayRequest, PaymentEngine, Quote, DEFAULT_REFERENCE};

/// An item as submitted by a scanner, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    pub barcode: String,
    pub name: String,
    pub price: f64,
    pub tax_rate: f64,
    pub qty: u32,
}

impl NewItem {
    pub fn validate(self) -> Result<CartItem, ValidationError> {
        if self.barcode.trim().is_empty() {
            return Err(ValidationError::MissingBarcode);
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(ValidationError::InvalidPrice(self.price));
        }
        if self.price > MAX_UNIT_PRICE.to_float() {
            return Err(CartLimit::Price.into());
        }
        let tax_rate = Rate::from_float(self.tax_rate)
            .filter(|rate| rate.is_fraction())
            .ok_or(ValidationError::InvalidTaxRate(self.tax_rate))?;
        if self.qty == 0 {
            return Err(ValidationError::InvalidQuantity);
        }
        if self.qty > MAX_ITEM_QUANTITY {
            return Err(CartLimit::Quantity.into());
        }

        Ok(CartItem {
            barcode: self.barcode,
            name: self.name,
            price: Amount::from_float(self.price),
            tax_rate,
            qty: self.qty,
        })
    }
}

/// Result of [`Checkout::pay`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settlement {
    pub session: Session,
    pub payment: Payment,
    pub user: User,
}

/// The checkout session engine.
pub struct Checkout {
    store: Arc<SessionStore>,
    ledger: Arc<RewardsLedger>,
    catalog: Arc<dyn Catalog>,
    payments: PaymentEngine,
    codec: Arc<PayloadCodec>,
    gate: VerificationGate,
    clock: Arc<dyn Clock>,
}

/// Public API
impl Checkout {
    pub fn new(
        config: &Config,
        catalog: Arc<dyn Catalog>,
        ledger: Arc<RewardsLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = Arc::new(SessionStore::new(clock.clone()));
        let codec = Arc::new(PayloadCodec::new(
            config.qr_secret.clone(),
            config.qr_expiry,
        ));
        Self {
            payments: PaymentEngine::new(ledger.clone(), config.rewards),
            gate: VerificationGate::new(store.clone(), codec.clone(), clock.clone()),
            store,
            ledger,
            catalog,
            codec,
            clock,
        }
    }

    /// Engine seeded with the demo catalog and demo shopper.
    pub fn demo(config: &Config, clock: Arc<dyn Clock>) -> Self {
        let ledger = Arc::new(RewardsLedger::demo(clock.now()));
        Self::new(config, Arc::new(InMemoryCatalog::demo()), ledger, clock)
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<RewardsLedger> {
        &self.ledger
    }

    pub fn codec(&self) -> &PayloadCodec {
        &self.codec
    }

    pub fn create_session(&self, user_id: &str, store_id: &str) -> Result<Session, CheckoutError> {
        if user_id.trim().is_empty() {
            return Err(ValidationError::MissingUserId.into());
        }
        if store_id.trim().is_empty() {
            return Err(ValidationError::MissingStoreId.into());
        }

        self.ledger.user(user_id);
        let session = self.store.create(user_id.to_string(), store_id.to_string());
        info!(session = %session.id, user = user_id, store = store_id, "session opened");
        Ok(session)
    }

    pub fn get_session(&self, id: &SessionId) -> Result<Session, CheckoutError> {
        self.store
            .get(id)
            .ok_or_else(|| CheckoutError::SessionNotFound(id.clone()))
    }

    pub fn list_sessions(&self) -> Vec<Session> {
        self.store.list()
    }

    /// Add an item to the cart, merging with an existing line for the same barcode.
    ///
    /// Ignored once the session is locked.
    pub fn scan_item(&self, id: &SessionId, item: NewItem) -> Result<Session, CheckoutError> {
        let result = item
            .validate()
            .map_err(CheckoutError::from)
            .and_then(|item| self.mutate_cart(id, "scan", |session| session.add_item(item)));
        Self::log_result("scan", id, &result);
        result
    }

    /// Add `qty` units of a catalog product.
    pub fn scan_product(
        &self,
        id: &SessionId,
        barcode: &str,
        qty: u32,
    ) -> Result<Session, CheckoutError> {
        let result = self.resolve_product(barcode, qty).and_then(|item| {
            self.mutate_cart(id, "scan", |session| session.add_item(item))
        });
        Self::log_result("scan", id, &result);
        result
    }

    /// Drop the cart line for `barcode`. Ignored once the session is locked.
    pub fn remove_item(&self, id: &SessionId, barcode: &str) -> Result<Session, CheckoutError> {
        let result = self.mutate_cart(id, "remove", |session| {
            session.remove_item(barcode);
            Ok(())
        });
        Self::log_result("remove", id, &result);
        result
    }

    /// Settle the session.
    ///
    /// Paying an already-paid session returns the recorded payment and the
    /// user's current balances without touching any rewards.
    pub fn pay(&self, id: &SessionId, request: PayRequest) -> Result<Settlement, CheckoutError> {
        let now = self.clock.now();

        let (session, (payment, settled_user)) = self
            .store
            .update_with(id, |mut session| {
                if let Some(existing) = session.payment.settled().cloned() {
                    return (session, (existing, None));
                }
                let (payment, user) = self.payments.settle(&session, &request, now);
                session.settle(payment.clone());
                (session, (payment, Some(user)))
            })
            .ok_or_else(|| CheckoutError::SessionNotFound(id.clone()))
            .inspect_err(|e| warn!(session = %id, reason = %e, "pay skipped"))?;

        let user = match settled_user {
            Some(user) => {
                info!(
                    session = %id,
                    total = %payment.total,
                    discount = %payment.coupon_discount,
                    credits = %payment.credits_used,
                    payable = %payment.final_payable_amount,
                    cashback = %payment.cashback,
                    piggy = %payment.piggy_savings,
                    "payment settled"
                );
                user
            }
            None => {
                debug!(session = %id, "session already paid, returning recorded payment");
                self.ledger.user(&session.user_id)
            }
        };

        Ok(Settlement {
            session,
            payment,
            user,
        })
    }

    /// Sign an exit payload for a paid session.
    pub fn issue_qr(&self, id: &SessionId) -> Result<QrPayload, CheckoutError> {
        let result = self.get_session(id).and_then(|session| {
            self.codec
                .issue(&session, self.clock.now())
                .map_err(CheckoutError::from)
        });
        match &result {
            Ok(payload) => info!(session = %id, exp = payload.exp, "qr issued"),
            Err(e) => warn!(session = %id, reason = %e, "qr refused"),
        }
        result
    }

    pub fn verify_qr(&self, payload: &QrPayload) -> Verdict {
        self.gate.check_exit(payload)
    }

    /// User balances, created empty on first reference.
    pub fn user(&self, user_id: &str) -> User {
        self.ledger.user(user_id)
    }

    /// Coupons the user could apply right now.
    pub fn available_coupons(&self, user_id: &str) -> Vec<Coupon> {
        self.ledger.available_coupons(user_id, self.clock.now())
    }
}

/// Private API
impl Checkout {
    /// Small helper to log cart mutation results
    fn log_result(op: &str, id: &SessionId, result: &Result<Session, CheckoutError>) {
        match result {
            Ok(session) => info!(
                session = %id,
                items = session.items.len(),
                "{op} applied"
            ),
            Err(e) => warn!(session = %id, reason = %e, "{op} skipped"),
        }
    }

    fn resolve_product(&self, barcode: &str, qty: u32) -> Result<CartItem, CheckoutError> {
        if barcode.trim().is_empty() {
            return Err(ValidationError::MissingBarcode.into());
        }
        if qty == 0 {
            return Err(ValidationError::InvalidQuantity.into());
        }
        let product = self
            .catalog
            .product(barcode)
            .ok_or_else(|| CheckoutError::ProductNotFound(barcode.to_string()))?;
        Ok(CartItem::from((&product, qty)))
    }

    /// Apply a cart change if the session is still active; a locked session is
    /// returned unchanged. A change that fails must leave the session as it was.
    fn mutate_cart(
        &self,
        id: &SessionId,
        op: &str,
        change: impl FnOnce(&mut Session) -> Result<(), CartLimit>,
    ) -> Result<Session, CheckoutError> {
        let (session, outcome) = self
            .store
            .update_with(id, |mut session| {
                if !session.is_active() {
                    warn!(session = %id, op, "session is locked, cart change ignored");
                    return (session, Ok(()));
                }
                let outcome = change(&mut session);
                (session, outcome)
            })
            .ok_or_else(|| CheckoutError::SessionNotFound(id.clone()))?;
        outcome.map_err(ValidationError::from)?;
        Ok(session)
    }
}
