//! Payment computation: coupons, store credit, cashback and round-up savings.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::RewardsPolicy;
use crate::ledger::RewardsLedger;
use crate::model::{CartItem, Coupon, Discount, Payment, Session, User};
use crate::Amount;

/// Reference recorded when the caller does not supply one.
pub const DEFAULT_REFERENCE: &str = "demo-payment";

/// What the shopper asked for at payment time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayRequest {
    pub coupon_code: Option<String>,
    /// Store credit to redeem. Clamped, never rejected.
    pub credits: Amount,
    pub reference: String,
}

impl Default for PayRequest {
    fn default() -> Self {
        Self {
            coupon_code: None,
            credits: Amount::ZERO,
            reference: DEFAULT_REFERENCE.to_string(),
        }
    }
}

impl PayRequest {
    pub fn with_coupon(mut self, code: impl Into<String>) -> Self {
        let code = code.into();
        self.coupon_code = (!code.is_empty()).then_some(code);
        self
    }

    pub fn with_credits(mut self, credits: Amount) -> Self {
        self.credits = credits;
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    /// Parse free-form credit input; anything non-numeric counts as zero.
    pub fn credits_from_text(text: &str) -> Amount {
        text.trim()
            .parse::<f64>()
            .map(Amount::from_float)
            .unwrap_or(Amount::ZERO)
    }
}

/// Amounts derived for one payment. Currency fields are rounded to cents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub total: Amount,
    pub coupon_code: Option<String>,
    pub coupon_discount: Amount,
    pub credits_used: Amount,
    pub payable: Amount,
    pub cashback: Amount,
    pub piggy_savings: Amount,
}

impl Quote {
    fn into_payment(self, reference: String, paid_at: DateTime<Utc>) -> Payment {
        Payment {
            reference,
            paid_at,
            total: self.total,
            coupon_code: self.coupon_code,
            coupon_discount: self.coupon_discount,
            credits_used: self.credits_used,
            final_payable_amount: self.payable,
            cashback: self.cashback,
            piggy_savings: self.piggy_savings,
        }
    }
}

/// Derive a quote for `items`.
///
/// `coupon` must already be known to be redeemable. Arithmetic runs at full
/// precision and each output is rounded half-up to cents only at the end.
pub fn quote(
    items: &[CartItem],
    coupon: Option<&Coupon>,
    requested_credits: Amount,
    available_credits: Amount,
    policy: &RewardsPolicy,
) -> Quote {
    let total: Amount = items.iter().map(CartItem::line_total).sum();

    let coupon_discount = coupon
        .map(|c| match c.discount {
            Discount::Percent(rate) => total.apply_rate(rate),
            Discount::Flat(value) => value,
        })
        .unwrap_or(Amount::ZERO)
        .min(total)
        .non_negative();

    let owed_after_coupon = (total - coupon_discount).non_negative();
    // whole cents only, so rounding can never spend more than the balance
    let credits_used = requested_credits
        .min(available_credits.floor_cents())
        .min(owed_after_coupon)
        .non_negative();

    let payable = (total - coupon_discount - credits_used).non_negative();
    let cashback = payable.apply_rate(policy.cashback_rate);
    let piggy_savings = (payable.ceil_to(policy.round_up_unit) - payable).non_negative();

    Quote {
        total: total.round_cents(),
        coupon_code: coupon.map(|c| c.code.clone()),
        coupon_discount: coupon_discount.round_cents(),
        credits_used: credits_used.round_cents(),
        payable: payable.round_cents(),
        cashback: cashback.round_cents(),
        piggy_savings: piggy_savings.round_cents(),
    }
}

/// Settles sessions against the rewards ledger.
#[derive(Debug)]
pub struct PaymentEngine {
    ledger: Arc<RewardsLedger>,
    policy: RewardsPolicy,
}

impl PaymentEngine {
    pub fn new(ledger: Arc<RewardsLedger>, policy: RewardsPolicy) -> Self {
        Self { ledger, policy }
    }

    pub fn policy(&self) -> &RewardsPolicy {
        &self.policy
    }

    /// Price the session's cart and commit the reward side effects.
    ///
    /// The coupon consumption and the balance update happen under the ledger
    /// lock, against the balances read under that same lock. The caller must
    /// hold the session so the payment is recorded in the same step.
    pub fn settle(
        &self,
        session: &Session,
        request: &PayRequest,
        now: DateTime<Utc>,
    ) -> (Payment, User) {
        self.ledger.with_account(&session.user_id, |account| {
            let coupon = request
                .coupon_code
                .as_deref()
                .and_then(|code| account.redeemable_coupon(code, now));

            let quote = quote(
                &session.items,
                coupon,
                request.credits,
                account.user.credits,
                &self.policy,
            );

            if let Some(code) = &quote.coupon_code {
                account.consume_coupon(code, now);
            }
            account.apply_rewards(quote.credits_used, quote.cashback, quote.piggy_savings);

            (
                quote.into_payment(request.reference.clone(), now),
                account.user.clone(),
            )
        })
    }
}
