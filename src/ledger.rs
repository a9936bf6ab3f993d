//! Per-user reward balances and coupon inventories.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::info;

use crate::amount::Rate;
use crate::model::{Coupon, Discount, User, UserId};
use crate::Amount;

/// A user's balances together with their coupons.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub user: User,
    pub coupons: Vec<Coupon>,
}

impl Account {
    fn new(id: UserId) -> Self {
        Self {
            user: User::new(id),
            coupons: Vec::new(),
        }
    }

    /// The coupon with `code`, if it is unused and unexpired at `now`.
    pub fn redeemable_coupon(&self, code: &str, now: DateTime<Utc>) -> Option<&Coupon> {
        self.coupons
            .iter()
            .find(|c| c.code == code && c.is_redeemable(now))
    }

    /// Mark a redeemable coupon used. Returns false if there was none to consume.
    pub fn consume_coupon(&mut self, code: &str, now: DateTime<Utc>) -> bool {
        match self
            .coupons
            .iter_mut()
            .find(|c| c.code == code && c.is_redeemable(now))
        {
            Some(coupon) => {
                coupon.used = true;
                coupon.used_at = Some(now);
                true
            }
            None => false,
        }
    }

    /// Debit redeemed credits, credit cashback and bank round-up savings.
    pub fn apply_rewards(&mut self, credits_used: Amount, cashback: Amount, piggy_savings: Amount) {
        self.user.credits = (self.user.credits - credits_used + cashback).non_negative();
        self.user.piggy_bank += piggy_savings;
    }
}

/// Owns every user's rewards state behind a single lock, so that a balance read
/// and the commit that follows it cannot interleave with another payment.
#[derive(Debug, Default)]
pub struct RewardsLedger {
    accounts: Mutex<HashMap<UserId, Account>>,
}

impl RewardsLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger seeded with the demo shopper.
    pub fn demo(now: DateTime<Utc>) -> Self {
        let ledger = Self::new();
        ledger.onboard(
            "demo-user",
            Amount::from_units(120),
            Amount::from_units(40),
            vec![
                Coupon::new("SAVE10", Discount::Percent(Rate::from_scaled(1_000)))
                    .with_label("10% off any bill")
                    .expiring_at(now + Duration::days(14)),
                Coupon::new("FLAT25", Discount::Flat(Amount::from_units(25)))
                    .with_label("25 off once")
                    .expiring_at(now + Duration::days(30)),
            ],
        );
        ledger
    }

    /// Replace a user's balances and coupon inventory. Balances are kept in cents.
    pub fn onboard(
        &self,
        user_id: &str,
        credits: Amount,
        piggy_bank: Amount,
        coupons: Vec<Coupon>,
    ) -> User {
        let user = User {
            id: user_id.to_string(),
            credits: credits.non_negative().round_cents(),
            piggy_bank: piggy_bank.non_negative().round_cents(),
        };
        info!(user = user_id, credits = %user.credits, coupons = coupons.len(), "user onboarded");
        self.accounts.lock().insert(
            user_id.to_string(),
            Account {
                user: user.clone(),
                coupons,
            },
        );
        user
    }

    /// Current user record, created with zero balances on first reference.
    pub fn user(&self, user_id: &str) -> User {
        self.with_account(user_id, |account| account.user.clone())
    }

    /// Full coupon inventory, used or not.
    pub fn coupons(&self, user_id: &str) -> Vec<Coupon> {
        self.with_account(user_id, |account| account.coupons.clone())
    }

    /// Coupons that could be applied at `now`.
    pub fn available_coupons(&self, user_id: &str, now: DateTime<Utc>) -> Vec<Coupon> {
        self.with_account(user_id, |account| {
            account
                .coupons
                .iter()
                .filter(|c| c.is_redeemable(now))
                .cloned()
                .collect()
        })
    }

    /// Run `f` with exclusive access to the user's account.
    pub fn with_account<T>(&self, user_id: &str, f: impl FnOnce(&mut Account) -> T) -> T {
        let mut accounts = self.accounts.lock();
        let account = accounts
            .entry(user_id.to_string())
            .or_insert_with(|| Account::new(user_id.to_string()));
        f(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_is_created_lazily() {
        let ledger = RewardsLedger::new();
        let user = ledger.user("fresh");
        assert_eq!(user, User::new("fresh".into()));
        assert!(ledger.coupons("fresh").is_empty());
    }

    #[test]
    fn demo_user_is_seeded() {
        let now = Utc::now();
        let ledger = RewardsLedger::demo(now);
        let user = ledger.user("demo-user");
        assert_eq!(user.credits, Amount::from_units(120));
        assert_eq!(user.piggy_bank, Amount::from_units(40));
        assert_eq!(ledger.available_coupons("demo-user", now).len(), 2);
    }

    #[test]
    fn available_coupons_skip_used_and_expired() {
        let now = Utc::now();
        let ledger = RewardsLedger::demo(now);
        ledger.with_account("demo-user", |a| assert!(a.consume_coupon("SAVE10", now)));

        let codes: Vec<_> = ledger
            .available_coupons("demo-user", now)
            .into_iter()
            .map(|c| c.code)
            .collect();
        assert_eq!(codes, vec!["FLAT25"]);

        let later = now + Duration::days(31);
        assert!(ledger.available_coupons("demo-user", later).is_empty());
    }

    #[test]
    fn coupon_is_consumed_once() {
        let now = Utc::now();
        let ledger = RewardsLedger::demo(now);
        ledger.with_account("demo-user", |account| {
            assert!(account.consume_coupon("FLAT25", now));
            assert!(!account.consume_coupon("FLAT25", now));
            let coupon = account.coupons.iter().find(|c| c.code == "FLAT25").unwrap();
            assert!(coupon.used);
            assert_eq!(coupon.used_at, Some(now));
        });
    }

    #[test]
    fn onboard_keeps_balances_in_cents() {
        let ledger = RewardsLedger::new();
        let user = ledger.onboard(
            "u",
            Amount::from_float(10.005),
            Amount::from_float(-3.0),
            vec![],
        );
        assert_eq!(user.credits, Amount::from_float(10.01));
        assert_eq!(user.piggy_bank, Amount::ZERO);
        assert_eq!(ledger.user("u"), user);
    }

    #[test]
    fn apply_rewards_never_goes_negative() {
        let mut account = Account::new("u".into());
        account.user.credits = Amount::from_units(5);
        account.apply_rewards(
            Amount::from_units(10),
            Amount::from_float(0.5),
            Amount::from_units(3),
        );
        assert_eq!(account.user.credits, Amount::ZERO);
        assert_eq!(account.user.piggy_bank, Amount::from_units(3));
    }
}
