//! Exit-side check of a presented payload against the live session.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::codec::{fingerprint, PayloadCodec};
use crate::model::{CartItem, Payment, QrPayload, SessionId};
use crate::store::SessionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Light {
    Green,
    Red,
}

/// Why a payload was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RejectReason {
    #[serde(rename = "invalid signature")]
    InvalidSignature,
    #[serde(rename = "qr expired")]
    Expired,
    #[serde(rename = "session missing")]
    SessionMissing,
    #[serde(rename = "payment not settled")]
    PaymentNotSettled,
    #[serde(rename = "cart changed after payment")]
    IntegrityMismatch,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            RejectReason::InvalidSignature => "invalid signature",
            RejectReason::Expired => "qr expired",
            RejectReason::SessionMissing => "session missing",
            RejectReason::PaymentNotSettled => "payment not settled",
            RejectReason::IntegrityMismatch => "cart changed after payment",
        };
        f.write_str(reason)
    }
}

/// Outcome of an exit check.
///
/// Green verdicts carry the settled payment and the items for the receipt.
/// Red verdicts only guarantee `status` and `reason`; `integrity` is set once
/// the fingerprint comparison was reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub status: Light,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<Payment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<CartItem>>,
}

impl Verdict {
    fn red(reason: RejectReason) -> Self {
        Self {
            status: Light::Red,
            reason: Some(reason),
            integrity: None,
            session_id: None,
            payment: None,
            items: None,
        }
    }

    pub fn is_green(&self) -> bool {
        self.status == Light::Green
    }
}

pub struct VerificationGate {
    store: Arc<SessionStore>,
    codec: Arc<PayloadCodec>,
    clock: Arc<dyn Clock>,
}

impl VerificationGate {
    pub fn new(store: Arc<SessionStore>, codec: Arc<PayloadCodec>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            codec,
            clock,
        }
    }

    /// Validate a presented payload, stopping at the first failed check:
    /// signature, expiry, session lookup, payment state, cart fingerprint.
    pub fn check_exit(&self, payload: &QrPayload) -> Verdict {
        let verdict = self.evaluate(payload);
        match verdict.reason {
            None => info!(session = %payload.session_id, "exit cleared"),
            Some(reason) => warn!(session = %payload.session_id, %reason, "exit refused"),
        }
        verdict
    }

    fn evaluate(&self, payload: &QrPayload) -> Verdict {
        if !self.codec.verify(payload) {
            return Verdict::red(RejectReason::InvalidSignature);
        }

        if self.clock.now_millis() > payload.exp {
            return Verdict::red(RejectReason::Expired);
        }

        let Some(session) = self.store.get(&payload.session_id) else {
            return Verdict::red(RejectReason::SessionMissing);
        };

        let Some(payment) = session.payment.settled() else {
            return Verdict::red(RejectReason::PaymentNotSettled);
        };

        if fingerprint(&session.items) != payload.item_hash {
            return Verdict {
                integrity: Some(false),
                session_id: Some(session.id),
                ..Verdict::red(RejectReason::IntegrityMismatch)
            };
        }

        Verdict {
            status: Light::Green,
            reason: None,
            integrity: Some(true),
            session_id: Some(session.id.clone()),
            payment: Some(payment.clone()),
            items: Some(session.items),
        }
    }
}
