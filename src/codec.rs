//! Cart fingerprints and signed exit payloads.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::Secret;
use crate::model::{CartItem, QrPayload, Session, SessionId};
use crate::Amount;

type HmacSha256 = Hmac<Sha256>;

/// Separator between items in the fingerprint input.
const ITEM_DELIMITER: &str = "|";

/// Length of a hex-encoded HMAC-SHA256 tag.
const SIG_HEX_LEN: usize = 64;

/// Internal failures while producing a signature. Never carries key material.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("signing key rejected")]
    InvalidKey,

    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors returned by [`PayloadCodec::issue`].
#[derive(Debug, Error)]
pub enum IssueError {
    #[error("payment not settled for session {0}")]
    NotSettled(SessionId),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// The fields covered by the signature, in their canonical order.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignedFields<'a> {
    session_id: &'a SessionId,
    total: Amount,
    item_hash: &'a str,
    ts: i64,
    exp: i64,
}

impl<'a> From<&'a QrPayload> for SignedFields<'a> {
    fn from(payload: &'a QrPayload) -> Self {
        Self {
            session_id: &payload.session_id,
            total: payload.total,
            item_hash: &payload.item_hash,
            ts: payload.ts,
            exp: payload.exp,
        }
    }
}

/// Hex SHA-256 over `barcode:qty:price` lines sorted by barcode.
///
/// Independent of insertion order; sensitive to any change in the barcode set,
/// a quantity or a unit price.
pub fn fingerprint(items: &[CartItem]) -> String {
    let mut sorted: Vec<&CartItem> = items.iter().collect();
    sorted.sort_by(|a, b| a.barcode.as_bytes().cmp(b.barcode.as_bytes()));

    let normalized = sorted
        .iter()
        .map(|i| format!("{}:{}:{}", i.barcode, i.qty, i.price))
        .collect::<Vec<_>>()
        .join(ITEM_DELIMITER);

    hex::encode(Sha256::digest(normalized.as_bytes()))
}

/// Issues and checks HMAC-signed payloads.
#[derive(Debug, Clone)]
pub struct PayloadCodec {
    secret: Secret,
    expiry_millis: i64,
}

impl PayloadCodec {
    pub fn new(secret: Secret, expiry: std::time::Duration) -> Self {
        Self {
            secret,
            expiry_millis: i64::try_from(expiry.as_millis()).unwrap_or(i64::MAX),
        }
    }

    /// Build and sign the exit payload for a paid session.
    pub fn issue(&self, session: &Session, now: DateTime<Utc>) -> Result<QrPayload, IssueError> {
        if !session.payment.is_paid() {
            return Err(IssueError::NotSettled(session.id.clone()));
        }

        let ts = now.timestamp_millis();
        let payload = QrPayload {
            session_id: session.id.clone(),
            total: session.total(),
            item_hash: fingerprint(&session.items),
            ts,
            exp: ts.saturating_add(self.expiry_millis),
            sig: String::new(),
        };

        self.sign(payload).map_err(IssueError::from)
    }

    /// Replace `payload.sig` with the HMAC over every other field.
    pub fn sign(&self, mut payload: QrPayload) -> Result<QrPayload, CodecError> {
        let mut mac = keyed(&self.secret)?;
        mac.update(&canonical(&payload)?);
        payload.sig = hex::encode(mac.finalize().into_bytes());
        Ok(payload)
    }

    /// Check the signature with the codec's current secret.
    pub fn verify(&self, payload: &QrPayload) -> bool {
        Self::verify_with(payload, &self.secret)
    }

    /// Check the signature against an explicitly supplied secret.
    ///
    /// Only the lowercase hex form produced by [`sign`](Self::sign) is accepted.
    /// The tag comparison is constant-time.
    pub fn verify_with(payload: &QrPayload, secret: &Secret) -> bool {
        if !is_canonical_sig(&payload.sig) {
            return false;
        }
        let Ok(sig) = hex::decode(&payload.sig) else {
            return false;
        };
        let Ok(bytes) = canonical(payload) else {
            return false;
        };
        let Ok(mut mac) = keyed(secret) else {
            return false;
        };
        mac.update(&bytes);
        mac.verify_slice(&sig).is_ok()
    }
}

fn is_canonical_sig(sig: &str) -> bool {
    sig.len() == SIG_HEX_LEN && sig.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn keyed(secret: &Secret) -> Result<HmacSha256, CodecError> {
    HmacSha256::new_from_slice(secret.expose()).map_err(|_| CodecError::InvalidKey)
}

/// Deterministic JSON of the signed fields, `sig` excluded.
fn canonical(payload: &QrPayload) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&SignedFields::from(payload))
}
