//! Error types for checkout operations.

use thiserror::Error;

use crate::codec::{CodecError, IssueError};
use crate::model::{CartLimit, SessionId};

/// Request input rejected before any state was touched.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("barcode is required")]
    MissingBarcode,
    #[error("price {0} must be a non-negative number")]
    InvalidPrice(f64),
    #[error("tax rate {0} must be between 0 and 1")]
    InvalidTaxRate(f64),
    #[error("quantity must be at least 1")]
    InvalidQuantity,
    #[error("storeId is required")]
    MissingStoreId,
    #[error("userId is required")]
    MissingUserId,
    #[error(transparent)]
    Limit(#[from] CartLimit),
}

/// Coarse class of a [`CheckoutError`], for mapping onto a transport's status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    PreconditionFailed,
    Internal,
}

/// Top-level error returned by [`Checkout`](super::Checkout) operations.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("product {0} not found")]
    ProductNotFound(String),

    #[error("payment not settled for session {0}")]
    PaymentNotSettled(SessionId),

    #[error("internal error: {0}")]
    Internal(#[from] CodecError),
}

impl CheckoutError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CheckoutError::Validation(_) => ErrorKind::Validation,
            CheckoutError::SessionNotFound(_) | CheckoutError::ProductNotFound(_) => {
                ErrorKind::NotFound
            }
            CheckoutError::PaymentNotSettled(_) => ErrorKind::PreconditionFailed,
            CheckoutError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<IssueError> for CheckoutError {
    fn from(err: IssueError) -> Self {
        match err {
            IssueError::NotSettled(id) => CheckoutError::PaymentNotSettled(id),
            IssueError::Codec(e) => CheckoutError::Internal(e),
        }
    }
}
