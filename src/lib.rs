pub mod amount;
pub mod catalog;
pub mod clock;
pub mod codec;
pub mod config;
pub mod csv;
pub mod engine;
pub mod gate;
pub mod ledger;
pub mod model;
pub mod script;
pub mod store;

pub use amount::{Amount, Rate};
pub use engine::{Checkout, CheckoutError, PayRequest};
pub use model::{CartItem, Payment, QrPayload, Session, SessionId, User};
