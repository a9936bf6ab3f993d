//! Drives a [`Checkout`] from a stream of scripted commands.
//!
//! Scripts refer to sessions by a local label; the runner maps labels to the
//! generated session ids and remembers the last payload issued per label.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio_stream::{Stream, StreamExt};
use tracing::warn;

use crate::engine::{Checkout, CheckoutError, NewItem, PayRequest};
use crate::gate::Verdict;
use crate::model::{Payment, QrPayload, SessionId, SessionStatus, UserId};
use crate::Amount;

/// One scripted operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Open {
        label: String,
        user: UserId,
        store: String,
    },
    /// Scan an item with explicit details.
    ScanItem { label: String, item: NewItem },
    /// Scan a catalog product by barcode.
    ScanProduct {
        label: String,
        barcode: String,
        qty: u32,
    },
    Remove { label: String, barcode: String },
    Pay { label: String, request: PayRequest },
    IssueQr { label: String },
    /// Present the last issued payload at the exit gate.
    Verify { label: String },
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("unknown session label '{0}'")]
    UnknownLabel(String),

    #[error("session label '{0}' is already open")]
    DuplicateLabel(String),

    #[error("no qr issued for '{0}'")]
    NoPayload(String),

    #[error("{label}: {source}")]
    Checkout {
        label: String,
        source: CheckoutError,
    },
}

/// Final state of one scripted session.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub label: String,
    pub status: &'static str,
    /// Total units in the cart.
    pub units: u32,
    pub total: Amount,
    pub payment: Option<Payment>,
    /// `green`, `red (<reason>)`, or empty when never verified.
    pub verdict: String,
}

pub struct ScriptRunner {
    checkout: Arc<Checkout>,
    sessions: HashMap<String, SessionId>,
    payloads: HashMap<String, QrPayload>,
    verdicts: HashMap<String, Verdict>,
}

impl ScriptRunner {
    pub fn new(checkout: Arc<Checkout>) -> Self {
        Self {
            checkout,
            sessions: HashMap::new(),
            payloads: HashMap::new(),
            verdicts: HashMap::new(),
        }
    }

    /// Run every command of the stream. Failed commands are logged and skipped.
    pub async fn run(&mut self, mut stream: impl Stream<Item = Command> + Unpin) {
        while let Some(command) = stream.next().await {
            if let Err(e) = self.apply(command) {
                warn!("{e}");
            }
        }
    }

    pub fn apply(&mut self, command: Command) -> Result<(), ScriptError> {
        match command {
            Command::Open { label, user, store } => {
                if self.sessions.contains_key(&label) {
                    return Err(ScriptError::DuplicateLabel(label));
                }
                let session = self
                    .checkout
                    .create_session(&user, &store)
                    .map_err(|source| ScriptError::Checkout {
                        label: label.clone(),
                        source,
                    })?;
                self.sessions.insert(label, session.id);
            }
            Command::ScanItem { label, item } => {
                let id = self.session_id(&label)?;
                self.checkout
                    .scan_item(&id, item)
                    .map_err(|source| ScriptError::Checkout { label, source })?;
            }
            Command::ScanProduct {
                label,
                barcode,
                qty,
            } => {
                let id = self.session_id(&label)?;
                self.checkout
                    .scan_product(&id, &barcode, qty)
                    .map_err(|source| ScriptError::Checkout { label, source })?;
            }
            Command::Remove { label, barcode } => {
                let id = self.session_id(&label)?;
                self.checkout
                    .remove_item(&id, &barcode)
                    .map_err(|source| ScriptError::Checkout { label, source })?;
            }
            Command::Pay { label, request } => {
                let id = self.session_id(&label)?;
                self.checkout
                    .pay(&id, request)
                    .map_err(|source| ScriptError::Checkout { label, source })?;
            }
            Command::IssueQr { label } => {
                let id = self.session_id(&label)?;
                let payload = self
                    .checkout
                    .issue_qr(&id)
                    .map_err(|source| ScriptError::Checkout {
                        label: label.clone(),
                        source,
                    })?;
                self.payloads.insert(label, payload);
            }
            Command::Verify { label } => {
                let payload = self
                    .payloads
                    .get(&label)
                    .ok_or_else(|| ScriptError::NoPayload(label.clone()))?;
                let verdict = self.checkout.verify_qr(payload);
                self.verdicts.insert(label, verdict);
            }
        }
        Ok(())
    }

    /// One row per opened session, sorted by label.
    pub fn report(&self) -> Vec<ReportRow> {
        let mut rows: Vec<ReportRow> = self
            .sessions
            .iter()
            .filter_map(|(label, id)| {
                let session = self.checkout.get_session(id).ok()?;
                let verdict = match self.verdicts.get(label) {
                    None => String::new(),
                    Some(v) if v.is_green() => "green".to_string(),
                    Some(v) => match v.reason {
                        Some(reason) => format!("red ({reason})"),
                        None => "red".to_string(),
                    },
                };
                Some(ReportRow {
                    label: label.clone(),
                    status: match session.status {
                        SessionStatus::Active => "active",
                        SessionStatus::Locked => "locked",
                    },
                    units: session.items.iter().map(|i| i.qty).sum(),
                    total: session.total().round_cents(),
                    payment: session.payment.settled().cloned(),
                    verdict,
                })
            })
            .collect();
        rows.sort_by(|a, b| a.label.cmp(&b.label));
        rows
    }

    fn session_id(&self, label: &str) -> Result<SessionId, ScriptError> {
        self.sessions
            .get(label)
            .cloned()
            .ok_or_else(|| ScriptError::UnknownLabel(label.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::Config;

    fn runner() -> ScriptRunner {
        let checkout = Checkout::demo(&Config::default(), Arc::new(SystemClock));
        ScriptRunner::new(Arc::new(checkout))
    }

    fn open(label: &str) -> Command {
        Command::Open {
            label: label.into(),
            user: "demo-user".into(),
            store: "store-1".into(),
        }
    }

    fn scan(label: &str, barcode: &str) -> Command {
        Command::ScanProduct {
            label: label.into(),
            barcode: barcode.into(),
            qty: 1,
        }
    }

    #[tokio::test]
    async fn run_processes_full_checkout() {
        let mut runner = runner();
        let commands = vec![
            open("s1"),
            scan("s1", "12345"),
            Command::Pay {
                label: "s1".into(),
                request: PayRequest::default().with_coupon("SAVE10"),
            },
            Command::IssueQr { label: "s1".into() },
            Command::Verify { label: "s1".into() },
        ];

        runner.run(tokio_stream::iter(commands)).await;

        let report = runner.report();
        assert_eq!(report.len(), 1);
        let row = &report[0];
        assert_eq!(row.status, "locked");
        assert_eq!(row.units, 1);
        assert_eq!(row.total, Amount::from_units(63));
        assert_eq!(
            row.payment.as_ref().unwrap().final_payable_amount,
            Amount::from_float(56.7)
        );
        assert_eq!(row.verdict, "green");
    }

    #[tokio::test]
    async fn run_skips_failed_commands_and_continues() {
        let mut runner = runner();
        let commands = vec![
            open("s1"),
            // unknown label
            scan("s9", "12345"),
            // unknown product
            scan("s1", "00000"),
            // not paid yet
            Command::IssueQr { label: "s1".into() },
            scan("s1", "67890"),
        ];

        runner.run(tokio_stream::iter(commands)).await;

        let report = runner.report();
        assert_eq!(report[0].status, "active");
        assert_eq!(report[0].units, 1);
        assert_eq!(report[0].total, Amount::from_units(42));
        assert_eq!(report[0].verdict, "");
    }

    #[test]
    fn apply_reports_script_errors() {
        let mut runner = runner();
        runner.apply(open("s1")).unwrap();

        assert!(matches!(
            runner.apply(open("s1")),
            Err(ScriptError::DuplicateLabel(_))
        ));
        assert!(matches!(
            runner.apply(Command::Verify { label: "s1".into() }),
            Err(ScriptError::NoPayload(_))
        ));
        assert!(matches!(
            runner.apply(Command::Remove {
                label: "nope".into(),
                barcode: "1".into()
            }),
            Err(ScriptError::UnknownLabel(_))
        ));
    }
}
