use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::engine::{NewItem, PayRequest};
use crate::script::{Command, ReportRow};
use crate::Amount;

/// Errors that can occur when reading a checkout script
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open script: {0}")]
    Open(csv::Error),

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized operation '{op}'")]
    UnrecognizedOp { line: usize, op: String },

    #[error("line {line}: {op} missing {field}")]
    MissingField {
        line: usize,
        op: String,
        field: &'static str,
    },
}

#[derive(Debug, Deserialize)]
struct InputRow {
    op: String,
    session: String,
    user: Option<String>,
    store: Option<String>,
    barcode: Option<String>,
    name: Option<String>,
    price: Option<f64>,
    tax: Option<f64>,
    qty: Option<u32>,
    coupon: Option<String>,
    credits: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutputRow<'a> {
    session: &'a str,
    status: &'a str,
    items: u32,
    total: String,
    discount: String,
    credits: String,
    payable: String,
    cashback: String,
    piggy: String,
    verdict: &'a str,
}

/// Read checkout commands from a csv script
pub fn read_commands(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<Command, CsvError>>, CsvError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(CsvError::Open)?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            parse_row(line, row)
        }))
}

fn parse_row(line: usize, row: InputRow) -> Result<Command, CsvError> {
    let missing = |op: &str, field: &'static str| CsvError::MissingField {
        line,
        op: op.to_string(),
        field,
    };
    let label = row.session;

    match row.op.as_str() {
        "open" => Ok(Command::Open {
            label,
            user: row.user.unwrap_or_else(|| "demo-user".to_string()),
            store: row.store.unwrap_or_default(),
        }),
        "scan" => {
            let barcode = row.barcode.ok_or_else(|| missing("scan", "barcode"))?;
            let qty = row.qty.unwrap_or(1);
            match row.price {
                Some(price) => Ok(Command::ScanItem {
                    label,
                    item: NewItem {
                        name: row.name.unwrap_or_else(|| barcode.clone()),
                        barcode,
                        price,
                        tax_rate: row.tax.unwrap_or(0.0),
                        qty,
                    },
                }),
                None => Ok(Command::ScanProduct {
                    label,
                    barcode,
                    qty,
                }),
            }
        }
        "remove" => Ok(Command::Remove {
            label,
            barcode: row.barcode.ok_or_else(|| missing("remove", "barcode"))?,
        }),
        "pay" => {
            let credits = row
                .credits
                .as_deref()
                .map(PayRequest::credits_from_text)
                .unwrap_or_default();
            Ok(Command::Pay {
                label,
                request: PayRequest::default()
                    .with_coupon(row.coupon.unwrap_or_default())
                    .with_credits(credits),
            })
        }
        "qr" => Ok(Command::IssueQr { label }),
        "verify" => Ok(Command::Verify { label }),
        other => Err(CsvError::UnrecognizedOp {
            line,
            op: other.to_string(),
        }),
    }
}

/// write the session report to stdout in csv format
pub fn write_report(rows: impl IntoIterator<Item = ReportRow>) -> Result<(), csv::Error> {
    let stdout = io::stdout();
    let mut writer = csv::Writer::from_writer(stdout.lock());

    for row in rows {
        let amount = |value: Option<Amount>| value.map(|a| a.to_string()).unwrap_or_default();
        writer.serialize(OutputRow {
            session: &row.label,
            status: row.status,
            items: row.units,
            total: row.total.to_string(),
            discount: amount(row.payment.as_ref().map(|p| p.coupon_discount)),
            credits: amount(row.payment.as_ref().map(|p| p.credits_used)),
            payable: amount(row.payment.as_ref().map(|p| p.final_payable_amount)),
            cashback: amount(row.payment.as_ref().map(|p| p.cashback)),
            piggy: amount(row.payment.as_ref().map(|p| p.piggy_savings)),
            verdict: &row.verdict,
        })?;
    }

    writer.flush()?;
    Ok(())
}
