//! Runtime configuration, read from the environment (and an optional `.env`).

use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::amount::{Amount, Rate};

/// Largest accepted round-up unit for the piggy bank.
pub const MAX_ROUND_UP_UNIT: Amount = Amount::from_units(1_000_000);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key}: '{value}' is not a valid number")]
    InvalidNumber { key: &'static str, value: String },

    #[error("{key}: must not be empty")]
    Empty { key: &'static str },
}

/// HMAC key for signing payloads. `Debug` never prints the key.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Vec<u8>);

impl Secret {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Secret(key.into())
    }

    pub fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Reward parameters applied at payment time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardsPolicy {
    /// Share of the paid amount returned as store credit.
    pub cashback_rate: Rate,
    /// Payable amounts are rounded up to a multiple of this for the piggy bank.
    pub round_up_unit: Amount,
}

impl Default for RewardsPolicy {
    fn default() -> Self {
        Self {
            cashback_rate: Rate::from_scaled(200),
            round_up_unit: Amount::from_units(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub qr_secret: Secret,
    pub qr_expiry: Duration,
    pub rewards: RewardsPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            qr_secret: Secret::new("qr-secret"),
            qr_expiry: Duration::from_secs(300),
            rewards: RewardsPolicy::default(),
        }
    }
}

impl Config {
    /// Load from the process environment, falling back to defaults for unset keys.
    pub fn from_env() -> Result<Self, ConfigError> {
        // a missing .env file is fine
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let qr_secret = match lookup("QR_SECRET") {
            Some(value) if value.is_empty() => return Err(ConfigError::Empty { key: "QR_SECRET" }),
            Some(value) => Secret::new(value),
            None => defaults.qr_secret,
        };

        let qr_expiry = match lookup("QR_EXPIRY_SECONDS") {
            Some(value) => Duration::from_secs(parse("QR_EXPIRY_SECONDS", &value)?),
            None => defaults.qr_expiry,
        };

        let cashback_rate = match lookup("CASHBACK_RATE") {
            Some(value) => {
                let rate: f64 = parse("CASHBACK_RATE", &value)?;
                Rate::from_float(rate)
                    .filter(|rate| rate.is_fraction())
                    .ok_or(ConfigError::InvalidNumber {
                        key: "CASHBACK_RATE",
                        value,
                    })?
            }
            None => defaults.rewards.cashback_rate,
        };

        let round_up_unit = match lookup("ROUND_UP_UNIT") {
            Some(value) => {
                let unit: f64 = parse("ROUND_UP_UNIT", &value)?;
                if !(unit > 0.0 && unit <= MAX_ROUND_UP_UNIT.to_float()) {
                    return Err(ConfigError::InvalidNumber {
                        key: "ROUND_UP_UNIT",
                        value,
                    });
                }
                let unit = Amount::from_float(unit);
                if unit <= Amount::ZERO {
                    return Err(ConfigError::InvalidNumber {
                        key: "ROUND_UP_UNIT",
                        value,
                    });
                }
                unit
            }
            None => defaults.rewards.round_up_unit,
        };

        Ok(Self {
            qr_secret,
            qr_expiry,
            rewards: RewardsPolicy {
                cashback_rate,
                round_up_unit,
            },
        })
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        key,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.qr_secret, Secret::new("qr-secret"));
        assert_eq!(config.qr_expiry, Duration::from_secs(300));
        assert_eq!(config.rewards, RewardsPolicy::default());
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("QR_SECRET", "s3cret"),
            ("QR_EXPIRY_SECONDS", "60"),
            ("CASHBACK_RATE", "0.05"),
            ("ROUND_UP_UNIT", "5"),
        ]))
        .unwrap();
        assert_eq!(config.qr_secret.expose(), b"s3cret");
        assert_eq!(config.qr_expiry, Duration::from_secs(60));
        assert_eq!(config.rewards.cashback_rate, Rate::from_scaled(500));
        assert_eq!(config.rewards.round_up_unit, Amount::from_units(5));
    }

    #[test]
    fn rejects_malformed_numbers() {
        let err = Config::from_lookup(lookup(&[("QR_EXPIRY_SECONDS", "soon")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidNumber {
                key: "QR_EXPIRY_SECONDS",
                ..
            }
        ));

        let err = Config::from_lookup(lookup(&[("ROUND_UP_UNIT", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { key: "ROUND_UP_UNIT", .. }));
    }

    #[test]
    fn rejects_out_of_range_rewards() {
        for (key, value) in [
            ("CASHBACK_RATE", "1.5"),
            ("CASHBACK_RATE", "1e12"),
            ("CASHBACK_RATE", "-0.1"),
            ("ROUND_UP_UNIT", "1e300"),
            ("ROUND_UP_UNIT", "1000000.5"),
            ("ROUND_UP_UNIT", "0.00001"),
            ("ROUND_UP_UNIT", "NaN"),
        ] {
            let err = Config::from_lookup(lookup(&[(key, value)])).unwrap_err();
            assert!(
                matches!(&err, ConfigError::InvalidNumber { key: k, .. } if *k == key),
                "{key}={value}: {err}"
            );
        }

        let config = Config::from_lookup(lookup(&[
            ("CASHBACK_RATE", "1"),
            ("ROUND_UP_UNIT", "1000000"),
        ]))
        .unwrap();
        assert_eq!(config.rewards.cashback_rate, Rate::ONE);
        assert_eq!(config.rewards.round_up_unit, MAX_ROUND_UP_UNIT);
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = Secret::new("do-not-print");
        assert!(!format!("{secret:?}").contains("do-not-print"));
    }
}
