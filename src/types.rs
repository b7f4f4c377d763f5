//! Core domain types: raw brokerage orders, normalized rows and credentials.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One option order as returned by the brokerage. Timestamps stay textual until
/// normalization so a bad value can be reported by field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawOrder {
    pub created_at: String,
    pub updated_at: String,
    pub chain_symbol: String,
    #[serde(default)]
    pub legs: Vec<Leg>,
    #[serde(with = "rust_decimal::serde::str")]
    pub processed_premium: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Leg {
    pub expiration_date: String,
    pub option_type: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub strike_price: Decimal,
    /// Absent for expirations and assignments.
    #[serde(default)]
    pub side: Option<LegSide>,
    #[serde(default)]
    pub executions: Vec<Execution>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LegSide {
    Buy,
    Sell,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Execution {
    pub settlement_date: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub quantity: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
}

/// The latest unfiltered brokerage fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawSnapshot {
    pub fetched_at: DateTime<Utc>,
    pub orders: Vec<RawOrder>,
}

impl RawSnapshot {
    pub fn new(orders: Vec<RawOrder>) -> Self {
        Self {
            fetched_at: Utc::now(),
            orders,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TransCode {
    BTO,
    STC,
    OEXP,
}

impl From<Option<LegSide>> for TransCode {
    fn from(side: Option<LegSide>) -> Self {
        match side {
            Some(LegSide::Buy) => TransCode::BTO,
            Some(LegSide::Sell) => TransCode::STC,
            _ => TransCode::OEXP,
        }
    }
}

/// Column names of the persisted table, in file order.
pub const COLUMNS: [&str; 9] = [
    "Activity Date",
    "Process Date",
    "Settle Date",
    "Instrument",
    "Description",
    "Trans Code",
    "Quantity",
    "Price",
    "Amount",
];

/// One flat trade-leg row. Serializes with the dashboard column names, dates as
/// `YYYY-MM-DD` and numbers as text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NormalizedRecord {
    #[serde(rename = "Activity Date")]
    pub activity_date: NaiveDate,
    #[serde(rename = "Process Date")]
    pub process_date: NaiveDate,
    #[serde(rename = "Settle Date")]
    pub settle_date: Option<NaiveDate>,
    #[serde(rename = "Instrument")]
    pub instrument: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Trans Code")]
    pub trans_code: TransCode,
    #[serde(rename = "Quantity", with = "rust_decimal::serde::str_option")]
    pub quantity: Option<Decimal>,
    #[serde(rename = "Price", with = "rust_decimal::serde::str_option")]
    pub price: Option<Decimal>,
    #[serde(rename = "Amount", with = "rust_decimal::serde::str")]
    pub amount: Decimal,
}

impl NormalizedRecord {
    pub fn in_range(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.activity_date >= start && self.activity_date <= end
    }
}

/// Rows sorted by activity date with no exact duplicates.
pub type PersistedTable = Vec<NormalizedRecord>;

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// One-time code for accounts that require MFA.
    pub mfa_code: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            mfa_code: None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &crate::utils::mask_user(&self.username))
            .field("password", &"****")
            .field("mfa_code", &self.mfa_code.as_ref().map(|_| "****"))
            .finish()
    }
}
