//! Linked bank accounts and their transactions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::{AccountId, ConsentId, TransactionId, UserId};

/// Currency recorded when a payload carries none.
pub const DEFAULT_CURRENCY: &str = "INR";

/// A bank account linked through a consent.
///
/// Unique on (`consent_id`, `account_ref`); rows without a stable reference
/// are matched on (`consent_id`, `masked_number`) instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Row id.
    pub id: AccountId,
    /// Owning user.
    pub user_id: UserId,
    /// Consent the account was linked under.
    pub consent_id: ConsentId,
    /// Provider account reference (`linkRefNumber`).
    pub account_ref: Option<String>,
    /// Masked account number (`XXXXXX1234`).
    pub masked_number: Option<String>,
    /// Bank / FIP name.
    pub bank_name: Option<String>,
    /// Account type (`SAVINGS`, `CURRENT`, ...).
    pub account_type: Option<String>,
    /// ISO currency.
    pub currency: String,
    /// Provider fields for the account; replaced, never merged, on update.
    pub metadata: serde_json::Value,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// A new, unsaved account row.
    #[must_use]
    pub fn new(user_id: UserId, consent_id: ConsentId) -> Self {
        let now = Utc::now();
        Self {
            id: AccountId::generate(),
            user_id,
            consent_id,
            account_ref: None,
            masked_number: None,
            bank_name: None,
            account_type: None,
            currency: DEFAULT_CURRENCY.to_string(),
            metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Money flow direction, derived at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Money in.
    Credit,
    /// Money out.
    Debit,
}

/// A transaction ingested from FI data. Never mutated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Row id.
    pub id: TransactionId,
    /// Account the transaction belongs to.
    pub account_id: AccountId,
    /// Stable provider reference; unique per account when present.
    pub reference: Option<String>,
    /// Signed amount as reported.
    pub amount: Decimal,
    /// ISO currency.
    pub currency: String,
    /// When the transaction happened, if any date field parsed.
    pub transaction_date: Option<DateTime<Utc>>,
    /// Narration / description.
    pub narration: Option<String>,
    /// Provider type or category (`CREDIT`, `DEBIT`, `UPI`, ...).
    pub txn_type: Option<String>,
    /// Raw provider record.
    pub raw: serde_json::Value,
    /// Insert time.
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Credit or debit.
    ///
    /// An explicit `CREDIT`/`DEBIT` type wins; otherwise a negative amount is
    /// a debit.
    #[must_use]
    pub fn direction(&self) -> Direction {
        match self.txn_type.as_deref().map(str::to_ascii_uppercase).as_deref() {
            Some("CREDIT" | "CR") => Direction::Credit,
            Some("DEBIT" | "DR") => Direction::Debit,
            _ if self.amount.is_sign_negative() => Direction::Debit,
            _ => Direction::Credit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn(amount: &str, txn_type: Option<&str>) -> Transaction {
        Transaction {
            id: TransactionId::generate(),
            account_id: AccountId::generate(),
            reference: None,
            amount: amount.parse().unwrap(),
            currency: DEFAULT_CURRENCY.into(),
            transaction_date: None,
            narration: None,
            txn_type: txn_type.map(String::from),
            raw: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn explicit_type_wins_over_sign() {
        assert_eq!(txn("100.00", Some("debit")).direction(), Direction::Debit);
        assert_eq!(txn("-5", Some("CREDIT")).direction(), Direction::Credit);
    }

    #[test]
    fn sign_decides_without_type() {
        assert_eq!(txn("-42.10", None).direction(), Direction::Debit);
        assert_eq!(txn("42.10", Some("UPI")).direction(), Direction::Credit);
    }

    #[test]
    fn new_account_defaults_currency() {
        let account = Account::new(UserId::generate(), ConsentId::new("c").unwrap());
        assert_eq!(account.currency, "INR");
        assert!(account.account_ref.is_none());
    }
}
