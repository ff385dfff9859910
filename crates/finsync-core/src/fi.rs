//! FI payload normalization.
//!
//! The provider's FI data is not contractually stable. Two shapes are seen:
//!
//! - grouped: `{"fips": [{"fipID": "..", "accounts": [<entry>, ..]}, ..]}`
//! - flat: `{"accounts": [<entry>, ..]}` (or a bare array of entries)
//!
//! An `<entry>` carries account fields either at its top level or nested
//! under `data.account` / `account`. [`flatten_payload`] turns any of these
//! into [`FiAccount`]s, and [`CanonicalTransaction::from_raw`] maps one
//! loosely-typed transaction record onto typed fields.
//!
//! Every target field is read from a fixed precedence list of source fields;
//! the first present, non-empty value wins.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};

use crate::account::DEFAULT_CURRENCY;
use crate::consent::parse_timestamp;

/// Account reference aliases.
pub const ACCOUNT_REF_FIELDS: &[&str] = &[
    "linkRefNumber",
    "linkedAccRef",
    "accRefNumber",
    "accountRef",
    "account_ref",
];

/// Masked account number aliases.
pub const MASKED_NUMBER_FIELDS: &[&str] = &[
    "maskedAccNumber",
    "maskedAccountNumber",
    "masked_account_number",
];

/// FIP / bank name aliases.
pub const FIP_FIELDS: &[&str] = &["fipID", "fipId", "fip_id", "bankName", "fipName"];

/// Account type aliases (read from the account, then its summary).
pub const ACCOUNT_TYPE_FIELDS: &[&str] = &["accType", "type", "accountType"];

/// Transaction reference aliases.
pub const TXN_REFERENCE_FIELDS: &[&str] = &[
    "txnId",
    "transactionId",
    "reference",
    "referenceId",
    "refNo",
    "fipTxnId",
];

/// Transaction amount aliases.
pub const AMOUNT_FIELDS: &[&str] = &["amount", "txnAmount", "transactionAmount", "value"];

/// Transaction date aliases.
pub const DATE_FIELDS: &[&str] = &[
    "transactionTimestamp",
    "valueDate",
    "txnDate",
    "transactionDate",
    "date",
];

/// Narration aliases.
pub const NARRATION_FIELDS: &[&str] = &["narration", "description", "remarks", "particulars"];

/// Transaction type / category aliases.
pub const TXN_TYPE_FIELDS: &[&str] = &["type", "txnType", "transactionType", "category"];

/// One account's worth of FI data, shape-independent.
#[derive(Debug, Clone, PartialEq)]
pub struct FiAccount {
    /// Provider account reference.
    pub account_ref: Option<String>,
    /// Masked account number.
    pub masked_number: Option<String>,
    /// FIP the account is held at.
    pub bank_name: Option<String>,
    /// Account type from the account or its summary.
    pub account_type: Option<String>,
    /// Currency from the summary, if given.
    pub currency: Option<String>,
    /// The account detail object.
    pub detail: Value,
    /// `summary` block, `Null` when absent.
    pub summary: Value,
    /// `profile` block, `Null` when absent.
    pub profile: Value,
    /// Raw transaction records.
    pub transactions: Vec<Value>,
}

impl FiAccount {
    fn from_entry(entry: &Value, group_fip: Option<&str>) -> Self {
        let detail = entry
            .pointer("/data/account")
            .or_else(|| entry.get("account"))
            .filter(|v| v.is_object())
            .unwrap_or(entry);
        let summary = detail.get("summary").cloned().unwrap_or(Value::Null);
        let profile = detail.get("profile").cloned().unwrap_or(Value::Null);

        let account_ref =
            first_string(entry, ACCOUNT_REF_FIELDS).or_else(|| first_string(detail, ACCOUNT_REF_FIELDS));
        let masked_number = first_string(entry, MASKED_NUMBER_FIELDS)
            .or_else(|| first_string(detail, MASKED_NUMBER_FIELDS));
        let bank_name = group_fip
            .map(String::from)
            .or_else(|| first_string(entry, FIP_FIELDS))
            .or_else(|| first_string(detail, FIP_FIELDS));
        let account_type = first_string(entry, ACCOUNT_TYPE_FIELDS)
            .or_else(|| first_string(detail, ACCOUNT_TYPE_FIELDS))
            .or_else(|| first_string(&summary, ACCOUNT_TYPE_FIELDS));
        let currency = first_string(&summary, &["currency"]);

        Self {
            account_ref,
            masked_number,
            bank_name,
            account_type,
            currency,
            detail: detail.clone(),
            transactions: transaction_list(entry, detail),
            summary,
            profile,
        }
    }

    /// Account metadata to persist. Built from the normalized fields so both
    /// payload shapes store the same blob.
    #[must_use]
    pub fn metadata(&self) -> Value {
        let mut map = Map::new();
        let mut put = |key: &str, value: Value| {
            if !value.is_null() {
                map.insert(key.to_string(), value);
            }
        };
        put("fipId", json!(self.bank_name));
        put("linkRefNumber", json!(self.account_ref));
        put("maskedAccNumber", json!(self.masked_number));
        put("type", json!(self.account_type));
        put("summary", self.summary.clone());
        put("profile", self.profile.clone());
        Value::Object(map)
    }
}

/// Flatten an FI payload of either shape into per-account records.
#[must_use]
pub fn flatten_payload(payload: &Value) -> Vec<FiAccount> {
    let mut out = Vec::new();
    if let Some(groups) = payload.get("fips").and_then(Value::as_array) {
        for group in groups {
            push_group(group, &mut out);
        }
    } else if let Some(entries) = payload.get("accounts").and_then(Value::as_array) {
        out.extend(entries.iter().map(|e| FiAccount::from_entry(e, None)));
    } else if let Some(items) = payload.as_array() {
        for item in items {
            if item.get("accounts").is_some_and(Value::is_array) {
                push_group(item, &mut out);
            } else {
                out.push(FiAccount::from_entry(item, None));
            }
        }
    }
    out
}

fn push_group(group: &Value, out: &mut Vec<FiAccount>) {
    let fip = first_string(group, FIP_FIELDS);
    if let Some(entries) = group.get("accounts").and_then(Value::as_array) {
        out.extend(
            entries
                .iter()
                .map(|e| FiAccount::from_entry(e, fip.as_deref())),
        );
    }
}

fn transaction_list(entry: &Value, detail: &Value) -> Vec<Value> {
    let holder = detail
        .get("transactions")
        .or_else(|| entry.get("transactions"));
    let Some(holder) = holder else {
        return Vec::new();
    };
    let list = holder.get("transaction").unwrap_or(holder);
    match list {
        Value::Array(items) => items.clone(),
        Value::Object(_) => vec![list.clone()],
        _ => Vec::new(),
    }
}

/// A transaction record mapped onto typed fields.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalTransaction {
    /// First of [`TXN_REFERENCE_FIELDS`].
    pub reference: Option<String>,
    /// First parseable of [`AMOUNT_FIELDS`]; zero when none parse.
    pub amount: Decimal,
    /// Record currency, else the account's, else [`DEFAULT_CURRENCY`].
    pub currency: String,
    /// First parseable of [`DATE_FIELDS`].
    pub transaction_date: Option<DateTime<Utc>>,
    /// First of [`NARRATION_FIELDS`].
    pub narration: Option<String>,
    /// First of [`TXN_TYPE_FIELDS`].
    pub txn_type: Option<String>,
    /// The record as received.
    pub raw: Value,
}

impl CanonicalTransaction {
    /// Normalize one raw transaction record.
    #[must_use]
    pub fn from_raw(raw: &Value, account_currency: Option<&str>) -> Self {
        let amount = AMOUNT_FIELDS
            .iter()
            .filter_map(|field| raw.get(*field))
            .find_map(parse_amount)
            .unwrap_or(Decimal::ZERO);
        let transaction_date = DATE_FIELDS
            .iter()
            .filter_map(|field| raw.get(*field).and_then(Value::as_str))
            .find_map(parse_timestamp);
        let currency = first_string(raw, &["currency"])
            .or_else(|| account_currency.map(String::from))
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

        Self {
            reference: first_string(raw, TXN_REFERENCE_FIELDS),
            amount,
            currency,
            transaction_date,
            narration: first_string(raw, NARRATION_FIELDS),
            txn_type: first_string(raw, TXN_TYPE_FIELDS),
            raw: raw.clone(),
        }
    }
}

/// Parse an amount from a JSON number or a string like `"1,250.50"`.
#[must_use]
pub fn parse_amount(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().replace([',', ' '], ""),
        _ => return None,
    };
    if text.is_empty() {
        return None;
    }
    text.parse::<Decimal>()
        .ok()
        .or_else(|| Decimal::from_scientific(&text).ok())
}

/// First non-empty string (or number, stringified) among `fields`.
#[must_use]
pub fn first_string(value: &Value, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|field| match value.get(*field)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn grouped() -> Value {
        json!({
            "id": "sess-1",
            "status": "COMPLETED",
            "fips": [{
                "fipID": "HDFC-FIP",
                "accounts": [{
                    "linkRefNumber": "ref-1",
                    "maskedAccNumber": "XXXX1234",
                    "data": { "account": {
                        "type": "deposit",
                        "summary": { "currency": "INR", "type": "SAVINGS", "currentBalance": "100.00" },
                        "profile": { "holders": { "holder": { "name": "A" } } },
                        "transactions": { "transaction": [
                            { "txnId": "TXN100", "amount": "1,250.50", "type": "CREDIT",
                              "valueDate": "2025-01-02", "narration": "salary" }
                        ] }
                    } }
                }]
            }]
        })
    }

    fn flat() -> Value {
        json!({
            "accounts": [{
                "fipId": "HDFC-FIP",
                "linkRefNumber": "ref-1",
                "maskedAccNumber": "XXXX1234",
                "account": {
                    "type": "deposit",
                    "summary": { "currency": "INR", "type": "SAVINGS", "currentBalance": "100.00" },
                    "profile": { "holders": { "holder": { "name": "A" } } },
                    "transactions": [
                        { "txnId": "TXN100", "amount": "1,250.50", "type": "CREDIT",
                          "valueDate": "2025-01-02", "narration": "salary" }
                    ]
                }
            }]
        })
    }

    #[test]
    fn both_shapes_flatten_to_the_same_account() {
        let a = flatten_payload(&grouped());
        let b = flatten_payload(&flat());
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(a[0].account_ref, b[0].account_ref);
        assert_eq!(a[0].masked_number, b[0].masked_number);
        assert_eq!(a[0].bank_name.as_deref(), Some("HDFC-FIP"));
        assert_eq!(a[0].bank_name, b[0].bank_name);
        assert_eq!(a[0].account_type.as_deref(), Some("deposit"));
        assert_eq!(a[0].metadata(), b[0].metadata());
        assert_eq!(a[0].transactions, b[0].transactions);
    }

    #[test]
    fn bare_array_of_groups_is_accepted() {
        let payload = grouped()["fips"].clone();
        let accounts = flatten_payload(&payload);
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].bank_name.as_deref(), Some("HDFC-FIP"));
    }

    #[test]
    fn unknown_payload_yields_nothing() {
        assert!(flatten_payload(&json!({"status": "PENDING"})).is_empty());
        assert!(flatten_payload(&Value::Null).is_empty());
    }

    #[test]
    fn single_transaction_object_is_wrapped() {
        let payload = json!({"accounts": [{
            "linkRefNumber": "r",
            "transactions": { "transaction": { "txnId": "T1", "amount": 5 } }
        }]});
        let accounts = flatten_payload(&payload);
        assert_eq!(accounts[0].transactions.len(), 1);
    }

    #[test]
    fn transaction_fields_follow_precedence() {
        let raw = json!({
            "transactionId": "second",
            "txnId": "first",
            "txnAmount": "-99.5",
            "transactionTimestamp": "not a date",
            "valueDate": "2025-03-04",
            "remarks": "atm",
            "mode": "CARD"
        });
        let txn = CanonicalTransaction::from_raw(&raw, Some("USD"));
        assert_eq!(txn.reference.as_deref(), Some("first"));
        assert_eq!(txn.amount, "-99.5".parse::<Decimal>().unwrap());
        assert_eq!(
            txn.transaction_date,
            Some(Utc.with_ymd_and_hms(2025, 3, 4, 0, 0, 0).unwrap())
        );
        assert_eq!(txn.narration.as_deref(), Some("atm"));
        assert_eq!(txn.currency, "USD");
        assert_eq!(txn.txn_type, None);
    }

    #[test]
    fn unparseable_values_degrade_gracefully() {
        let txn = CanonicalTransaction::from_raw(&json!({"amount": "n/a", "date": "??"}), None);
        assert_eq!(txn.amount, Decimal::ZERO);
        assert_eq!(txn.transaction_date, None);
        assert_eq!(txn.reference, None);
        assert_eq!(txn.currency, DEFAULT_CURRENCY);
    }

    #[test]
    fn amounts_from_numbers_and_strings() {
        assert_eq!(parse_amount(&json!(12.5)), Some("12.5".parse().unwrap()));
        assert_eq!(parse_amount(&json!("1,000")), Some(Decimal::from(1000)));
        assert_eq!(parse_amount(&json!("")), None);
        assert_eq!(parse_amount(&json!(null)), None);
    }
}
