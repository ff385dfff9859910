//! FI data persistence.
//!
//! A fetched payload is flattened into per-account records, each account is
//! matched to a stored row (by reference, then masked number) or created,
//! and its transactions are inserted unless the account already holds one
//! with the same reference. Every account is processed independently: the
//! outcome of each is captured in an [`IngestReport`] so one malformed
//! account never stops its siblings.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use finsync_core::{
    flatten_payload, Account, AccountId, CanonicalTransaction, Consent, FiAccount, LinkedAccount,
    Transaction, TransactionId,
};
use finsync_store::{Store, StoreError};

/// Outcome of ingesting one payload.
#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestReport {
    /// One entry per account in the payload, in payload order.
    pub accounts: Vec<AccountOutcome>,
}

impl IngestReport {
    /// Transactions newly inserted across all accounts.
    #[must_use]
    pub fn inserted(&self) -> usize {
        self.accounts
            .iter()
            .filter_map(|a| a.stats.as_ref())
            .map(|s| s.inserted)
            .sum()
    }

    /// Transactions skipped as already stored.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.accounts
            .iter()
            .filter_map(|a| a.stats.as_ref())
            .map(|s| s.skipped)
            .sum()
    }

    /// Accounts that failed to ingest.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.accounts.iter().filter(|a| a.error.is_some()).count()
    }
}

/// Outcome for a single account.
#[derive(Debug, Clone, Serialize)]
pub struct AccountOutcome {
    /// Provider reference, if the payload had one.
    pub account_ref: Option<String>,
    /// Masked number, if the payload had one.
    pub masked_number: Option<String>,
    /// Counts when the account was ingested.
    pub stats: Option<AccountStats>,
    /// Failure message otherwise.
    pub error: Option<String>,
}

/// Per-account counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccountStats {
    /// Account row the data landed in.
    pub account_id: AccountId,
    /// Transactions inserted.
    pub inserted: usize,
    /// Transactions already present.
    pub skipped: usize,
}

/// Persist every account and transaction in `payload` under `consent`.
pub async fn ingest_payload(store: &dyn Store, consent: &Consent, payload: &Value) -> IngestReport {
    let mut report = IngestReport::default();

    for fi in flatten_payload(payload) {
        let result = ingest_account(store, consent, &fi).await;
        let (stats, error) = match result {
            Ok(stats) => (Some(stats), None),
            Err(e) => {
                tracing::error!(
                    consent_id = %consent.consent_id,
                    account_ref = ?fi.account_ref,
                    error = %e,
                    "Failed to ingest account"
                );
                (None, Some(e.to_string()))
            }
        };
        report.accounts.push(AccountOutcome {
            account_ref: fi.account_ref,
            masked_number: fi.masked_number,
            stats,
            error,
        });
    }

    tracing::info!(
        consent_id = %consent.consent_id,
        accounts = report.accounts.len(),
        inserted = report.inserted(),
        skipped = report.skipped(),
        failures = report.failures(),
        "FI data ingested"
    );
    report
}

async fn ingest_account(
    store: &dyn Store,
    consent: &Consent,
    fi: &FiAccount,
) -> Result<AccountStats, StoreError> {
    let mut account = resolve_account(
        store,
        consent,
        fi.account_ref.as_deref(),
        fi.masked_number.as_deref(),
    )
    .await?;

    if fi.account_ref.is_some() {
        account.account_ref.clone_from(&fi.account_ref);
    }
    if fi.masked_number.is_some() {
        account.masked_number.clone_from(&fi.masked_number);
    }
    if fi.bank_name.is_some() {
        account.bank_name.clone_from(&fi.bank_name);
    }
    if fi.account_type.is_some() {
        account.account_type.clone_from(&fi.account_type);
    }
    if let Some(currency) = &fi.currency {
        account.currency.clone_from(currency);
    }
    account.metadata = fi.metadata();
    account.updated_at = Utc::now();
    store.put_account(&account).await?;

    let mut stats = AccountStats {
        account_id: account.id,
        inserted: 0,
        skipped: 0,
    };

    for raw in &fi.transactions {
        let canonical = CanonicalTransaction::from_raw(raw, Some(account.currency.as_str()));
        if let Some(reference) = &canonical.reference {
            if store.has_transaction(&account.id, reference).await? {
                stats.skipped += 1;
                continue;
            }
        }

        let transaction = Transaction {
            id: TransactionId::generate(),
            account_id: account.id,
            reference: canonical.reference,
            amount: canonical.amount,
            currency: canonical.currency,
            transaction_date: canonical.transaction_date,
            narration: canonical.narration,
            txn_type: canonical.txn_type,
            raw: canonical.raw,
            created_at: Utc::now(),
        };
        // The unique index still guards a concurrent insert of the same reference.
        if store.insert_transaction(&transaction).await? {
            stats.inserted += 1;
        } else {
            stats.skipped += 1;
        }
    }

    Ok(stats)
}

/// Find the stored account for a payload account, or a new unsaved row.
///
/// Matches on (consent, reference) first, then (consent, masked number).
/// The masked-number match only applies when the payload has no reference
/// or the stored row has none yet.
///
/// # Errors
///
/// Returns an error if a lookup fails.
pub async fn resolve_account(
    store: &dyn Store,
    consent: &Consent,
    account_ref: Option<&str>,
    masked_number: Option<&str>,
) -> Result<Account, StoreError> {
    if let Some(reference) = account_ref {
        if let Some(account) = store.find_account_by_ref(&consent.consent_id, reference).await? {
            return Ok(account);
        }
    }
    if let Some(masked) = masked_number {
        if let Some(account) = store
            .find_account_by_masked_number(&consent.consent_id, masked)
            .await?
        {
            // Masked numbers repeat across banks; never adopt a row that
            // already belongs to a different provider reference.
            if account_ref.is_none() || account.account_ref.is_none() {
                return Ok(account);
            }
        }
    }

    Ok(Account::new(consent.user_id, consent.consent_id.clone()))
}

/// Upsert the accounts announced in a consent approval.
///
/// Returns one outcome per account, like [`ingest_payload`], without
/// transaction counts.
pub async fn upsert_linked_accounts(
    store: &dyn Store,
    consent: &Consent,
    linked: &[LinkedAccount],
) -> Vec<AccountOutcome> {
    let mut outcomes = Vec::with_capacity(linked.len());

    for entry in linked {
        let result = upsert_linked_account(store, consent, entry).await;
        let (stats, error) = match result {
            Ok(account_id) => (
                Some(AccountStats {
                    account_id,
                    inserted: 0,
                    skipped: 0,
                }),
                None,
            ),
            Err(e) => {
                tracing::error!(
                    consent_id = %consent.consent_id,
                    account_ref = ?entry.account_ref,
                    error = %e,
                    "Failed to link account"
                );
                (None, Some(e.to_string()))
            }
        };
        outcomes.push(AccountOutcome {
            account_ref: entry.account_ref.clone(),
            masked_number: entry.masked_number.clone(),
            stats,
            error,
        });
    }

    outcomes
}

async fn upsert_linked_account(
    store: &dyn Store,
    consent: &Consent,
    entry: &LinkedAccount,
) -> Result<AccountId, StoreError> {
    let mut account = resolve_account(
        store,
        consent,
        entry.account_ref.as_deref(),
        entry.masked_number.as_deref(),
    )
    .await?;

    if entry.account_ref.is_some() {
        account.account_ref.clone_from(&entry.account_ref);
    }
    if entry.masked_number.is_some() {
        account.masked_number.clone_from(&entry.masked_number);
    }
    if entry.bank_name.is_some() {
        account.bank_name.clone_from(&entry.bank_name);
    }
    if entry.account_type.is_some() {
        account.account_type.clone_from(&entry.account_type);
    }
    account.metadata = entry.raw.clone();
    account.updated_at = Utc::now();

    store.put_account(&account).await?;
    tracing::debug!(
        consent_id = %consent.consent_id,
        account_id = %account.id,
        "Linked account recorded"
    );
    Ok(account.id)
}
