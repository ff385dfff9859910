//! Storage layer for finsync.
//!
//! This crate provides durable storage for consents, data sessions, linked
//! accounts, transactions and the webhook dedup ledger.
//!
//! # Backends
//!
//! - [`PgStore`]: PostgreSQL via `sqlx`, with embedded migrations. Unique
//!   indexes back every idempotency rule (one row per consent id, one
//!   transaction per account + reference, one live session per ONETIME
//!   consent, one ledger row per notification id).
//! - [`MemoryStore`]: in-process tables with the same semantics, for tests
//!   and local runs.
//!
//! Callers hold no authoritative copies: every decision re-reads the row it
//! is about to change.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod pg;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use pg::PgStore;

use async_trait::async_trait;
use serde_json::Value;

use finsync_core::{
    Account, AccountId, Consent, ConsentId, ConsentStatus, DataSession, DataSessionId,
    Transaction, UserId, WebhookEvent,
};

/// Rows removed by [`Store::delete_consent_data`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupCounts {
    /// Transactions deleted.
    pub transactions: u64,
    /// Accounts deleted.
    pub accounts: u64,
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different
/// implementations (`PostgreSQL`, in-memory for testing).
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Consent Operations
    // =========================================================================

    /// Insert a consent, or overwrite every mutable column when the consent
    /// id already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn upsert_consent(&self, consent: &Consent) -> Result<()>;

    /// Get a consent by provider id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_consent(&self, consent_id: &ConsentId) -> Result<Option<Consent>>;

    /// List a user's consents, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_consents_by_user(&self, user_id: &UserId) -> Result<Vec<Consent>>;

    /// Set a consent's status and raw provider payload.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the consent doesn't exist.
    async fn update_consent_status(
        &self,
        consent_id: &ConsentId,
        status: &ConsentStatus,
        raw: &Value,
    ) -> Result<()>;

    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Find the account linked under `consent_id` with this provider reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn find_account_by_ref(
        &self,
        consent_id: &ConsentId,
        account_ref: &str,
    ) -> Result<Option<Account>>;

    /// Find the account linked under `consent_id` with this masked number.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn find_account_by_masked_number(
        &self,
        consent_id: &ConsentId,
        masked_number: &str,
    ) -> Result<Option<Account>>;

    /// Insert or update an account row, keyed by its id.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if another row already holds the
    /// (consent, reference) pair.
    async fn put_account(&self, account: &Account) -> Result<()>;

    /// Get an account by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>>;

    /// List a user's accounts.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_accounts_by_user(&self, user_id: &UserId) -> Result<Vec<Account>>;

    /// List the accounts linked under a consent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_accounts_by_consent(&self, consent_id: &ConsentId) -> Result<Vec<Account>>;

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    /// Check whether an account already holds a transaction with `reference`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn has_transaction(&self, account_id: &AccountId, reference: &str) -> Result<bool>;

    /// Insert a transaction.
    ///
    /// Returns `false` (and writes nothing) when the account already holds a
    /// transaction with the same reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_transaction(&self, transaction: &Transaction) -> Result<bool>;

    /// List an account's transactions, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_transactions_by_account(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>>;

    // =========================================================================
    // Data Session Operations
    // =========================================================================

    /// Insert a freshly reserved session.
    ///
    /// For an exclusive session the insert only happens when the consent has
    /// no live (`PENDING`/`READY`/`FETCHED`) exclusive session; returns
    /// `false` otherwise. Non-exclusive sessions are always inserted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn reserve_session(&self, session: &DataSession) -> Result<bool>;

    /// Overwrite a session row.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the session doesn't exist.
    async fn put_session(&self, session: &DataSession) -> Result<()>;

    /// Get a session by internal id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_session(&self, id: &DataSessionId) -> Result<Option<DataSession>>;

    /// Get a session by provider session id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_session_by_provider_id(&self, session_id: &str) -> Result<Option<DataSession>>;

    /// List a consent's sessions, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_sessions_by_consent(&self, consent_id: &ConsentId) -> Result<Vec<DataSession>>;

    // =========================================================================
    // Webhook Ledger
    // =========================================================================

    /// Record a notification in the dedup ledger.
    ///
    /// Returns `false` when the notification id was already recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn record_webhook_event(&self, event: &WebhookEvent) -> Result<bool>;

    // =========================================================================
    // Compound Operations
    // =========================================================================

    /// Delete every transaction and account linked under a consent, atomically.
    ///
    /// The consent row itself is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails; nothing is deleted
    /// in that case.
    async fn delete_consent_data(&self, consent_id: &ConsentId) -> Result<CleanupCounts>;

    /// Check the backend is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be reached.
    async fn ping(&self) -> Result<()>;
}
