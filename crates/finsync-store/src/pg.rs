//! `PostgreSQL` storage implementation.
//!
//! Every call checks a connection out of the pool for the duration of its
//! statements; the guard returns it on drop, on success and on error alike.
//! Multi-statement writes run inside one transaction, which rolls back when
//! dropped uncommitted.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use finsync_core::{
    Account, AccountId, Consent, ConsentId, ConsentStatus, DataSession, DataSessionId, DateRange,
    FetchType, Transaction, TransactionId, UserId, WebhookEvent,
};

use crate::error::{Result, StoreError};
use crate::{CleanupCounts, Store};

const CONSENT_COLUMNS: &str = "consent_id, user_id, status, fetch_type, date_from, date_to, \
     purpose, vua, redirect_url, raw, created_at, updated_at";

const SESSION_COLUMNS: &str = "id, session_id, consent_id, status, exclusive, date_from, \
     date_to, raw, error, ready_at, fetched_at, created_at, updated_at";

const ACCOUNT_COLUMNS: &str = "id, user_id, consent_id, account_ref, masked_number, bank_name, \
     account_type, currency, metadata, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, account_id, reference, amount, currency, \
     transaction_date, narration, txn_type, raw, created_at";

/// PostgreSQL-backed storage implementation.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a bounded pool to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if no connection can be established.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        tracing::info!(max_connections, "PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    /// Apply the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn row_to_consent(row: &PgRow) -> Result<Consent> {
    let status: String = row.try_get("status")?;
    let fetch_type: String = row.try_get("fetch_type")?;
    Ok(Consent {
        consent_id: ConsentId::new(row.try_get::<String, _>("consent_id")?)?,
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        status: ConsentStatus::from_provider(&status),
        fetch_type: fetch_type.parse::<FetchType>()?,
        date_range: DateRange {
            from: row.try_get("date_from")?,
            to: row.try_get("date_to")?,
        },
        purpose: row.try_get("purpose")?,
        vua: row.try_get("vua")?,
        redirect_url: row.try_get("redirect_url")?,
        raw: row.try_get("raw")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_session(row: &PgRow) -> Result<DataSession> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    Ok(DataSession {
        id: id.parse::<DataSessionId>()?,
        session_id: row.try_get("session_id")?,
        consent_id: ConsentId::new(row.try_get::<String, _>("consent_id")?)?,
        status: status.parse()?,
        exclusive: row.try_get("exclusive")?,
        date_range: DateRange {
            from: row.try_get("date_from")?,
            to: row.try_get("date_to")?,
        },
        raw: row.try_get("raw")?,
        error: row.try_get("error")?,
        ready_at: row.try_get("ready_at")?,
        fetched_at: row.try_get("fetched_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_account(row: &PgRow) -> Result<Account> {
    Ok(Account {
        id: AccountId::from_uuid(row.try_get("id")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        consent_id: ConsentId::new(row.try_get::<String, _>("consent_id")?)?,
        account_ref: row.try_get("account_ref")?,
        masked_number: row.try_get("masked_number")?,
        bank_name: row.try_get("bank_name")?,
        account_type: row.try_get("account_type")?,
        currency: row.try_get("currency")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_transaction(row: &PgRow) -> Result<Transaction> {
    Ok(Transaction {
        id: TransactionId::from_uuid(row.try_get("id")?),
        account_id: AccountId::from_uuid(row.try_get("account_id")?),
        reference: row.try_get("reference")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        transaction_date: row.try_get("transaction_date")?,
        narration: row.try_get("narration")?,
        txn_type: row.try_get("txn_type")?,
        raw: row.try_get("raw")?,
        created_at: row.try_get("created_at")?,
    })
}

fn collect<T>(rows: &[PgRow], map: fn(&PgRow) -> Result<T>) -> Result<Vec<T>> {
    rows.iter().map(map).collect()
}

fn page(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[async_trait]
impl Store for PgStore {
    // =========================================================================
    // Consent Operations
    // =========================================================================

    async fn upsert_consent(&self, consent: &Consent) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO consents
                (consent_id, user_id, status, fetch_type, date_from, date_to,
                 purpose, vua, redirect_url, raw, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (consent_id) DO UPDATE SET
                status = EXCLUDED.status,
                fetch_type = EXCLUDED.fetch_type,
                date_from = EXCLUDED.date_from,
                date_to = EXCLUDED.date_to,
                purpose = EXCLUDED.purpose,
                vua = EXCLUDED.vua,
                redirect_url = EXCLUDED.redirect_url,
                raw = EXCLUDED.raw,
                updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(consent.consent_id.as_str())
        .bind(consent.user_id.as_uuid())
        .bind(consent.status.as_str())
        .bind(consent.fetch_type.as_str())
        .bind(consent.date_range.from)
        .bind(consent.date_range.to)
        .bind(&consent.purpose)
        .bind(&consent.vua)
        .bind(&consent.redirect_url)
        .bind(&consent.raw)
        .bind(consent.created_at)
        .bind(consent.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_consent(&self, consent_id: &ConsentId) -> Result<Option<Consent>> {
        let row = sqlx::query(&format!(
            "SELECT {CONSENT_COLUMNS} FROM consents WHERE consent_id = $1"
        ))
        .bind(consent_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_consent).transpose()
    }

    async fn list_consents_by_user(&self, user_id: &UserId) -> Result<Vec<Consent>> {
        let rows = sqlx::query(&format!(
            "SELECT {CONSENT_COLUMNS} FROM consents WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        collect(&rows, row_to_consent)
    }

    async fn update_consent_status(
        &self,
        consent_id: &ConsentId,
        status: &ConsentStatus,
        raw: &Value,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE consents SET status = $1, raw = $2, updated_at = NOW() WHERE consent_id = $3",
        )
        .bind(status.as_str())
        .bind(raw)
        .bind(consent_id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("consent", consent_id));
        }
        Ok(())
    }

    // =========================================================================
    // Account Operations
    // =========================================================================

    async fn find_account_by_ref(
        &self,
        consent_id: &ConsentId,
        account_ref: &str,
    ) -> Result<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE consent_id = $1 AND account_ref = $2"
        ))
        .bind(consent_id.as_str())
        .bind(account_ref)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_account).transpose()
    }

    async fn find_account_by_masked_number(
        &self,
        consent_id: &ConsentId,
        masked_number: &str,
    ) -> Result<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts \
             WHERE consent_id = $1 AND masked_number = $2 \
             ORDER BY created_at ASC LIMIT 1"
        ))
        .bind(consent_id.as_str())
        .bind(masked_number)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_account).transpose()
    }

    async fn put_account(&self, account: &Account) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO accounts
                (id, user_id, consent_id, account_ref, masked_number, bank_name,
                 account_type, currency, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                account_ref = EXCLUDED.account_ref,
                masked_number = EXCLUDED.masked_number,
                bank_name = EXCLUDED.bank_name,
                account_type = EXCLUDED.account_type,
                currency = EXCLUDED.currency,
                metadata = EXCLUDED.metadata,
                updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(account.id.as_uuid())
        .bind(account.user_id.as_uuid())
        .bind(account.consent_id.as_str())
        .bind(&account.account_ref)
        .bind(&account.masked_number)
        .bind(&account.bank_name)
        .bind(&account.account_type)
        .bind(&account.currency)
        .bind(&account.metadata)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(account_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_account).transpose()
    }

    async fn list_accounts_by_user(&self, user_id: &UserId) -> Result<Vec<Account>> {
        let rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = $1 ORDER BY created_at ASC"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        collect(&rows, row_to_account)
    }

    async fn list_accounts_by_consent(&self, consent_id: &ConsentId) -> Result<Vec<Account>> {
        let rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE consent_id = $1 ORDER BY created_at ASC"
        ))
        .bind(consent_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        collect(&rows, row_to_account)
    }

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    async fn has_transaction(&self, account_id: &AccountId, reference: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM transactions WHERE account_id = $1 AND reference = $2)",
        )
        .bind(account_id.as_uuid())
        .bind(reference)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO transactions
                (id, account_id, reference, amount, currency, transaction_date,
                 narration, txn_type, raw, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (account_id, reference) WHERE reference IS NOT NULL DO NOTHING
            ",
        )
        .bind(transaction.id.as_uuid())
        .bind(transaction.account_id.as_uuid())
        .bind(&transaction.reference)
        .bind(transaction.amount)
        .bind(&transaction.currency)
        .bind(transaction.transaction_date)
        .bind(&transaction.narration)
        .bind(&transaction.txn_type)
        .bind(&transaction.raw)
        .bind(transaction.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_transactions_by_account(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE account_id = $1 \
             ORDER BY transaction_date DESC NULLS LAST, created_at DESC \
             LIMIT $2 OFFSET $3"
        ))
        .bind(account_id.as_uuid())
        .bind(page(limit))
        .bind(page(offset))
        .fetch_all(&self.pool)
        .await?;
        collect(&rows, row_to_transaction)
    }

    // =========================================================================
    // Data Session Operations
    // =========================================================================

    async fn reserve_session(&self, session: &DataSession) -> Result<bool> {
        // The partial unique index on live exclusive sessions turns a second
        // ONETIME reservation into a no-op insert.
        let result = sqlx::query(
            r"
            INSERT INTO data_sessions
                (id, session_id, consent_id, status, exclusive, date_from, date_to,
                 raw, error, ready_at, fetched_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT DO NOTHING
            ",
        )
        .bind(session.id.to_string())
        .bind(&session.session_id)
        .bind(session.consent_id.as_str())
        .bind(session.status.as_str())
        .bind(session.exclusive)
        .bind(session.date_range.from)
        .bind(session.date_range.to)
        .bind(&session.raw)
        .bind(&session.error)
        .bind(session.ready_at)
        .bind(session.fetched_at)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn put_session(&self, session: &DataSession) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE data_sessions SET
                session_id = $2, status = $3, date_from = $4, date_to = $5,
                raw = $6, error = $7, ready_at = $8, fetched_at = $9, updated_at = $10
            WHERE id = $1
            ",
        )
        .bind(session.id.to_string())
        .bind(&session.session_id)
        .bind(session.status.as_str())
        .bind(session.date_range.from)
        .bind(session.date_range.to)
        .bind(&session.raw)
        .bind(&session.error)
        .bind(session.ready_at)
        .bind(session.fetched_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("data session", session.id.to_string()));
        }
        Ok(())
    }

    async fn get_session(&self, id: &DataSessionId) -> Result<Option<DataSession>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM data_sessions WHERE id = $1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_session).transpose()
    }

    async fn get_session_by_provider_id(&self, session_id: &str) -> Result<Option<DataSession>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM data_sessions WHERE session_id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_session).transpose()
    }

    async fn list_sessions_by_consent(&self, consent_id: &ConsentId) -> Result<Vec<DataSession>> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM data_sessions WHERE consent_id = $1 ORDER BY id ASC"
        ))
        .bind(consent_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        collect(&rows, row_to_session)
    }

    // =========================================================================
    // Webhook Ledger
    // =========================================================================

    async fn record_webhook_event(&self, event: &WebhookEvent) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO webhook_events (notification_id, event_type, payload, received_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (notification_id) DO NOTHING
            ",
        )
        .bind(&event.notification_id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.received_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Compound Operations
    // =========================================================================

    async fn delete_consent_data(&self, consent_id: &ConsentId) -> Result<CleanupCounts> {
        let mut tx = self.pool.begin().await?;

        let transactions = sqlx::query(
            r"
            DELETE FROM transactions
            WHERE account_id IN (SELECT id FROM accounts WHERE consent_id = $1)
            ",
        )
        .bind(consent_id.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let accounts = sqlx::query("DELETE FROM accounts WHERE consent_id = $1")
            .bind(consent_id.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        Ok(CleanupCounts {
            transactions,
            accounts,
        })
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
