//! In-memory storage implementation.
//!
//! All tables sit behind one lock, so each trait call is atomic with respect
//! to every other call, matching the transactional guarantees of [`PgStore`].
//!
//! [`PgStore`]: crate::PgStore

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use finsync_core::{
    Account, AccountId, Consent, ConsentId, ConsentStatus, DataSession, DataSessionId,
    Transaction, TransactionId, UserId, WebhookEvent,
};

use crate::error::{Result, StoreError};
use crate::{CleanupCounts, Store};

#[derive(Debug, Default)]
struct Tables {
    consents: HashMap<ConsentId, Consent>,
    accounts: HashMap<AccountId, Account>,
    transactions: HashMap<TransactionId, Transaction>,
    // Ordered by ULID, so iteration is creation order.
    sessions: BTreeMap<DataSessionId, DataSession>,
    webhook_events: HashMap<String, WebhookEvent>,
}

/// Storage backed by in-process maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored transactions across all accounts.
    pub async fn transaction_count(&self) -> usize {
        self.tables.read().await.transactions.len()
    }

    /// Number of recorded webhook notifications.
    pub async fn webhook_event_count(&self) -> usize {
        self.tables.read().await.webhook_events.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_consent(&self, consent: &Consent) -> Result<()> {
        let mut tables = self.tables.write().await;
        let row = match tables.consents.get(&consent.consent_id) {
            Some(existing) => Consent {
                created_at: existing.created_at,
                user_id: existing.user_id,
                ..consent.clone()
            },
            None => consent.clone(),
        };
        tables.consents.insert(consent.consent_id.clone(), row);
        Ok(())
    }

    async fn get_consent(&self, consent_id: &ConsentId) -> Result<Option<Consent>> {
        Ok(self.tables.read().await.consents.get(consent_id).cloned())
    }

    async fn list_consents_by_user(&self, user_id: &UserId) -> Result<Vec<Consent>> {
        let tables = self.tables.read().await;
        let mut consents: Vec<Consent> = tables
            .consents
            .values()
            .filter(|c| &c.user_id == user_id)
            .cloned()
            .collect();
        consents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(consents)
    }

    async fn update_consent_status(
        &self,
        consent_id: &ConsentId,
        status: &ConsentStatus,
        raw: &Value,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let consent = tables
            .consents
            .get_mut(consent_id)
            .ok_or_else(|| StoreError::not_found("consent", consent_id))?;
        consent.status = status.clone();
        consent.raw = raw.clone();
        consent.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn find_account_by_ref(
        &self,
        consent_id: &ConsentId,
        account_ref: &str,
    ) -> Result<Option<Account>> {
        let tables = self.tables.read().await;
        Ok(tables
            .accounts
            .values()
            .find(|a| &a.consent_id == consent_id && a.account_ref.as_deref() == Some(account_ref))
            .cloned())
    }

    async fn find_account_by_masked_number(
        &self,
        consent_id: &ConsentId,
        masked_number: &str,
    ) -> Result<Option<Account>> {
        let tables = self.tables.read().await;
        Ok(tables
            .accounts
            .values()
            .filter(|a| {
                &a.consent_id == consent_id && a.masked_number.as_deref() == Some(masked_number)
            })
            .min_by_key(|a| a.created_at)
            .cloned())
    }

    async fn put_account(&self, account: &Account) -> Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(reference) = &account.account_ref {
            let taken = tables.accounts.values().any(|a| {
                a.id != account.id
                    && a.consent_id == account.consent_id
                    && a.account_ref.as_ref() == Some(reference)
            });
            if taken {
                return Err(StoreError::Conflict(format!(
                    "account {reference} already linked under consent {}",
                    account.consent_id
                )));
            }
        }
        tables.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        Ok(self.tables.read().await.accounts.get(account_id).cloned())
    }

    async fn list_accounts_by_user(&self, user_id: &UserId) -> Result<Vec<Account>> {
        let tables = self.tables.read().await;
        let mut accounts: Vec<Account> = tables
            .accounts
            .values()
            .filter(|a| &a.user_id == user_id)
            .cloned()
            .collect();
        accounts.sort_by_key(|a| a.created_at);
        Ok(accounts)
    }

    async fn list_accounts_by_consent(&self, consent_id: &ConsentId) -> Result<Vec<Account>> {
        let tables = self.tables.read().await;
        let mut accounts: Vec<Account> = tables
            .accounts
            .values()
            .filter(|a| &a.consent_id == consent_id)
            .cloned()
            .collect();
        accounts.sort_by_key(|a| a.created_at);
        Ok(accounts)
    }

    async fn has_transaction(&self, account_id: &AccountId, reference: &str) -> Result<bool> {
        let tables = self.tables.read().await;
        Ok(tables
            .transactions
            .values()
            .any(|t| &t.account_id == account_id && t.reference.as_deref() == Some(reference)))
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<bool> {
        let mut tables = self.tables.write().await;
        if let Some(reference) = &transaction.reference {
            let duplicate = tables.transactions.values().any(|t| {
                t.account_id == transaction.account_id && t.reference.as_ref() == Some(reference)
            });
            if duplicate {
                return Ok(false);
            }
        }
        tables
            .transactions
            .insert(transaction.id, transaction.clone());
        Ok(true)
    }

    async fn list_transactions_by_account(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>> {
        let tables = self.tables.read().await;
        let mut transactions: Vec<Transaction> = tables
            .transactions
            .values()
            .filter(|t| &t.account_id == account_id)
            .cloned()
            .collect();
        // Newest first, undated rows last.
        transactions.sort_by(|a, b| match (a.transaction_date, b.transaction_date) {
            (Some(x), Some(y)) => y.cmp(&x).then(b.created_at.cmp(&a.created_at)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => b.created_at.cmp(&a.created_at),
        });
        Ok(transactions.into_iter().skip(offset).take(limit).collect())
    }

    async fn reserve_session(&self, session: &DataSession) -> Result<bool> {
        let mut tables = self.tables.write().await;
        if session.exclusive {
            let held = tables.sessions.values().any(|s| {
                s.consent_id == session.consent_id && s.exclusive && s.status.is_live()
            });
            if held {
                return Ok(false);
            }
        }
        if let Some(provider_id) = &session.session_id {
            if tables
                .sessions
                .values()
                .any(|s| s.session_id.as_ref() == Some(provider_id))
            {
                return Err(StoreError::Conflict(format!(
                    "provider session {provider_id} already recorded"
                )));
            }
        }
        tables.sessions.insert(session.id, session.clone());
        Ok(true)
    }

    async fn put_session(&self, session: &DataSession) -> Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(provider_id) = session.session_id.as_deref() {
            let taken = tables
                .sessions
                .values()
                .any(|s| s.id != session.id && s.session_id.as_deref() == Some(provider_id));
            if taken {
                return Err(StoreError::Conflict(format!(
                    "provider session {provider_id} already recorded"
                )));
            }
        }
        let row = tables
            .sessions
            .get_mut(&session.id)
            .ok_or_else(|| StoreError::not_found("data session", session.id.to_string()))?;
        *row = session.clone();
        Ok(())
    }

    async fn get_session(&self, id: &DataSessionId) -> Result<Option<DataSession>> {
        Ok(self.tables.read().await.sessions.get(id).cloned())
    }

    async fn get_session_by_provider_id(&self, session_id: &str) -> Result<Option<DataSession>> {
        let tables = self.tables.read().await;
        Ok(tables
            .sessions
            .values()
            .find(|s| s.session_id.as_deref() == Some(session_id))
            .cloned())
    }

    async fn list_sessions_by_consent(&self, consent_id: &ConsentId) -> Result<Vec<DataSession>> {
        let tables = self.tables.read().await;
        Ok(tables
            .sessions
            .values()
            .filter(|s| &s.consent_id == consent_id)
            .cloned()
            .collect())
    }

    async fn record_webhook_event(&self, event: &WebhookEvent) -> Result<bool> {
        let mut tables = self.tables.write().await;
        if tables.webhook_events.contains_key(&event.notification_id) {
            return Ok(false);
        }
        tables
            .webhook_events
            .insert(event.notification_id.clone(), event.clone());
        Ok(true)
    }

    async fn delete_consent_data(&self, consent_id: &ConsentId) -> Result<CleanupCounts> {
        let mut tables = self.tables.write().await;
        let account_ids: Vec<AccountId> = tables
            .accounts
            .values()
            .filter(|a| &a.consent_id == consent_id)
            .map(|a| a.id)
            .collect();

        let before = tables.transactions.len();
        tables
            .transactions
            .retain(|_, t| !account_ids.contains(&t.account_id));
        let transactions = (before - tables.transactions.len()) as u64;

        for id in &account_ids {
            tables.accounts.remove(id);
        }

        Ok(CleanupCounts {
            transactions,
            accounts: account_ids.len() as u64,
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
