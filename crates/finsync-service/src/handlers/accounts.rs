//! Linked account handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use finsync_core::{Account, AccountId, Direction, SyncError, Transaction};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Largest page a caller may ask for.
const MAX_PAGE_SIZE: usize = 200;

/// Linked account as returned to its owner.
#[derive(Debug, Serialize)]
pub struct AccountView {
    /// Account id.
    pub id: String,
    /// Consent the account was linked under.
    pub consent_id: String,
    /// Provider account reference.
    pub account_ref: Option<String>,
    /// Masked account number.
    pub masked_number: Option<String>,
    /// Bank / FIP name.
    pub bank_name: Option<String>,
    /// Account type.
    pub account_type: Option<String>,
    /// ISO currency.
    pub currency: String,
    /// Provider metadata (summary, profile).
    pub metadata: serde_json::Value,
    /// Last update.
    pub updated_at: String,
}

impl From<&Account> for AccountView {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id.to_string(),
            consent_id: account.consent_id.to_string(),
            account_ref: account.account_ref.clone(),
            masked_number: account.masked_number.clone(),
            bank_name: account.bank_name.clone(),
            account_type: account.account_type.clone(),
            currency: account.currency.clone(),
            metadata: account.metadata.clone(),
            updated_at: account.updated_at.to_rfc3339(),
        }
    }
}

/// List accounts response.
#[derive(Debug, Serialize)]
pub struct ListAccountsResponse {
    /// Always `true`.
    pub ok: bool,
    /// The caller's linked accounts.
    pub accounts: Vec<AccountView>,
}

/// List the caller's linked accounts.
pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<ListAccountsResponse>, ApiError> {
    let accounts = state.store.list_accounts_by_user(&auth.user_id).await?;

    Ok(Json(ListAccountsResponse {
        ok: true,
        accounts: accounts.iter().map(AccountView::from).collect(),
    }))
}

/// Pagination query.
#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    /// Page size.
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Rows to skip.
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// Transaction with its derived direction.
#[derive(Debug, Serialize)]
pub struct TransactionView {
    /// Transaction id.
    pub id: String,
    /// Provider reference.
    pub reference: Option<String>,
    /// Amount as reported.
    pub amount: Decimal,
    /// ISO currency.
    pub currency: String,
    /// `credit` or `debit`.
    pub direction: Direction,
    /// Transaction date.
    pub transaction_date: Option<String>,
    /// Narration.
    pub narration: Option<String>,
    /// Provider type / category.
    pub txn_type: Option<String>,
}

impl From<&Transaction> for TransactionView {
    fn from(txn: &Transaction) -> Self {
        Self {
            id: txn.id.to_string(),
            reference: txn.reference.clone(),
            amount: txn.amount,
            currency: txn.currency.clone(),
            direction: txn.direction(),
            transaction_date: txn.transaction_date.map(|t| t.to_rfc3339()),
            narration: txn.narration.clone(),
            txn_type: txn.txn_type.clone(),
        }
    }
}

/// List transactions response.
#[derive(Debug, Serialize)]
pub struct ListTransactionsResponse {
    /// Always `true`.
    pub ok: bool,
    /// Transactions (newest first).
    pub transactions: Vec<TransactionView>,
    /// Whether there are more transactions.
    pub has_more: bool,
}

/// List an account's transactions.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(account_id): Path<String>,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<ListTransactionsResponse>, ApiError> {
    let account_id = account_id
        .parse::<AccountId>()
        .map_err(SyncError::from)?;

    state
        .store
        .get_account(&account_id)
        .await?
        .filter(|account| account.user_id == auth.user_id)
        .ok_or_else(|| ApiError::NotFound(format!("account not found: {account_id}")))?;

    // Fetch one more than requested to determine has_more
    let limit = query.limit.clamp(1, MAX_PAGE_SIZE);
    let transactions = state
        .store
        .list_transactions_by_account(&account_id, limit + 1, query.offset)
        .await?;

    let has_more = transactions.len() > limit;
    let transactions = transactions
        .iter()
        .take(limit)
        .map(TransactionView::from)
        .collect();

    Ok(Json(ListTransactionsResponse {
        ok: true,
        transactions,
        has_more,
    }))
}
