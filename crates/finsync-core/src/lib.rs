//! Core types for finsync.
//!
//! This crate provides the domain model behind Account Aggregator account
//! linking:
//!
//! - **Identifiers**: `UserId`, `ConsentId`, `DataSessionId`, `AccountId`, `TransactionId`
//! - **Consents**: `Consent`, `ConsentStatus`, `ConsentEvent`, `FetchType`, `DateRange`
//! - **Data sessions**: `DataSession`, `SessionStatus`, `SessionEvent`
//! - **Accounts**: `Account`, `Transaction`, `Direction`
//! - **FI data**: `flatten_payload`, `FiAccount`, `CanonicalTransaction`
//! - **Notifications**: `Notification`, `NotificationKind`, `WebhookEvent`
//!
//! Status changes go through explicit transition functions
//! (`ConsentStatus::apply`, `SessionStatus::apply`); callers never compare
//! status strings.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod consent;
pub mod error;
pub mod fi;
pub mod ids;
pub mod notification;
pub mod session;

pub use account::{Account, Direction, Transaction, DEFAULT_CURRENCY};
pub use consent::{
    parse_timestamp, Consent, ConsentEvent, ConsentStatus, DateRange, FetchType,
    DEFAULT_LOOKBACK_MONTHS,
};
pub use error::{Result, SyncError, TransitionError};
pub use fi::{flatten_payload, CanonicalTransaction, FiAccount};
pub use ids::{AccountId, ConsentId, DataSessionId, IdError, TransactionId, UserId};
pub use notification::{LinkedAccount, Notification, NotificationKind, WebhookEvent};
pub use session::{provider_session_event, DataSession, SessionEvent, SessionStatus};
