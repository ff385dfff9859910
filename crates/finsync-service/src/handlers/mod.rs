//! API handlers.

pub mod accounts;
pub mod consents;
pub mod health;
pub mod sessions;
pub mod webhooks;
