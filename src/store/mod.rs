//! Credential store module
//!
//! The auth core only needs two questions answered about an account: do these
//! credentials match, and does this user still exist. Where the accounts live
//! is up to the adapter.

mod memory;
mod postgres;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use subtle::ConstantTimeEq;

use crate::error::StoreError;

pub use memory::{MemoryCredentialStore, StaticCredentialStore};
pub use postgres::PgCredentialStore;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// True when `username` exists and its password equals `password`.
    /// Empty usernames or passwords never verify.
    async fn verify_credentials(&self, username: &str, password: &str) -> Result<bool, StoreError>;

    async fn user_exists(&self, username: &str) -> Result<bool, StoreError>;
}

/// Runs a store call under `limit`, turning an elapsed deadline into
/// [`StoreError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

pub(crate) fn passwords_match(stored: &str, given: &str) -> bool {
    stored.as_bytes().ct_eq(given.as_bytes()).into()
}
