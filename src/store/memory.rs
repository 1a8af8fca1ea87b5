use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{passwords_match, CredentialStore};
use crate::error::StoreError;

/// A single account fixed at startup.
pub struct StaticCredentialStore {
    username: String,
    password: String,
}

impl StaticCredentialStore {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

#[async_trait]
impl CredentialStore for StaticCredentialStore {
    async fn verify_credentials(&self, username: &str, password: &str) -> Result<bool, StoreError> {
        if username.is_empty() || password.is_empty() {
            return Ok(false);
        }
        Ok(username == self.username && passwords_match(&self.password, password))
    }

    async fn user_exists(&self, username: &str) -> Result<bool, StoreError> {
        Ok(!username.is_empty() && username == self.username)
    }
}

/// Process-local account table. Removing an account invalidates every token
/// issued to it at the next verification.
#[derive(Default)]
pub struct MemoryCredentialStore {
    accounts: RwLock<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts<I, U, P>(accounts: I) -> Self
    where
        I: IntoIterator<Item = (U, P)>,
        U: Into<String>,
        P: Into<String>,
    {
        let accounts = accounts
            .into_iter()
            .map(|(u, p)| (u.into(), p.into()))
            .collect();
        Self {
            accounts: RwLock::new(accounts),
        }
    }

    pub async fn insert(&self, username: impl Into<String>, password: impl Into<String>) {
        self.accounts.write().await.insert(username.into(), password.into());
    }

    pub async fn remove(&self, username: &str) -> bool {
        self.accounts.write().await.remove(username).is_some()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn verify_credentials(&self, username: &str, password: &str) -> Result<bool, StoreError> {
        if username.is_empty() || password.is_empty() {
            return Ok(false);
        }
        let accounts = self.accounts.read().await;
        Ok(accounts
            .get(username)
            .is_some_and(|stored| passwords_match(stored, password)))
    }

    async fn user_exists(&self, username: &str) -> Result<bool, StoreError> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(username).is_some_and(|stored| !stored.is_empty()))
    }
}
