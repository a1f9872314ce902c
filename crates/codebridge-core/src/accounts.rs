//! Collaborator contracts for identity and account lookup.
//!
//! The relay core never stores credentials or accounts itself. The embedding
//! server supplies an [`IdentityVerifier`] for listener admission and an
//! [`AccountStore`] for validating pushes.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::{AccountStoreError, VerifyError};
use crate::types::AccountId;

/// Turns an opaque identity token into the account it was issued for.
///
/// Must be free of side effects observable by the registry.
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<AccountId, VerifyError>;
}

/// Account existence lookup used before any registry access.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn exists(&self, account: &AccountId) -> Result<bool, AccountStoreError>;
}

/// In-memory account store.
///
/// Suitable for single-node deployments where the account list comes from
/// configuration. The set is fixed at construction.
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    accounts: HashSet<AccountId>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<A: Into<AccountId>> FromIterator<A> for InMemoryAccountStore {
    fn from_iter<I: IntoIterator<Item = A>>(accounts: I) -> Self {
        Self {
            accounts: accounts.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn exists(&self, account: &AccountId) -> Result<bool, AccountStoreError> {
        Ok(self.accounts.contains(account))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store_lookup() {
        let store: InMemoryAccountStore = ["alice", "bob"].into_iter().collect();

        assert!(store.exists(&AccountId::from("alice")).await.unwrap());
        assert!(!store.exists(&AccountId::from("carol")).await.unwrap());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_store_rejects_everyone() {
        let store = InMemoryAccountStore::new();

        assert!(store.is_empty());
        assert!(!store.exists(&AccountId::from("alice")).await.unwrap());
    }

    #[test]
    fn test_duplicate_accounts_collapse() {
        let store: InMemoryAccountStore = ["alice", "alice", "bob"].into_iter().collect();

        assert_eq!(store.len(), 2);
    }
}
