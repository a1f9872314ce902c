//! Delivery service for inbound verification code pushes.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::accounts::AccountStore;
use crate::error::PushError;
use crate::registry::{ConnectionRegistry, DeliveryOutcome};
use crate::types::{AccountId, ListenerId};

/// An inbound push as received from the phone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushRequest {
    pub code: Option<String>,
    /// Listener to prefer; every listener receives the code if it is offline.
    pub device_id: Option<String>,
}

impl PushRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            device_id: None,
        }
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }
}

/// Validates pushes and hands them to the [`ConnectionRegistry`].
#[derive(Clone)]
pub struct DeliveryService {
    registry: Arc<ConnectionRegistry>,
    accounts: Arc<dyn AccountStore>,
}

impl DeliveryService {
    pub fn new(registry: Arc<ConnectionRegistry>, accounts: Arc<dyn AccountStore>) -> Self {
        Self { registry, accounts }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Validate a push and deliver it.
    ///
    /// The account is checked first; an unknown account is rejected without
    /// touching the registry. An absent or empty code is rejected next. An
    /// empty `device_id` counts as no target.
    ///
    /// `Ok(DeliveryOutcome::NoListeners)` is a normal result: the phone often
    /// pushes before any browser is listening.
    #[instrument(skip(self, request), fields(account = %account))]
    pub async fn push(
        &self,
        account: &str,
        request: PushRequest,
    ) -> Result<DeliveryOutcome, PushError> {
        let account = AccountId::from(account);

        if !self.accounts.exists(&account).await? {
            warn!("Push rejected: unknown account");
            return Err(PushError::UnknownAccount(account));
        }

        let code = match request.code {
            Some(code) if !code.is_empty() => code,
            _ => {
                warn!("Push rejected: code missing");
                return Err(PushError::CodeRequired);
            }
        };

        let target = request
            .device_id
            .filter(|device| !device.is_empty())
            .map(ListenerId::from);

        let outcome = self.registry.deliver(&account, &code, target.as_ref()).await;
        match outcome {
            DeliveryOutcome::Delivered { count } => {
                info!(count, "Verification code pushed to listeners")
            }
            DeliveryOutcome::NoListeners => debug!("Push accepted but no listener is connected"),
        }
        Ok(outcome)
    }
}

impl fmt::Debug for DeliveryService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryService")
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::InMemoryAccountStore;
    use crate::error::AccountStoreError;
    use crate::handle::ChannelHandle;
    use crate::types::ListenerMessage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store that fails every lookup.
    struct BrokenStore;

    #[async_trait]
    impl AccountStore for BrokenStore {
        async fn exists(&self, _account: &AccountId) -> Result<bool, AccountStoreError> {
            Err(AccountStoreError::Backend("offline".to_string()))
        }
    }

    /// Store that counts lookups.
    struct CountingStore {
        inner: InMemoryAccountStore,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl AccountStore for CountingStore {
        async fn exists(&self, account: &AccountId) -> Result<bool, AccountStoreError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.inner.exists(account).await
        }
    }

    fn service() -> DeliveryService {
        let accounts: InMemoryAccountStore = ["alice", "bob"].into_iter().collect();
        DeliveryService::new(Arc::new(ConnectionRegistry::new()), Arc::new(accounts))
    }

    #[tokio::test]
    async fn test_unknown_account_never_reaches_registry() {
        let service = service();
        let (handle, mut rx) = ChannelHandle::new(4);
        service
            .registry()
            .connect(AccountId::from("mallory"), ListenerId::from("L1"), Arc::new(handle))
            .await
            .unwrap();

        let result = service.push("mallory", PushRequest::new("123456")).await;

        assert!(matches!(result, Err(PushError::UnknownAccount(ref a)) if a.as_str() == "mallory"));
        assert!(tokio::time::timeout(std::time::Duration::from_millis(50), rx.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unknown_account_checked_before_code() {
        let service = service();
        let result = service.push("mallory", PushRequest::default()).await;
        assert!(matches!(result, Err(PushError::UnknownAccount(_))));
    }

    #[tokio::test]
    async fn test_missing_or_empty_code_rejected() {
        let service = service();

        let missing = service.push("alice", PushRequest::default()).await;
        assert!(matches!(missing, Err(PushError::CodeRequired)));

        let empty = service.push("alice", PushRequest::new("")).await;
        assert!(matches!(empty, Err(PushError::CodeRequired)));
    }

    #[tokio::test]
    async fn test_no_listener_is_soft_failure() {
        let service = service();
        let outcome = service.push("bob", PushRequest::new("000000")).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::NoListeners);
    }

    #[tokio::test]
    async fn test_push_delivers_to_targeted_listener() {
        let service = service();
        let (l1, mut rx1) = ChannelHandle::new(4);
        let (l2, mut rx2) = ChannelHandle::new(4);
        let registry = service.registry();
        registry
            .connect(AccountId::from("alice"), ListenerId::from("L1"), Arc::new(l1))
            .await
            .unwrap();
        registry
            .connect(AccountId::from("alice"), ListenerId::from("L2"), Arc::new(l2))
            .await
            .unwrap();

        let outcome = service
            .push("alice", PushRequest::new("123456").with_device("L2"))
            .await
            .unwrap();

        assert_eq!(outcome, DeliveryOutcome::Delivered { count: 1 });
        assert_eq!(
            rx2.recv().await,
            Some(ListenerMessage::verification_code("123456"))
        );
        assert!(tokio::time::timeout(std::time::Duration::from_millis(50), rx1.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_empty_device_id_broadcasts() {
        let service = service();
        let (l1, mut rx1) = ChannelHandle::new(4);
        let (l2, mut rx2) = ChannelHandle::new(4);
        let registry = service.registry();
        registry
            .connect(AccountId::from("alice"), ListenerId::from("L1"), Arc::new(l1))
            .await
            .unwrap();
        registry
            .connect(AccountId::from("alice"), ListenerId::from("L2"), Arc::new(l2))
            .await
            .unwrap();

        let outcome = service
            .push("alice", PushRequest::new("777777").with_device(""))
            .await
            .unwrap();

        assert_eq!(outcome, DeliveryOutcome::Delivered { count: 2 });
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_account_store_failure_surfaces() {
        let service = DeliveryService::new(Arc::new(ConnectionRegistry::new()), Arc::new(BrokenStore));
        let result = service.push("alice", PushRequest::new("123456")).await;
        assert!(matches!(result, Err(PushError::AccountLookup(_))));
    }

    #[tokio::test]
    async fn test_account_looked_up_once_per_push() {
        let store = Arc::new(CountingStore {
            inner: ["alice"].into_iter().collect(),
            lookups: AtomicUsize::new(0),
        });
        let service = DeliveryService::new(Arc::new(ConnectionRegistry::new()), store.clone());

        service.push("alice", PushRequest::new("1")).await.unwrap();
        service.push("nobody", PushRequest::new("1")).await.unwrap_err();

        assert_eq!(store.lookups.load(Ordering::SeqCst), 2);
    }
}
