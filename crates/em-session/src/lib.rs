//! Wallet sessions: pluggable backends, the cached-provider marker, and
//! silent restore versus interactive connect.

use async_trait::async_trait;
use em_api_types::{BackendInfo, ChainId, SessionInfo, WalletAddress, WorkflowError};
use em_chain_client::{ChainClient, JsonRpcTransport, RpcError};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub mod cache;
pub mod injected;
pub mod registry;
pub mod uauth;

pub use cache::{CachedSession, FileSessionCache, InMemorySessionCache, SessionCache};
pub use injected::{INJECTED, InjectedBackend};
pub use registry::{ProviderRegistry, install, installed};
pub use uauth::{AuthorizationPrompt, UAUTH, UAuthBackend, UAuthOptions};

/// What a backend hands back after a successful connect or restore.
pub struct Connection {
    pub transport: Arc<dyn JsonRpcTransport>,
    pub accounts: Vec<WalletAddress>,
    /// Identity token to cache alongside the backend id, if the backend has one.
    pub id_token: Option<String>,
}

#[async_trait]
pub trait WalletBackend: Send + Sync {
    fn info(&self) -> BackendInfo;
    /// Re-establishes a previously approved connection without prompting.
    async fn restore(&self, cached: &CachedSession) -> Result<Option<Connection>, WorkflowError>;
    async fn connect(&self) -> Result<Connection, WorkflowError>;
}

/// Lets the user pick one of the registered backends. `None` means the
/// chooser was dismissed.
#[async_trait]
pub trait WalletChooser: Send + Sync {
    async fn choose(&self, options: &[BackendInfo]) -> Option<String>;
}

/// A live, connected wallet.
#[derive(Clone)]
pub struct Session {
    info: SessionInfo,
    transport: Arc<dyn JsonRpcTransport>,
}

impl Session {
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn account(&self) -> Option<&WalletAddress> {
        self.info.account.as_ref()
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.info.chain_id
    }

    pub fn transport(&self) -> Arc<dyn JsonRpcTransport> {
        self.transport.clone()
    }

    pub fn chain_client(&self) -> ChainClient {
        ChainClient::new(self.transport.clone())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("info", &self.info).finish_non_exhaustive()
    }
}

/// Maps wallet errors met while connecting: an unreachable wallet is an
/// unavailable provider, code 4001 is a rejection.
pub(crate) fn connect_error(err: RpcError) -> WorkflowError {
    match err {
        RpcError::Transport(message) => WorkflowError::ProviderUnavailable(message),
        other => other.into(),
    }
}

pub struct SessionProvider {
    registry: Arc<ProviderRegistry>,
    cache: Arc<dyn SessionCache>,
    chooser: Arc<dyn WalletChooser>,
}

impl SessionProvider {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        cache: Arc<dyn SessionCache>,
        chooser: Arc<dyn WalletChooser>,
    ) -> Self {
        Self {
            registry,
            cache,
            chooser,
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Restores the cached session without any user interaction.
    pub async fn restore_or_null(&self) -> Result<Option<Session>, WorkflowError> {
        let Some(marker) = self.cache.load().await? else {
            debug!("no cached wallet provider");
            return Ok(None);
        };

        let Some(backend) = self.registry.backend(&marker.backend_id) else {
            warn!(backend = %marker.backend_id, "cached wallet provider is not registered");
            self.cache.clear().await?;
            return Ok(None);
        };

        match backend.restore(&marker).await? {
            Some(connection) => {
                let session = open_session(&marker.backend_id, connection).await?;
                info!(
                    backend = %marker.backend_id,
                    account = ?session.account(),
                    "wallet session restored"
                );
                Ok(Some(session))
            }
            None => {
                info!(
                    backend = %marker.backend_id,
                    "cached wallet session is no longer authorized"
                );
                self.cache.clear().await?;
                Ok(None)
            }
        }
    }

    /// Opens the chooser and connects the chosen backend.
    pub async fn connect_interactive(&self) -> Result<Session, WorkflowError> {
        let options = self.registry.descriptors();
        if options.is_empty() {
            return Err(WorkflowError::ProviderUnavailable(
                "no wallet providers registered".to_owned(),
            ));
        }

        let choice = self
            .chooser
            .choose(&options)
            .await
            .ok_or_else(|| WorkflowError::UserRejected("wallet chooser closed".to_owned()))?;
        let backend = self.registry.backend(&choice).ok_or_else(|| {
            WorkflowError::ProviderUnavailable(format!("unknown wallet provider '{choice}'"))
        })?;

        let connection = backend.connect().await?;
        let id_token = connection.id_token.clone();
        let session = open_session(&choice, connection).await?;
        self.cache.save(&CachedSession::new(&choice, id_token)).await?;

        info!(backend = %choice, account = ?session.account(), "wallet connected");
        Ok(session)
    }

    pub async fn clear_cache(&self) -> Result<(), WorkflowError> {
        self.cache.clear().await
    }
}

async fn open_session(backend_id: &str, connection: Connection) -> Result<Session, WorkflowError> {
    let account = connection.accounts.first().cloned().ok_or_else(|| {
        WorkflowError::UserRejected("wallet returned no accounts".to_owned())
    })?;
    let chain_id = ChainClient::new(connection.transport.clone())
        .get_chain_id()
        .await
        .map_err(connect_error)?;

    Ok(Session {
        info: SessionInfo {
            backend_id: backend_id.to_owned(),
            account: Some(account),
            chain_id,
        },
        transport: connection.transport,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use em_contract::testing::{AccountRequest, FAKE_ACCOUNT, FakeChain};

    struct FixedChooser(Option<&'static str>);

    #[async_trait]
    impl WalletChooser for FixedChooser {
        async fn choose(&self, _options: &[BackendInfo]) -> Option<String> {
            self.0.map(str::to_owned)
        }
    }

    fn provider(
        chain: &Arc<FakeChain>,
        cache: &Arc<InMemorySessionCache>,
        choice: Option<&'static str>,
    ) -> SessionProvider {
        let registry = ProviderRegistry::default()
            .with(Arc::new(InjectedBackend::new("MetaMask", chain.clone())));
        SessionProvider::new(Arc::new(registry), cache.clone(), Arc::new(FixedChooser(choice)))
    }

    #[tokio::test]
    async fn restore_without_marker_is_null() -> anyhow::Result<()> {
        let chain = Arc::new(FakeChain::new().authorized());
        let cache = Arc::new(InMemorySessionCache::default());
        assert!(provider(&chain, &cache, None).restore_or_null().await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn restore_reuses_authorized_wallet() -> anyhow::Result<()> {
        let chain = Arc::new(FakeChain::new().authorized());
        let cache = Arc::new(InMemorySessionCache::default());
        cache.save(&CachedSession::new(INJECTED, None)).await?;

        let session = provider(&chain, &cache, None)
            .restore_or_null()
            .await?
            .ok_or_else(|| anyhow::anyhow!("expected a session"))?;
        assert_eq!(session.account(), Some(&WalletAddress(FAKE_ACCOUNT.to_owned())));
        assert_eq!(session.chain_id(), &ChainId("0x4".to_owned()));
        Ok(())
    }

    #[tokio::test]
    async fn stale_or_unknown_marker_is_cleared() -> anyhow::Result<()> {
        let chain = Arc::new(FakeChain::new());
        let cache = Arc::new(InMemorySessionCache::default());

        cache.save(&CachedSession::new(INJECTED, None)).await?;
        assert!(provider(&chain, &cache, None).restore_or_null().await?.is_none());
        assert!(cache.load().await?.is_none());

        cache.save(&CachedSession::new("walletconnect", None)).await?;
        assert!(provider(&chain, &cache, None).restore_or_null().await?.is_none());
        assert!(cache.load().await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn connect_persists_marker() -> anyhow::Result<()> {
        let chain = Arc::new(FakeChain::new());
        let cache = Arc::new(InMemorySessionCache::default());

        let session = provider(&chain, &cache, Some(INJECTED)).connect_interactive().await?;
        assert!(session.info().connected());
        assert_eq!(cache.load().await?.map(|m| m.backend_id), Some(INJECTED.to_owned()));
        Ok(())
    }

    #[tokio::test]
    async fn dismissed_chooser_is_user_rejected() -> anyhow::Result<()> {
        let chain = Arc::new(FakeChain::new());
        let cache = Arc::new(InMemorySessionCache::default());

        let result = provider(&chain, &cache, None).connect_interactive().await;
        assert!(matches!(result, Err(WorkflowError::UserRejected(_))));
        assert!(cache.load().await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn connect_errors_are_classified() -> anyhow::Result<()> {
        let chain = Arc::new(FakeChain::new());
        let cache = Arc::new(InMemorySessionCache::default());
        let provider = provider(&chain, &cache, Some(INJECTED));

        chain.set_account_request(AccountRequest::Reject);
        assert!(matches!(
            provider.connect_interactive().await,
            Err(WorkflowError::UserRejected(_))
        ));

        chain.set_account_request(AccountRequest::Approve);
        chain.set_offline(true);
        assert!(matches!(
            provider.connect_interactive().await,
            Err(WorkflowError::ProviderUnavailable(_))
        ));
        assert!(cache.load().await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn unknown_choice_or_empty_registry_is_unavailable() -> anyhow::Result<()> {
        let chain = Arc::new(FakeChain::new());
        let cache = Arc::new(InMemorySessionCache::default());
        let result = provider(&chain, &cache, Some("ledger")).connect_interactive().await;
        assert!(matches!(result, Err(WorkflowError::ProviderUnavailable(_))));

        let empty = SessionProvider::new(
            Arc::new(ProviderRegistry::default()),
            cache.clone(),
            Arc::new(FixedChooser(Some(INJECTED))),
        );
        assert!(matches!(
            empty.connect_interactive().await,
            Err(WorkflowError::ProviderUnavailable(_))
        ));
        Ok(())
    }

    #[test]
    fn registry_replaces_same_id_and_installs_once() {
        let first = Arc::new(FakeChain::new());
        let registry = ProviderRegistry::default()
            .with(Arc::new(InjectedBackend::new("MetaMask", first.clone())))
            .with(Arc::new(InjectedBackend::new("Brave", first)));
        assert_eq!(registry.descriptors().len(), 1);
        assert_eq!(registry.descriptors()[0].name, "Brave");

        let installed_first = install(registry);
        let installed_again = install(ProviderRegistry::default());
        assert!(Arc::ptr_eq(&installed_first, &installed_again));
        assert!(installed().is_some_and(|r| Arc::ptr_eq(&r, &installed_first)));
    }
}
