use async_trait::async_trait;
use em_api_types::{BackendInfo, WorkflowError};
use em_chain_client::{ChainClient, JsonRpcTransport};
use std::sync::Arc;
use tracing::info;

use crate::cache::CachedSession;
use crate::{Connection, WalletBackend, connect_error};

pub const INJECTED: &str = "injected";

/// A browser-extension style wallet reachable over JSON-RPC; the wallet
/// holds the keys and signs `eth_sendTransaction` itself.
pub struct InjectedBackend {
    name: String,
    transport: Arc<dyn JsonRpcTransport>,
}

impl InjectedBackend {
    pub fn new(name: impl Into<String>, transport: Arc<dyn JsonRpcTransport>) -> Self {
        Self {
            name: name.into(),
            transport,
        }
    }
}

#[async_trait]
impl WalletBackend for InjectedBackend {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            id: INJECTED.to_owned(),
            name: self.name.clone(),
            description: "Connect with your browser wallet".to_owned(),
        }
    }

    async fn restore(&self, _cached: &CachedSession) -> Result<Option<Connection>, WorkflowError> {
        let accounts = ChainClient::new(self.transport.clone())
            .get_accounts()
            .await
            .map_err(connect_error)?;
        if accounts.is_empty() {
            return Ok(None);
        }
        info!(account = %accounts[0], "found an authorized account");
        Ok(Some(Connection {
            transport: self.transport.clone(),
            accounts,
            id_token: None,
        }))
    }

    async fn connect(&self) -> Result<Connection, WorkflowError> {
        let accounts = ChainClient::new(self.transport.clone())
            .request_accounts()
            .await
            .map_err(connect_error)?;
        if accounts.is_empty() {
            return Err(WorkflowError::UserRejected(
                "wallet returned no accounts".to_owned(),
            ));
        }
        Ok(Connection {
            transport: self.transport.clone(),
            accounts,
            id_token: None,
        })
    }
}
