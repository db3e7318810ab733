use anyhow::{Context, anyhow};
use em_api_types::ChainId;
use em_chain_http::DEFAULT_RPC_URL;
use em_contract::{AbiDescriptor, ContractMethods, DEFAULT_CONTRACT_ADDRESS, DEFAULT_POLL_INTERVAL};
use em_mint_core::WorkflowSettings;
use em_session::UAuthOptions;
use std::path::PathBuf;
use std::time::Duration;

pub(crate) const COLLECTION_URL: &str = "https://testnets.opensea.io/collection/coolerenyeagernft-v2";

/// Startup configuration, read once from `EPICMINT_*` environment variables.
#[derive(Debug, Clone)]
pub(crate) struct AppConfig {
    pub(crate) rpc_url: String,
    pub(crate) wallet_url: String,
    pub(crate) abi_path: Option<PathBuf>,
    pub(crate) session_cache: PathBuf,
    pub(crate) uauth: UAuthOptions,
    pub(crate) settings: WorkflowSettings,
}

impl AppConfig {
    pub(crate) fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let rpc_url = var("EPICMINT_RPC_URL").unwrap_or_else(|| DEFAULT_RPC_URL.to_owned());
        // The signing wallet defaults to the read node, as on a dev node with
        // unlocked accounts.
        let wallet_url = var("EPICMINT_WALLET_URL").unwrap_or_else(|| rpc_url.clone());

        let expected_chain_id = match var("EPICMINT_EXPECTED_CHAIN_ID") {
            Some(raw) => ChainId::parse(&raw)
                .ok_or_else(|| anyhow!("EPICMINT_EXPECTED_CHAIN_ID is not a chain id: {raw}"))?,
            None => ChainId("0x4".to_owned()),
        };
        let poll_interval = match var("EPICMINT_POLL_INTERVAL_MS") {
            Some(raw) => Duration::from_millis(raw.parse().with_context(|| {
                format!("EPICMINT_POLL_INTERVAL_MS must be milliseconds, got {raw}")
            })?),
            None => DEFAULT_POLL_INTERVAL,
        };
        let total_supply = match var("EPICMINT_TOTAL_SUPPLY") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("EPICMINT_TOTAL_SUPPLY must be a number, got {raw}"))?,
            None => 100,
        };

        let methods = ContractMethods::default();
        let methods = ContractMethods {
            mint: var("EPICMINT_MINT_METHOD").unwrap_or(methods.mint),
            total_minted: var("EPICMINT_COUNT_METHOD").unwrap_or(methods.total_minted),
            minted_event: var("EPICMINT_MINTED_EVENT").unwrap_or(methods.minted_event),
        };

        let defaults = WorkflowSettings::default();
        let settings = WorkflowSettings {
            contract_address: var("EPICMINT_CONTRACT_ADDRESS")
                .unwrap_or_else(|| DEFAULT_CONTRACT_ADDRESS.to_owned()),
            methods,
            expected_chain_id,
            network_name: var("EPICMINT_NETWORK_NAME").unwrap_or(defaults.network_name),
            total_supply,
            poll_interval,
            ..defaults
        };

        let uauth_defaults = UAuthOptions::default();
        let uauth = UAuthOptions {
            client_id: var("EPICMINT_UAUTH_CLIENT_ID").unwrap_or(uauth_defaults.client_id),
            redirect_uri: var("EPICMINT_UAUTH_REDIRECT_URI").unwrap_or(uauth_defaults.redirect_uri),
            scope: var("EPICMINT_UAUTH_SCOPE").unwrap_or(uauth_defaults.scope),
            authorization_endpoint: var("EPICMINT_UAUTH_AUTH_URL")
                .unwrap_or(uauth_defaults.authorization_endpoint),
            token_endpoint: var("EPICMINT_UAUTH_TOKEN_URL")
                .unwrap_or(uauth_defaults.token_endpoint),
        };

        let session_cache = var("EPICMINT_SESSION_CACHE")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_session_cache(lookup("HOME")));

        Ok(Self {
            rpc_url,
            wallet_url,
            abi_path: var("EPICMINT_ABI_PATH").map(PathBuf::from),
            session_cache,
            uauth,
            settings,
        })
    }

    /// The ABI at `EPICMINT_ABI_PATH`, or the bundled one.
    pub(crate) async fn load_abi(&self) -> anyhow::Result<AbiDescriptor> {
        let Some(path) = &self.abi_path else {
            return AbiDescriptor::bundled().context("bundled contract ABI");
        };
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading contract ABI {}", path.display()))?;
        AbiDescriptor::from_json(&raw)
            .with_context(|| format!("parsing contract ABI {}", path.display()))
    }
}

fn default_session_cache(home: Option<String>) -> PathBuf {
    let base = home.map(PathBuf::from).unwrap_or_default();
    base.join(".epicmint").join("session.json")
}
