//! The connect / mint workflow behind the mint page.
//!
//! [`MintWorkflow`] owns the live wallet session, the contract handle bound to
//! it and the minted-event subscription, and publishes a [`UiState`] snapshot
//! on every change.

use em_api_types::{ChainId, SessionInfo, TxHash, UiState, WorkflowError, WorkflowPhase};
use em_chain_client::{JsonRpcTransport, NetworkCheck};
use em_contract::{AbiDescriptor, ContractHandle, ContractMethods, DEFAULT_POLL_INTERVAL};
use em_session::{Session, SessionProvider};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub mod view;

pub use view::{ButtonState, ViewModel};

/// User-facing notices: network mismatch, minted links.
pub trait AlertSink: Send + Sync {
    fn alert(&self, message: &str);
}

#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub contract_address: String,
    pub methods: ContractMethods,
    pub expected_chain_id: ChainId,
    pub network_name: String,
    pub total_supply: u64,
    pub poll_interval: Duration,
    pub explorer_tx_url: String,
    pub marketplace_asset_url: String,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            contract_address: em_contract::DEFAULT_CONTRACT_ADDRESS.to_owned(),
            methods: ContractMethods::default(),
            expected_chain_id: ChainId("0x4".to_owned()),
            network_name: "Rinkeby Test Network".to_owned(),
            total_supply: 100,
            poll_interval: DEFAULT_POLL_INTERVAL,
            explorer_tx_url: "https://rinkeby.etherscan.io/tx/".to_owned(),
            marketplace_asset_url: "https://testnets.opensea.io/assets/".to_owned(),
        }
    }
}

impl WorkflowSettings {
    pub fn explorer_link(&self, tx_hash: &TxHash) -> String {
        format!("{}{}", self.explorer_tx_url, tx_hash)
    }

    pub fn marketplace_link(&self, token_id: u64) -> String {
        format!("{}{}/{}", self.marketplace_asset_url, self.contract_address, token_id)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MintReport {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub token_id: Option<u64>,
    /// Count read after confirmation; `None` if that read failed.
    pub minted_so_far: Option<u64>,
    pub explorer_url: String,
}

struct LiveSession {
    session: Session,
    handle: ContractHandle,
    /// `None` when the minted-event subscription could not be started.
    alerts: Option<JoinHandle<()>>,
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        // Dropping the forwarder drops its subscription, which stops the poller.
        if let Some(alerts) = &self.alerts {
            alerts.abort();
        }
    }
}

/// Holds `minting` up for as long as it lives.
struct MintingFlag<'a>(&'a watch::Sender<UiState>);

impl<'a> MintingFlag<'a> {
    fn raise(ui: &'a watch::Sender<UiState>) -> Self {
        ui.send_modify(|state| state.minting = true);
        Self(ui)
    }
}

impl Drop for MintingFlag<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|state| state.minting = false);
    }
}

pub struct MintWorkflow {
    settings: WorkflowSettings,
    abi: Arc<AbiDescriptor>,
    provider: SessionProvider,
    reader: ContractHandle,
    alerts: Arc<dyn AlertSink>,
    ui: watch::Sender<UiState>,
    live: RwLock<Option<LiveSession>>,
    connect_lock: Mutex<()>,
    mint_lock: Mutex<()>,
}

impl MintWorkflow {
    /// `reader` is a public node used for count reads, which need no wallet.
    pub fn new(
        settings: WorkflowSettings,
        abi: Arc<AbiDescriptor>,
        provider: SessionProvider,
        reader: Arc<dyn JsonRpcTransport>,
        alerts: Arc<dyn AlertSink>,
    ) -> Result<Self, WorkflowError> {
        let reader = ContractHandle::bind(
            &settings.contract_address,
            abi.clone(),
            settings.methods.clone(),
            reader,
            None,
        )?
        .with_poll_interval(settings.poll_interval);

        let (ui, _) = watch::channel(UiState::default());
        Ok(Self {
            settings,
            abi,
            provider,
            reader,
            alerts,
            ui,
            live: RwLock::new(None),
            connect_lock: Mutex::new(()),
            mint_lock: Mutex::new(()),
        })
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    pub fn subscribe_ui(&self) -> watch::Receiver<UiState> {
        self.ui.subscribe()
    }

    pub fn ui_state(&self) -> UiState {
        self.ui.borrow().clone()
    }

    pub fn phase(&self) -> WorkflowPhase {
        self.ui.borrow().phase()
    }

    pub fn view(&self) -> ViewModel {
        ViewModel::render(&self.ui.borrow(), self.settings.total_supply)
    }

    pub async fn session_info(&self) -> Option<SessionInfo> {
        self.live.read().await.as_ref().map(|live| live.session.info().clone())
    }

    /// Silently restores a cached session, then loads the count. Never prompts
    /// and never fails; problems are logged.
    pub async fn initial_load(&self) {
        {
            let _connecting = self.connect_lock.lock().await;
            match self.provider.restore_or_null().await {
                Ok(Some(session)) => {
                    if let Err(err) = self.enter_session(session).await {
                        warn!("could not resume wallet session: {err}");
                    }
                }
                Ok(None) => info!("no authorized account found"),
                Err(err) => warn!("wallet restore failed: {err}"),
            }
        }

        if let Err(err) = self.refresh_count().await {
            warn!("could not load minted count: {err}");
        }
    }

    /// Connects a wallet through the chooser. Returns the live session if one
    /// already exists.
    pub async fn connect(&self) -> Result<SessionInfo, WorkflowError> {
        let _connecting = self.connect_lock.lock().await;
        if let Some(live) = self.live.read().await.as_ref() {
            return Ok(live.session.info().clone());
        }

        let result = async {
            self.provider.clear_cache().await?;
            let session = self.provider.connect_interactive().await?;
            self.enter_session(session).await
        }
        .await;

        if let Err(err) = &result {
            warn!("wallet connect failed: {err}");
        }
        result
    }

    async fn enter_session(&self, session: Session) -> Result<SessionInfo, WorkflowError> {
        let account = session.account().cloned().ok_or(WorkflowError::NotConnected)?;
        let handle = ContractHandle::bind(
            &self.settings.contract_address,
            self.abi.clone(),
            self.settings.methods.clone(),
            session.transport(),
            Some(account.clone()),
        )?
        .with_poll_interval(self.settings.poll_interval);

        // Event alerts are a courtesy; the wallet stays connected without them.
        let alerts = match self.forward_minted_events(&handle).await {
            Ok(alerts) => Some(alerts),
            Err(err) => {
                warn!("minted event alerts unavailable: {err}");
                None
            }
        };
        self.check_network(&session).await;

        let info = session.info().clone();
        *self.live.write().await = Some(LiveSession {
            session,
            handle,
            alerts,
        });
        self.ui.send_if_modified(|state| {
            let changed = state.account.as_ref() != Some(&account);
            state.account = Some(account.clone());
            changed
        });
        info!(account = %account, chain_id = %info.chain_id, "connected");
        Ok(info)
    }

    async fn forward_minted_events(
        &self,
        handle: &ContractHandle,
    ) -> Result<JoinHandle<()>, WorkflowError> {
        let mut subscription = handle.subscribe_minted().await?;
        let alerts = self.alerts.clone();
        let settings = self.settings.clone();

        Ok(tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                info!(token_id = event.token_id, from = %event.from, "nft minted");
                alerts.alert(&format!(
                    "Hey there! We've minted your NFT and sent it to your wallet. \
                     It may be blank right now. It can take a max of 10 min to show up \
                     on OpenSea. Here's the link: {}",
                    settings.marketplace_link(event.token_id)
                ));
            }
        }))
    }

    /// Advisory only: a mismatch raises a notice, nothing is blocked.
    async fn check_network(&self, session: &Session) {
        match session
            .chain_client()
            .check_network(&self.settings.expected_chain_id)
            .await
        {
            Ok(NetworkCheck::Matches) => {}
            Ok(NetworkCheck::Mismatch { .. }) => self
                .alerts
                .alert(&format!("You are not connected to the {}!", self.settings.network_name)),
            Err(err) => warn!("network check failed: {err}"),
        }
    }

    /// Mints one token and waits for it to be mined. Only one mint runs at a time.
    pub async fn mint(&self) -> Result<MintReport, WorkflowError> {
        let result = self.mint_once().await;
        if let Err(err) = &result {
            warn!("mint failed: {err}");
        }
        result
    }

    async fn mint_once(&self) -> Result<MintReport, WorkflowError> {
        let Ok(_serial) = self.mint_lock.try_lock() else {
            return Err(WorkflowError::AlreadyMinting);
        };
        let handle = self
            .live
            .read()
            .await
            .as_ref()
            .map(|live| live.handle.clone())
            .ok_or(WorkflowError::NotConnected)?;

        let flag = MintingFlag::raise(&self.ui);
        let pending = handle.mint().await?;
        info!(tx_hash = %pending.hash(), "mining, please wait");
        let receipt = pending.await_confirmation().await?;
        drop(flag);

        let explorer_url = self.settings.explorer_link(&receipt.tx_hash);
        info!("mined, see transaction: {explorer_url}");

        let minted_so_far = match handle.get_total_minted_so_far().await {
            Ok(count) => {
                self.publish_count(count);
                Some(count)
            }
            Err(err) => {
                warn!("could not refresh minted count: {err}");
                None
            }
        };

        Ok(MintReport {
            token_id: handle.minted_events(&receipt).first().map(|event| event.token_id),
            tx_hash: receipt.tx_hash,
            block_number: receipt.block_number,
            minted_so_far,
            explorer_url,
        })
    }

    /// Reads the minted count; needs no wallet.
    pub async fn refresh_count(&self) -> Result<u64, WorkflowError> {
        let count = self.reader.get_total_minted_so_far().await?;
        self.publish_count(count);
        Ok(count)
    }

    fn publish_count(&self, count: u64) {
        let count = count.to_string();
        self.ui.send_if_modified(|state| {
            if state.mint_count == count {
                return false;
            }
            state.mint_count = count.clone();
            true
        });
    }

    /// Forgets the wallet: clears the cached provider and stops event alerts.
    pub async fn disconnect(&self) -> Result<(), WorkflowError> {
        let _connecting = self.connect_lock.lock().await;
        let previous = self.live.write().await.take();
        if previous.is_some() {
            info!("wallet disconnected");
        }
        drop(previous);

        self.ui.send_if_modified(|state| state.account.take().is_some());
        self.provider.clear_cache().await.inspect_err(|err| {
            warn!("could not clear cached wallet provider: {err}");
        })
    }
}
