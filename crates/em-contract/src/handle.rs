use em_api_types::{MintedEvent, TxHash, WalletAddress, WorkflowError};
use em_chain_client::{
    CallRequest, ChainClient, JsonRpcTransport, LogEntry, TransactionReceipt, parse_quantity,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::abi::{AbiDescriptor, AbiError, decode_uint, words};
use crate::events::{self, MintedSubscription};

/// How often receipts and logs are polled.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(4);

/// Names of the ABI members the workflow drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractMethods {
    pub mint: String,
    pub total_minted: String,
    pub minted_event: String,
}

impl Default for ContractMethods {
    fn default() -> Self {
        Self {
            mint: "mint".to_owned(),
            total_minted: "getTotalMintedSoFar".to_owned(),
            minted_event: "NewEpicNFTMinted".to_owned(),
        }
    }
}

/// A deployed contract bound to a transport and, for writes, a signer.
#[derive(Clone)]
pub struct ContractHandle {
    address: String,
    abi: Arc<AbiDescriptor>,
    methods: ContractMethods,
    client: ChainClient,
    from: Option<WalletAddress>,
    poll_interval: Duration,
}

impl std::fmt::Debug for ContractHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractHandle")
            .field("address", &self.address)
            .field("methods", &self.methods)
            .field("from", &self.from)
            .finish()
    }
}

/// Two handles are equal when they bind the same contract surface for the same signer.
impl PartialEq for ContractHandle {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
            && self.methods == other.methods
            && self.from == other.from
            && self.abi == other.abi
    }
}

impl ContractHandle {
    /// Pure: checks that every configured member exists in the ABI.
    pub fn bind(
        address: &str,
        abi: Arc<AbiDescriptor>,
        methods: ContractMethods,
        transport: Arc<dyn JsonRpcTransport>,
        from: Option<WalletAddress>,
    ) -> Result<Self, AbiError> {
        abi.function(&methods.mint)?;
        abi.function(&methods.total_minted)?;
        abi.event(&methods.minted_event)?;

        Ok(Self {
            address: address.to_ascii_lowercase(),
            abi,
            methods,
            client: ChainClient::new(transport),
            from,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn signer(&self) -> Option<&WalletAddress> {
        self.from.as_ref()
    }

    /// Submits the state-changing mint call. Needs a signer.
    pub async fn mint(&self) -> Result<PendingTransaction, WorkflowError> {
        let from = self.from.clone().ok_or(WorkflowError::NotConnected)?;
        let data = self.abi.function(&self.methods.mint)?.selector();

        info!(contract = %self.address, from = %from, "going to pop wallet now to pay gas");
        let tx_hash = self
            .client
            .send_transaction(&CallRequest {
                from: Some(from.0),
                to: self.address.clone(),
                data,
            })
            .await?;
        info!(tx_hash = %tx_hash, "mint submitted, mining");

        Ok(PendingTransaction {
            tx_hash,
            client: self.client.clone(),
            poll_interval: self.poll_interval,
        })
    }

    /// Read-only; works on a handle with no signer.
    pub async fn get_total_minted_so_far(&self) -> Result<u64, WorkflowError> {
        let data = self.abi.function(&self.methods.total_minted)?.selector();
        let raw = self
            .client
            .call(&CallRequest {
                from: self.from.as_ref().map(|addr| addr.0.clone()),
                to: self.address.clone(),
                data,
            })
            .await?;

        let returned = words(&raw)?;
        let first = returned
            .first()
            .ok_or_else(|| WorkflowError::chain("contract returned no data; wrong network?"))?;
        let count = decode_uint(first)?;
        debug!(count, "total minted so far");
        Ok(count)
    }

    /// Starts polling for minted events from the next block on.
    pub async fn subscribe_minted(&self) -> Result<MintedSubscription, WorkflowError> {
        let event = self.abi.event(&self.methods.minted_event)?.clone();
        let start = self.client.block_number().await?;
        Ok(events::spawn_poller(
            self.client.clone(),
            self.address.clone(),
            event,
            start.saturating_add(1),
            self.poll_interval,
        ))
    }

    /// Minted events carried in a receipt's logs.
    pub fn minted_events(&self, receipt: &Receipt) -> Vec<MintedEvent> {
        let Ok(event) = self.abi.event(&self.methods.minted_event) else {
            return Vec::new();
        };
        let topic = event.topic();
        receipt
            .logs
            .iter()
            .filter(|log| log.address.eq_ignore_ascii_case(&self.address))
            .filter(|log| log.topics.first().is_some_and(|t| t.eq_ignore_ascii_case(&topic)))
            .filter_map(|log| match events::decode_minted(event, log) {
                Ok(decoded) => Some(decoded),
                Err(err) => {
                    warn!("skipping undecodable minted log: {err}");
                    None
                }
            })
            .collect()
    }
}

impl From<AbiError> for WorkflowError {
    fn from(err: AbiError) -> Self {
        WorkflowError::Chain(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub success: bool,
    pub logs: Vec<LogEntry>,
}

impl Receipt {
    fn from_raw(raw: TransactionReceipt) -> Result<Self, WorkflowError> {
        let block_number = raw
            .block_number
            .as_deref()
            .map(parse_quantity)
            .transpose()?;
        // Pre-Byzantium receipts carry no status; treat them as success.
        let success = match raw.status.as_deref() {
            Some(status) => parse_quantity(status)? == 1,
            None => true,
        };
        Ok(Self {
            tx_hash: TxHash(raw.transaction_hash),
            block_number,
            success,
            logs: raw.logs,
        })
    }
}

/// A submitted transaction that has not been confirmed yet.
pub struct PendingTransaction {
    tx_hash: TxHash,
    client: ChainClient,
    poll_interval: Duration,
}

impl PendingTransaction {
    pub fn hash(&self) -> &TxHash {
        &self.tx_hash
    }

    /// Suspends until the transaction is mined. No timeout is applied.
    pub async fn await_confirmation(self) -> Result<Receipt, WorkflowError> {
        loop {
            if let Some(raw) = self.client.get_transaction_receipt(&self.tx_hash).await? {
                let receipt = Receipt::from_raw(raw)?;
                if !receipt.success {
                    warn!(tx_hash = %self.tx_hash, "transaction reverted");
                    return Err(WorkflowError::chain(format!(
                        "transaction {} reverted",
                        self.tx_hash
                    )));
                }
                info!(tx_hash = %self.tx_hash, block = ?receipt.block_number, "transaction mined");
                return Ok(receipt);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
