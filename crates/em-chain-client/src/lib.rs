use async_trait::async_trait;
use em_api_types::{ChainId, TxHash, WalletAddress, WorkflowError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// EIP-1193 code a wallet returns when the user declines a request.
pub const USER_REJECTED_CODE: i64 = 4001;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("decode error: {0}")]
    Decode(String),
}

impl RpcError {
    pub fn is_user_rejection(&self) -> bool {
        matches!(self, RpcError::Rpc { code, .. } if *code == USER_REJECTED_CODE)
    }
}

impl From<RpcError> for WorkflowError {
    fn from(err: RpcError) -> Self {
        if err.is_user_rejection() {
            return WorkflowError::UserRejected(err.to_string());
        }
        WorkflowError::Chain(err.to_string())
    }
}

/// A JSON-RPC connection to a node or wallet.
#[async_trait]
pub trait JsonRpcTransport: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError>;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub to: String,
    pub data: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: String,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkCheck {
    Matches,
    Mismatch { expected: ChainId, actual: ChainId },
}

impl NetworkCheck {
    pub fn is_mismatch(&self) -> bool {
        matches!(self, NetworkCheck::Mismatch { .. })
    }
}

/// Typed wrapper over the handful of `eth_*` calls the workflow needs.
#[derive(Clone)]
pub struct ChainClient {
    transport: Arc<dyn JsonRpcTransport>,
}

impl ChainClient {
    pub fn new(transport: Arc<dyn JsonRpcTransport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> Arc<dyn JsonRpcTransport> {
        self.transport.clone()
    }

    /// Accounts already authorized for this origin; never prompts.
    pub async fn get_accounts(&self) -> Result<Vec<WalletAddress>, RpcError> {
        let value = self.transport.request("eth_accounts", json!([])).await?;
        parse_accounts(value)
    }

    /// Asks the wallet to authorize accounts; may prompt the user.
    pub async fn request_accounts(&self) -> Result<Vec<WalletAddress>, RpcError> {
        let value = self
            .transport
            .request("eth_requestAccounts", json!([]))
            .await?;
        parse_accounts(value)
    }

    pub async fn get_chain_id(&self) -> Result<ChainId, RpcError> {
        let value = self.transport.request("eth_chainId", json!([])).await?;
        let raw = value
            .as_str()
            .ok_or_else(|| RpcError::Decode(format!("eth_chainId returned {value}")))?;
        ChainId::parse(raw).ok_or_else(|| RpcError::Decode(format!("invalid chain id '{raw}'")))
    }

    /// Advisory only: a mismatch is logged and reported, never enforced.
    pub async fn check_network(&self, expected: &ChainId) -> Result<NetworkCheck, RpcError> {
        let actual = self.get_chain_id().await?;
        let expected = expected.normalized();
        if actual == expected {
            debug!(chain_id = %actual, "connected to expected network");
            return Ok(NetworkCheck::Matches);
        }
        warn!(expected = %expected, actual = %actual, "wallet is on an unexpected network");
        Ok(NetworkCheck::Mismatch { expected, actual })
    }

    pub async fn block_number(&self) -> Result<u64, RpcError> {
        let value = self.transport.request("eth_blockNumber", json!([])).await?;
        quantity_from_value(&value)
    }

    pub async fn send_transaction(&self, tx: &CallRequest) -> Result<TxHash, RpcError> {
        let value = self
            .transport
            .request("eth_sendTransaction", json!([tx]))
            .await?;
        value
            .as_str()
            .map(|hash| TxHash(hash.to_owned()))
            .ok_or_else(|| RpcError::Decode(format!("eth_sendTransaction returned {value}")))
    }

    pub async fn call(&self, call: &CallRequest) -> Result<String, RpcError> {
        let value = self
            .transport
            .request("eth_call", json!([call, "latest"]))
            .await?;
        value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| RpcError::Decode(format!("eth_call returned {value}")))
    }

    pub async fn get_transaction_receipt(
        &self,
        tx_hash: &TxHash,
    ) -> Result<Option<TransactionReceipt>, RpcError> {
        let value = self
            .transport
            .request("eth_getTransactionReceipt", json!([tx_hash.0]))
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|err| RpcError::Decode(format!("receipt: {err}")))
    }

    pub async fn get_logs(
        &self,
        address: &str,
        topic: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LogEntry>, RpcError> {
        let filter = json!({
            "address": address,
            "topics": [topic],
            "fromBlock": format!("{from_block:#x}"),
            "toBlock": format!("{to_block:#x}"),
        });
        let value = self.transport.request("eth_getLogs", json!([filter])).await?;
        serde_json::from_value(value).map_err(|err| RpcError::Decode(format!("logs: {err}")))
    }
}

/// Parses a hex `QUANTITY` such as `0x1b4`.
pub fn parse_quantity(raw: &str) -> Result<u64, RpcError> {
    let hex = raw
        .strip_prefix("0x")
        .ok_or_else(|| RpcError::Decode(format!("quantity '{raw}' lacks 0x prefix")))?;
    if hex.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(hex, 16).map_err(|err| RpcError::Decode(format!("quantity '{raw}': {err}")))
}

fn quantity_from_value(value: &Value) -> Result<u64, RpcError> {
    let raw = value
        .as_str()
        .ok_or_else(|| RpcError::Decode(format!("expected quantity, got {value}")))?;
    parse_quantity(raw)
}

fn parse_accounts(value: Value) -> Result<Vec<WalletAddress>, RpcError> {
    let accounts: Vec<String> = serde_json::from_value(value)
        .map_err(|err| RpcError::Decode(format!("accounts: {err}")))?;
    accounts
        .iter()
        .map(|raw| {
            WalletAddress::parse(raw)
                .ok_or_else(|| RpcError::Decode(format!("malformed account address '{raw}'")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const FIRST: &str = "0x00000000000000000000000000000000000000aa";
    const SECOND: &str = "0x00000000000000000000000000000000000000bb";

    #[derive(Default)]
    struct ScriptedTransport {
        responses: HashMap<String, Result<Value, RpcError>>,
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl ScriptedTransport {
        fn with(mut self, method: &str, response: Result<Value, RpcError>) -> Self {
            self.responses.insert(method.to_owned(), response);
            self
        }
    }

    #[async_trait]
    impl JsonRpcTransport for ScriptedTransport {
        async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
            self.calls.lock().unwrap().push((method.to_owned(), params));
            self.responses
                .get(method)
                .cloned()
                .unwrap_or_else(|| {
                    Err(RpcError::Rpc {
                        code: -32601,
                        message: "method not found".into(),
                    })
                })
        }
    }

    #[tokio::test]
    async fn accounts_are_returned_in_order() -> anyhow::Result<()> {
        let transport = ScriptedTransport::default()
            .with("eth_accounts", Ok(json!([FIRST, SECOND])));
        let client = ChainClient::new(Arc::new(transport));

        let accounts = client.get_accounts().await?;
        assert_eq!(
            accounts,
            vec![WalletAddress(FIRST.into()), WalletAddress(SECOND.into())]
        );
        Ok(())
    }

    #[tokio::test]
    async fn malformed_account_is_a_decode_error() -> anyhow::Result<()> {
        let transport = ScriptedTransport::default()
            .with("eth_accounts", Ok(json!([FIRST, "0x123é5678901234"])));
        let client = ChainClient::new(Arc::new(transport));

        let result = client.get_accounts().await;
        assert!(matches!(result, Err(RpcError::Decode(_))));
        Ok(())
    }

    #[tokio::test]
    async fn no_authorized_accounts_is_empty() -> anyhow::Result<()> {
        let transport = ScriptedTransport::default().with("eth_accounts", Ok(json!([])));
        let client = ChainClient::new(Arc::new(transport));
        assert!(client.get_accounts().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn network_mismatch_is_reported_not_raised() -> anyhow::Result<()> {
        let transport = ScriptedTransport::default().with("eth_chainId", Ok(json!("0x1")));
        let client = ChainClient::new(Arc::new(transport));

        let check = client.check_network(&ChainId("0x04".into())).await?;
        assert_eq!(
            check,
            NetworkCheck::Mismatch {
                expected: ChainId("0x4".into()),
                actual: ChainId("0x1".into()),
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn matching_network_passes() -> anyhow::Result<()> {
        let transport = ScriptedTransport::default().with("eth_chainId", Ok(json!("0x4")));
        let client = ChainClient::new(Arc::new(transport));
        assert_eq!(client.check_network(&ChainId("4".into())).await?, NetworkCheck::Matches);
        Ok(())
    }

    #[tokio::test]
    async fn pending_receipt_is_none() -> anyhow::Result<()> {
        let transport =
            ScriptedTransport::default().with("eth_getTransactionReceipt", Ok(Value::Null));
        let client = ChainClient::new(Arc::new(transport));
        let receipt = client.get_transaction_receipt(&TxHash("0x01".into())).await?;
        assert!(receipt.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn get_logs_sends_hex_block_range() -> anyhow::Result<()> {
        let transport = Arc::new(ScriptedTransport::default().with("eth_getLogs", Ok(json!([]))));
        let client = ChainClient::new(transport.clone());

        client.get_logs("0xc0ffee", "0xtopic", 16, 31).await?;

        let calls = transport.calls.lock().unwrap();
        let (method, params) = &calls[0];
        assert_eq!(method, "eth_getLogs");
        assert_eq!(params[0]["fromBlock"], "0x10");
        assert_eq!(params[0]["toBlock"], "0x1f");
        Ok(())
    }

    #[test]
    fn rejection_code_maps_to_user_rejected() {
        let err = RpcError::Rpc {
            code: USER_REJECTED_CODE,
            message: "denied".into(),
        };
        assert!(matches!(WorkflowError::from(err), WorkflowError::UserRejected(_)));

        let err = RpcError::Rpc {
            code: -32000,
            message: "execution reverted".into(),
        };
        assert!(matches!(WorkflowError::from(err), WorkflowError::Chain(_)));
    }

    #[test]
    fn quantities_parse() {
        assert_eq!(parse_quantity("0x1b4").unwrap(), 436);
        assert_eq!(parse_quantity("0x").unwrap(), 0);
        assert!(parse_quantity("12").is_err());
    }
}
