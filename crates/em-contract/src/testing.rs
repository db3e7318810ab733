//! In-memory chain that answers the JSON-RPC calls the workflow makes.
//!
//! Enabled with the `testing` feature; used by the workflow tests in
//! downstream crates.

use async_trait::async_trait;
use em_chain_client::{JsonRpcTransport, RpcError, USER_REJECTED_CODE};
use serde_json::{Value, json};
use std::sync::Mutex;

use crate::abi::{AbiDescriptor, AbiError, encode_address, encode_uint};
use crate::handle::ContractMethods;

pub const FAKE_CONTRACT: &str = "0x65813c8b5a99deca557b6a08749b6cd78c0a4cf6";
pub const FAKE_ACCOUNT: &str = "0x00000000000000000000000000000000000000aa";

/// How the fake wallet answers `eth_requestAccounts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountRequest {
    Approve,
    Reject,
}

#[derive(Debug, Clone)]
struct MinedTx {
    hash: String,
    block: u64,
    success: bool,
    log: Option<Value>,
}

#[derive(Debug, Clone)]
struct QueuedTx {
    hash: String,
    from: String,
}

#[derive(Debug)]
struct FakeState {
    chain_id: String,
    accounts: Vec<String>,
    authorized: bool,
    account_request: AccountRequest,
    offline: bool,
    auto_mine: bool,
    reject_next_signature: bool,
    revert_next: bool,
    minted: u64,
    block: u64,
    nonce: u64,
    sent: Vec<String>,
    queued: Vec<QueuedTx>,
    mined: Vec<MinedTx>,
    reverts: Vec<String>,
}

pub struct FakeChain {
    contract: String,
    mint_selector: String,
    count_selector: String,
    minted_topic: String,
    state: Mutex<FakeState>,
}

impl Default for FakeChain {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeChain {
    pub fn new() -> Self {
        let abi = AbiDescriptor::bundled().expect("bundled ABI parses");
        Self::with_abi(&abi, &ContractMethods::default())
            .expect("bundled ABI names the default members")
    }

    /// Fake chain answering for `methods` as laid out in `abi`; every member
    /// must exist in the ABI.
    pub fn with_abi(abi: &AbiDescriptor, methods: &ContractMethods) -> Result<Self, AbiError> {
        let mint_selector = abi.function(&methods.mint)?.selector();
        let count_selector = abi.function(&methods.total_minted)?.selector();
        let minted_topic = abi.event(&methods.minted_event)?.topic();

        Ok(Self {
            contract: FAKE_CONTRACT.to_owned(),
            mint_selector,
            count_selector,
            minted_topic,
            state: Mutex::new(FakeState {
                chain_id: "0x4".to_owned(),
                accounts: vec![FAKE_ACCOUNT.to_owned()],
                authorized: false,
                account_request: AccountRequest::Approve,
                offline: false,
                auto_mine: true,
                reject_next_signature: false,
                revert_next: false,
                minted: 0,
                block: 100,
                nonce: 0,
                sent: Vec::new(),
                queued: Vec::new(),
                mined: Vec::new(),
                reverts: Vec::new(),
            }),
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake chain state poisoned")
    }

    pub fn with_chain_id(self, chain_id: &str) -> Self {
        self.state().chain_id = chain_id.to_owned();
        self
    }

    pub fn with_minted(self, minted: u64) -> Self {
        self.state().minted = minted;
        self
    }

    /// Accounts already authorized, as if the wallet had been connected before.
    pub fn authorized(self) -> Self {
        self.state().authorized = true;
        self
    }

    pub fn set_account_request(&self, answer: AccountRequest) {
        self.state().account_request = answer;
    }

    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// When off, submitted transactions stay pending until [`FakeChain::mine_pending`].
    pub fn set_auto_mine(&self, auto_mine: bool) {
        self.state().auto_mine = auto_mine;
    }

    pub fn reject_next_signature(&self) {
        self.state().reject_next_signature = true;
    }

    pub fn revert_next(&self) {
        self.state().revert_next = true;
    }

    pub fn minted(&self) -> u64 {
        self.state().minted
    }

    pub fn sent_transactions(&self) -> usize {
        self.state().sent.len()
    }

    pub fn mine_pending(&self) {
        let mut state = self.state();
        let queued = std::mem::take(&mut state.queued);
        for tx in queued {
            self.mine(&mut state, tx);
        }
    }

    /// Mints on behalf of someone else, as another visitor to the page would.
    pub fn external_mint(&self, from: &str) {
        let mut state = self.state();
        state.nonce += 1;
        let hash = format!("0x{:064x}", state.nonce);
        state.sent.push(hash.clone());
        self.mine(
            &mut state,
            QueuedTx {
                hash,
                from: from.to_owned(),
            },
        );
    }

    fn mine(&self, state: &mut FakeState, tx: QueuedTx) {
        state.block += 1;
        let block = state.block;
        if state.reverts.contains(&tx.hash) {
            state.mined.push(MinedTx {
                hash: tx.hash,
                block,
                success: false,
                log: None,
            });
            return;
        }

        let token_id = state.minted;
        state.minted += 1;
        let data = match encode_address(&tx.from) {
            Ok(from) => format!("0x{}{}", hex::encode(from), hex::encode(encode_uint(token_id))),
            Err(_) => "0x".to_owned(),
        };
        let log = json!({
            "address": self.contract,
            "topics": [self.minted_topic],
            "data": data,
            "blockNumber": format!("{block:#x}"),
            "transactionHash": tx.hash,
        });
        state.mined.push(MinedTx {
            hash: tx.hash,
            block,
            success: true,
            log: Some(log),
        });
    }

    fn handle(&self, method: &str, params: &Value) -> Result<Value, RpcError> {
        let mut state = self.state();
        if state.offline {
            return Err(RpcError::Transport("connection refused".to_owned()));
        }

        match method {
            "eth_chainId" => Ok(json!(state.chain_id)),
            "eth_blockNumber" => Ok(json!(format!("{:#x}", state.block))),
            "eth_accounts" => {
                if state.authorized {
                    Ok(json!(state.accounts))
                } else {
                    Ok(json!([]))
                }
            }
            "eth_requestAccounts" => match state.account_request {
                AccountRequest::Approve => {
                    state.authorized = true;
                    Ok(json!(state.accounts))
                }
                AccountRequest::Reject => Err(user_rejected("User rejected the request.")),
            },
            "eth_call" => {
                let data = params[0]["data"].as_str().unwrap_or_default();
                if data == self.count_selector {
                    Ok(json!(format!("0x{}", hex::encode(encode_uint(state.minted)))))
                } else {
                    Err(RpcError::Rpc {
                        code: -32000,
                        message: "execution reverted".to_owned(),
                    })
                }
            }
            "eth_sendTransaction" => {
                let tx = &params[0];
                if tx["data"].as_str() != Some(self.mint_selector.as_str()) {
                    return Err(RpcError::Rpc {
                        code: -32000,
                        message: "unknown selector".to_owned(),
                    });
                }
                if std::mem::take(&mut state.reject_next_signature) {
                    return Err(user_rejected("User denied transaction signature."));
                }
                let from = tx["from"].as_str().unwrap_or_default().to_owned();
                state.nonce += 1;
                let hash = format!("0x{:064x}", state.nonce);
                state.sent.push(hash.clone());
                if std::mem::take(&mut state.revert_next) {
                    state.reverts.push(hash.clone());
                }
                let queued = QueuedTx {
                    hash: hash.clone(),
                    from,
                };
                if state.auto_mine {
                    self.mine(&mut state, queued);
                } else {
                    state.queued.push(queued);
                }
                Ok(json!(hash))
            }
            "eth_getTransactionReceipt" => {
                let hash = params[0].as_str().unwrap_or_default();
                let Some(tx) = state.mined.iter().find(|tx| tx.hash == hash) else {
                    return Ok(Value::Null);
                };
                let logs: Vec<&Value> = tx.log.iter().collect();
                Ok(json!({
                    "transactionHash": tx.hash,
                    "blockNumber": format!("{:#x}", tx.block),
                    "status": if tx.success { "0x1" } else { "0x0" },
                    "logs": logs,
                }))
            }
            "eth_getLogs" => {
                let filter = &params[0];
                let from = hex_param(&filter["fromBlock"]);
                let to = hex_param(&filter["toBlock"]);
                let logs: Vec<&Value> = state
                    .mined
                    .iter()
                    .filter(|tx| tx.block >= from && tx.block <= to)
                    .filter_map(|tx| tx.log.as_ref())
                    .collect();
                Ok(json!(logs))
            }
            other => Err(RpcError::Rpc {
                code: -32601,
                message: format!("{other} not supported"),
            }),
        }
    }
}

fn user_rejected(message: &str) -> RpcError {
    RpcError::Rpc {
        code: USER_REJECTED_CODE,
        message: message.to_owned(),
    }
}

fn hex_param(value: &Value) -> u64 {
    value
        .as_str()
        .and_then(|raw| raw.strip_prefix("0x"))
        .and_then(|raw| u64::from_str_radix(raw, 16).ok())
        .unwrap_or(0)
}

#[async_trait]
impl JsonRpcTransport for FakeChain {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.handle(method, &params)
    }
}
