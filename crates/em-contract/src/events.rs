use em_api_types::{MintedEvent, TxHash, WalletAddress};
use em_chain_client::{ChainClient, LogEntry, parse_quantity};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::abi::{AbiError, AbiItem, decode_address, decode_uint, words};

/// Live minted-event feed for one contract handle.
///
/// Dropping the subscription, or calling [`MintedSubscription::unsubscribe`],
/// stops the background poller.
pub struct MintedSubscription {
    events: mpsc::UnboundedReceiver<MintedEvent>,
    task: JoinHandle<()>,
}

impl MintedSubscription {
    pub async fn next(&mut self) -> Option<MintedEvent> {
        self.events.recv().await
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for MintedSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub(crate) fn spawn_poller(
    client: ChainClient,
    address: String,
    event: AbiItem,
    from_block: u64,
    poll_interval: Duration,
) -> MintedSubscription {
    let (tx, rx) = mpsc::unbounded_channel();
    let topic = event.topic();

    let task = tokio::spawn(async move {
        let mut next_block = from_block;
        loop {
            tokio::time::sleep(poll_interval).await;

            let latest = match client.block_number().await {
                Ok(latest) => latest,
                Err(err) => {
                    warn!("minted poller: block number failed: {err}");
                    continue;
                }
            };
            if latest < next_block {
                continue;
            }

            let logs = match client.get_logs(&address, &topic, next_block, latest).await {
                Ok(logs) => logs,
                Err(err) => {
                    warn!("minted poller: get_logs failed: {err}");
                    continue;
                }
            };

            for log in &logs {
                match decode_minted(&event, log) {
                    Ok(minted) => {
                        debug!(token_id = minted.token_id, from = %minted.from, "minted event");
                        if tx.send(minted).is_err() {
                            return;
                        }
                    }
                    Err(err) => warn!("skipping undecodable minted log: {err}"),
                }
            }
            next_block = latest + 1;
        }
    });

    MintedSubscription { events: rx, task }
}

/// Decodes the first address and first uint parameters of the event,
/// reading indexed parameters from topics and the rest from data.
pub fn decode_minted(event: &AbiItem, log: &LogEntry) -> Result<MintedEvent, AbiError> {
    let data_words = words(&log.data)?;
    let mut data_iter = data_words.iter();
    let mut topic_iter = log.topics.iter().skip(1);

    let mut from = None;
    let mut token_id = None;

    for param in &event.inputs {
        let word = if param.indexed {
            let topic = topic_iter
                .next()
                .ok_or_else(|| AbiError::Word(format!("missing topic for '{}'", param.name)))?;
            *words(topic)?
                .first()
                .ok_or_else(|| AbiError::Word("empty topic".to_owned()))?
        } else {
            *data_iter
                .next()
                .ok_or_else(|| AbiError::Word(format!("missing data for '{}'", param.name)))?
        };

        if param.kind == "address" && from.is_none() {
            from = Some(WalletAddress(decode_address(&word)));
        } else if param.kind.starts_with("uint") && token_id.is_none() {
            token_id = Some(decode_uint(&word)?);
        }
    }

    let block_number = log
        .block_number
        .as_deref()
        .and_then(|raw| parse_quantity(raw).ok());

    Ok(MintedEvent {
        from: from.ok_or_else(|| AbiError::Word("event has no address parameter".to_owned()))?,
        token_id: token_id.ok_or_else(|| AbiError::Word("event has no uint parameter".to_owned()))?,
        tx_hash: log.transaction_hash.clone().map(TxHash),
        block_number,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{AbiDescriptor, encode_address, encode_uint};

    const SENDER: &str = "0x1111111111111111111111111111111111111111";

    #[test]
    fn decodes_unindexed_event_from_data() -> anyhow::Result<()> {
        let abi = AbiDescriptor::bundled()?;
        let event = abi.event("NewEpicNFTMinted")?;
        let log = LogEntry {
            address: "0xc0".to_owned(),
            topics: vec![event.topic()],
            data: format!(
                "0x{}{}",
                hex::encode(encode_address(SENDER)?),
                hex::encode(encode_uint(42))
            ),
            block_number: Some("0x10".to_owned()),
            transaction_hash: Some("0xfeed".to_owned()),
        };

        let minted = decode_minted(event, &log)?;
        assert_eq!(minted.from, WalletAddress(SENDER.to_owned()));
        assert_eq!(minted.token_id, 42);
        assert_eq!(minted.block_number, Some(16));
        assert_eq!(minted.tx_hash, Some(TxHash("0xfeed".to_owned())));
        Ok(())
    }

    #[test]
    fn decodes_indexed_parameters_from_topics() -> anyhow::Result<()> {
        let abi = AbiDescriptor::from_json(
            r#"[{"type":"event","name":"Minted","inputs":[
                {"name":"to","type":"address","indexed":true},
                {"name":"id","type":"uint256","indexed":false}]}]"#,
        )?;
        let event = abi.event("Minted")?;
        let log = LogEntry {
            address: "0xc0".to_owned(),
            topics: vec![event.topic(), format!("0x{}", hex::encode(encode_address(SENDER)?))],
            data: format!("0x{}", hex::encode(encode_uint(3))),
            block_number: None,
            transaction_hash: None,
        };

        let minted = decode_minted(event, &log)?;
        assert_eq!(minted.from.0, SENDER);
        assert_eq!(minted.token_id, 3);
        Ok(())
    }

    #[test]
    fn truncated_data_is_rejected() -> anyhow::Result<()> {
        let abi = AbiDescriptor::bundled()?;
        let event = abi.event("NewEpicNFTMinted")?;
        let log = LogEntry {
            address: "0xc0".to_owned(),
            topics: vec![event.topic()],
            data: format!("0x{}", hex::encode(encode_address(SENDER)?)),
            block_number: None,
            transaction_hash: None,
        };
        assert!(decode_minted(event, &log).is_err());
        Ok(())
    }
}
