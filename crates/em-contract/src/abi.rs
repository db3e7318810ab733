//! Static ABI descriptor: enough of the Solidity JSON ABI to build calldata
//! for argument-less functions and decode static-typed return words and logs.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tiny_keccak::{Hasher, Keccak};

const BUNDLED_ABI: &str = include_str!("../abi/EpicNft.json");

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AbiError {
    #[error("invalid ABI json: {0}")]
    Parse(String),
    #[error("ABI has no function named '{0}'")]
    MissingFunction(String),
    #[error("ABI has no event named '{0}'")]
    MissingEvent(String),
    #[error("malformed abi word: {0}")]
    Word(String),
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AbiParam {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub indexed: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AbiItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<AbiParam>,
    #[serde(default)]
    pub outputs: Vec<AbiParam>,
    #[serde(default)]
    pub state_mutability: Option<String>,
}

impl AbiItem {
    /// Canonical signature, e.g. `NewEpicNFTMinted(address,uint256)`.
    pub fn signature(&self) -> String {
        let types: Vec<&str> = self.inputs.iter().map(|p| p.kind.as_str()).collect();
        format!("{}({})", self.name, types.join(","))
    }

    /// 4-byte function selector as `0x`-prefixed hex.
    pub fn selector(&self) -> String {
        let hash = keccak256(self.signature().as_bytes());
        format!("0x{}", hex::encode(&hash[..4]))
    }

    /// Event topic 0 as `0x`-prefixed hex.
    pub fn topic(&self) -> String {
        format!("0x{}", hex::encode(keccak256(self.signature().as_bytes())))
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.state_mutability.as_deref(), Some("view") | Some("pure"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbiDescriptor {
    items: Vec<AbiItem>,
}

impl AbiDescriptor {
    /// Accepts a bare ABI array or a build artifact with an `abi` member.
    pub fn from_json(raw: &str) -> Result<Self, AbiError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|err| AbiError::Parse(err.to_string()))?;
        let abi = match value {
            Value::Array(_) => value,
            Value::Object(mut map) => map
                .remove("abi")
                .ok_or_else(|| AbiError::Parse("object has no 'abi' member".to_owned()))?,
            other => return Err(AbiError::Parse(format!("unexpected top-level {other}"))),
        };
        let items: Vec<AbiItem> =
            serde_json::from_value(abi).map_err(|err| AbiError::Parse(err.to_string()))?;
        Ok(Self { items })
    }

    /// Descriptor shipped with the crate.
    pub fn bundled() -> Result<Self, AbiError> {
        Self::from_json(BUNDLED_ABI)
    }

    pub fn function(&self, name: &str) -> Result<&AbiItem, AbiError> {
        self.items
            .iter()
            .find(|item| item.kind == "function" && item.name == name)
            .ok_or_else(|| AbiError::MissingFunction(name.to_owned()))
    }

    pub fn event(&self, name: &str) -> Result<&AbiItem, AbiError> {
        self.items
            .iter()
            .find(|item| item.kind == "event" && item.name == name)
            .ok_or_else(|| AbiError::MissingEvent(name.to_owned()))
    }
}

pub fn keccak256(input: &[u8]) -> [u8; 32] {
    let mut hash = [0u8; 32];
    let mut keccak = Keccak::v256();
    keccak.update(input);
    keccak.finalize(&mut hash);
    hash
}

/// Splits ABI-encoded hex into 32-byte words.
pub fn words(data: &str) -> Result<Vec<[u8; 32]>, AbiError> {
    let stripped = data.strip_prefix("0x").unwrap_or(data);
    let bytes = hex::decode(stripped).map_err(|err| AbiError::Word(err.to_string()))?;
    if bytes.len() % 32 != 0 {
        return Err(AbiError::Word(format!("{} bytes is not word aligned", bytes.len())));
    }
    Ok(bytes
        .chunks_exact(32)
        .map(|chunk| {
            let mut word = [0u8; 32];
            word.copy_from_slice(chunk);
            word
        })
        .collect())
}

/// `uint256` word narrowed to `u64`; larger values are an error.
pub fn decode_uint(word: &[u8; 32]) -> Result<u64, AbiError> {
    if word[..24].iter().any(|b| *b != 0) {
        return Err(AbiError::Word("uint256 does not fit in u64".to_owned()));
    }
    let mut low = [0u8; 8];
    low.copy_from_slice(&word[24..]);
    Ok(u64::from_be_bytes(low))
}

pub fn decode_address(word: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(&word[12..]))
}

pub fn encode_uint(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Left-pads a 20-byte hex address into a word.
pub fn encode_address(address: &str) -> Result<[u8; 32], AbiError> {
    let stripped = address.strip_prefix("0x").unwrap_or(address);
    let bytes = hex::decode(stripped).map_err(|err| AbiError::Word(err.to_string()))?;
    if bytes.len() != 20 {
        return Err(AbiError::Word(format!("address has {} bytes", bytes.len())));
    }
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(&bytes);
    Ok(word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_descriptor_names_the_workflow_surface() -> anyhow::Result<()> {
        let abi = AbiDescriptor::bundled()?;
        assert!(!abi.function("mint")?.is_read_only());
        assert!(abi.function("getTotalMintedSoFar")?.is_read_only());
        assert_eq!(
            abi.event("NewEpicNFTMinted")?.signature(),
            "NewEpicNFTMinted(address,uint256)"
        );
        Ok(())
    }

    #[test]
    fn selectors_match_known_values() -> anyhow::Result<()> {
        let abi = AbiDescriptor::from_json(
            r#"[{"type":"function","name":"transfer","inputs":[
                {"name":"to","type":"address"},{"name":"amount","type":"uint256"}]}]"#,
        )?;
        assert_eq!(abi.function("transfer")?.selector(), "0xa9059cbb");
        Ok(())
    }

    #[test]
    fn event_topic_is_full_hash() -> anyhow::Result<()> {
        let abi = AbiDescriptor::from_json(
            r#"[{"type":"event","name":"Transfer","inputs":[
                {"name":"from","type":"address","indexed":true},
                {"name":"to","type":"address","indexed":true},
                {"name":"value","type":"uint256","indexed":false}]}]"#,
        )?;
        assert_eq!(
            abi.event("Transfer")?.topic(),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
        Ok(())
    }

    #[test]
    fn missing_members_are_reported_by_name() -> anyhow::Result<()> {
        let abi = AbiDescriptor::bundled()?;
        assert_eq!(
            abi.function("makeAnEpicNFT").unwrap_err(),
            AbiError::MissingFunction("makeAnEpicNFT".to_owned())
        );
        assert!(AbiDescriptor::from_json("{\"contractName\":\"x\"}").is_err());
        Ok(())
    }

    #[test]
    fn uint_words_narrow_to_u64() -> anyhow::Result<()> {
        let data = format!("0x{}", hex::encode(encode_uint(7)));
        let parsed = words(&data)?;
        assert_eq!(decode_uint(&parsed[0])?, 7);

        let mut big = [0u8; 32];
        big[0] = 1;
        assert!(decode_uint(&big).is_err());
        Ok(())
    }

    #[test]
    fn address_words_keep_low_twenty_bytes() -> anyhow::Result<()> {
        let addr = "0x65813c8b5a99deca557b6a08749b6cd78c0a4cf6";
        let word = encode_address(addr)?;
        assert_eq!(decode_address(&word), addr);
        assert!(words("0x1234").is_err());
        Ok(())
    }
}
