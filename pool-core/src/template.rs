//! Daemon block-template snapshot types.
//!
//! [`BlockTemplate`] is the immutable input the daemon-polling collaborator
//! hands to the job manager. Field names follow the daemon's JSON so the
//! snapshot deserializes straight out of a `getblocktemplate` response; the
//! core itself never talks to the daemon.

use serde::{Deserialize, Serialize};

/// One transaction entry from the daemon template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateTransaction {
    /// Raw serialized transaction, hex.
    pub data: String,

    /// Transaction hash, hex.
    pub hash: String,
}

/// Block-template snapshot from the upstream daemon.
///
/// Immutable once handed to the core; every derived value (target,
/// difficulty, serialized headers) is computed from this snapshot at job
/// construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockTemplate {
    /// Height of the block being worked on.
    pub height: u32,

    /// Compact difficulty bits, hex.
    pub bits: String,

    /// Hash of the current chain tip, hex.
    #[serde(rename = "previousblockhash")]
    pub previous_block_hash: String,

    /// Template timestamp (Unix epoch seconds).
    #[serde(rename = "curtime")]
    pub cur_time: u32,

    /// Ordered transaction list for the block.
    #[serde(default)]
    pub transactions: Vec<TemplateTransaction>,

    /// Total coinbase reward in base units.
    #[serde(rename = "coinbasevalue")]
    pub coinbase_value: u64,

    /// Explicit target, hex. Overrides the bits-derived target when present.
    #[serde(default)]
    pub target: Option<String>,
}

/// Splits the coinbase (generation) transaction around the extranonce bytes.
///
/// Building the payout structure requires wallet and recipient knowledge that
/// lives outside this core, so the splitter is injected. Implementations
/// return the serialized transaction halves before and after the point where
/// `placeholder.len()` bytes of extranonce will be inserted.
pub trait GenerationSplitter {
    fn split_generation(&self, template: &BlockTemplate, placeholder: &[u8]) -> (Vec<u8>, Vec<u8>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserializes_daemon_field_names() {
        let json = r#"{
            "height": 700000,
            "bits": "1b3f1448",
            "previousblockhash": "9a6a0fed5b0d6dd78323e63bf1a32e0f2e228bd459e0a1e5f12ca49e0a3f789c",
            "curtime": 1634742080,
            "transactions": [
                {"data": "deadbeef", "hash": "00ff"}
            ],
            "coinbasevalue": 67500000000,
            "target": "00000000ffff0000000000000000000000000000000000000000000000000000"
        }"#;

        let template: BlockTemplate = serde_json::from_str(json).unwrap();
        assert_eq!(template.height, 700_000);
        assert_eq!(template.bits, "1b3f1448");
        assert_eq!(template.cur_time, 1_634_742_080);
        assert_eq!(template.transactions.len(), 1);
        assert_eq!(template.coinbase_value, 67_500_000_000);
        assert!(template.target.is_some());
    }

    #[test]
    fn test_optional_fields_default() {
        let json = r#"{
            "height": 1,
            "bits": "1d00ffff",
            "previousblockhash": "00",
            "curtime": 0,
            "coinbasevalue": 0
        }"#;

        let template: BlockTemplate = serde_json::from_str(json).unwrap();
        assert!(template.transactions.is_empty());
        assert!(template.target.is_none());
    }
}
