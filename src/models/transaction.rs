use serde::{Deserialize, Serialize};
use std::fmt;

/// A transaction as resolved from the chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub hash: String,
    pub from: String,
    /// Empty for contract creation
    pub to: String,
    /// Hex quantity as delivered by the node
    pub value: String,
    #[serde(rename = "blockNumber")]
    pub block_number: u64,
}

/// Reference to a chain block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockRef {
    pub number: u64,
    /// Hash as announced by the head feed; unknown for backfilled blocks
    pub hash: Option<String>,
}

impl BlockRef {
    pub fn new(number: u64, hash: impl Into<String>) -> Self {
        Self {
            number,
            hash: Some(hash.into()),
        }
    }

    pub fn from_number(number: u64) -> Self {
        Self { number, hash: None }
    }

    /// Block number as a JSON-RPC hex quantity
    pub fn hex_number(&self) -> String {
        format!("0x{:x}", self.number)
    }

    /// True when both references point at the same block. Hashes are only
    /// compared when both sides know theirs.
    pub fn is_same_block(&self, other: &BlockRef) -> bool {
        if self.number != other.number {
            return false;
        }
        match (&self.hash, &other.hash) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => true,
        }
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hash {
            Some(hash) => write!(f, "#{} ({})", self.number, hash),
            None => write!(f, "#{}", self.number),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchedAddress {
    pub address: String,
    pub subscriber_id: String,
}

/// One matched transaction, addressed to the watcher of `address`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub tx_hash: String,
    pub address: String,
    pub block_number: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_serialization() {
        let tx = Transaction {
            hash: "0xabc123".to_string(),
            from: "0x1111".to_string(),
            to: "0x2222".to_string(),
            value: "0xde0b6b3a7640000".to_string(),
            block_number: 12345,
        };

        let json = serde_json::to_string(&tx).expect("Failed to serialize");
        assert!(json.contains("\"blockNumber\":12345"));
        assert!(json.contains("\"from\":\"0x1111\""));

        let deserialized: Transaction = serde_json::from_str(&json).expect("Failed to deserialize");
        assert_eq!(tx, deserialized);
    }

    #[test]
    fn test_block_ref_hex_number() {
        assert_eq!(BlockRef::from_number(0).hex_number(), "0x0");
        assert_eq!(BlockRef::new(0x1b4, "0xabc").hex_number(), "0x1b4");
    }

    #[test]
    fn test_block_ref_same_block() {
        let a = BlockRef::new(10, "0xAbC");
        assert!(a.is_same_block(&BlockRef::new(10, "0xabc")));
        assert!(a.is_same_block(&BlockRef::from_number(10)));
        assert!(!a.is_same_block(&BlockRef::new(10, "0xdef")));
        assert!(!a.is_same_block(&BlockRef::new(11, "0xabc")));
    }

    #[test]
    fn test_block_ref_display() {
        assert_eq!(BlockRef::new(7, "0xfeed").to_string(), "#7 (0xfeed)");
        assert_eq!(BlockRef::from_number(7).to_string(), "#7");
    }
}
