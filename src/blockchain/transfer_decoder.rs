use crate::error::ResolverError;
use crate::models::{normalize_address, validate_address, AddressError, Transaction};

use super::rpc_client::{parse_hex_to_u64, EthLog};

/// ERC-20 Transfer event signature: Transfer(address indexed from, address indexed to, uint256 value)
pub const TRANSFER_EVENT_SIGNATURE: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// Left-pad an address to a 32-byte topic for `eth_getLogs` filtering
pub fn address_topic(address: &str) -> Result<String, AddressError> {
    validate_address(address)?;
    Ok(format!("0x{:0>64}", normalize_address(address)))
}

/// Check if a log is an ERC-20 Transfer event with both parties indexed
pub fn is_transfer_log(log: &EthLog) -> bool {
    log.topics.len() == 3 && normalize_address(&log.topics[0]) == normalize_address(TRANSFER_EVENT_SIGNATURE)
}

/// Decode a Transfer event log into a transaction record.
///
/// `from` and `to` are the token sender and recipient, `value` is the raw
/// token amount as a hex quantity.
pub fn decode_transfer_log(log: &EthLog) -> Result<Transaction, ResolverError> {
    if !is_transfer_log(log) {
        return Err(ResolverError::Decode(format!(
            "Log {} is not a Transfer event",
            log.transaction_hash
        )));
    }

    let from = extract_address_from_topic(&log.topics[1])?;
    let to = extract_address_from_topic(&log.topics[2])?;
    let value = extract_amount_from_data(&log.data)?;
    let block_number = parse_hex_to_u64(&log.block_number)?;

    Ok(Transaction {
        hash: log.transaction_hash.clone(),
        from: format!("0x{}", from),
        to: format!("0x{}", to),
        value,
        block_number,
    })
}

/// Extract address from a 32-byte topic
fn extract_address_from_topic(topic: &str) -> Result<String, ResolverError> {
    let normalized_topic = normalize_address(topic);

    if normalized_topic.len() != 64 {
        return Err(ResolverError::Decode(format!(
            "Topic should be 64 characters, got {}",
            normalized_topic.len()
        )));
    }

    if !normalized_topic.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ResolverError::Decode("Topic contains non-hexadecimal characters".to_string()));
    }

    // Address is in the last 40 characters (20 bytes)
    let address = &normalized_topic[24..64];
    validate_address(address).map_err(|e| ResolverError::Decode(e.to_string()))?;

    Ok(address.to_string())
}

/// Data field as a minimal hex quantity
fn extract_amount_from_data(data: &str) -> Result<String, ResolverError> {
    let normalized_data = normalize_address(data);

    if normalized_data.len() != 64 {
        return Err(ResolverError::Decode(format!(
            "Data should be 64 characters, got {}",
            normalized_data.len()
        )));
    }

    if !normalized_data.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ResolverError::Decode("Data contains non-hexadecimal characters".to_string()));
    }

    let trimmed = normalized_data.trim_start_matches('0');
    if trimmed.is_empty() {
        Ok("0x0".to_string())
    } else {
        Ok(format!("0x{}", trimmed))
    }
}
