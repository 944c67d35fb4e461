use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum AddressError {
    #[error("Address must be 40 hex characters long, got {0}")]
    Length(usize),
    #[error("Address contains non-hexadecimal characters")]
    NonHex,
}

/// Normalize an Ethereum address to lowercase without 0x prefix
pub fn normalize_address(address: &str) -> String {
    let addr = address.trim();
    if addr.starts_with("0x") || addr.starts_with("0X") {
        addr[2..].to_lowercase()
    } else {
        addr.to_lowercase()
    }
}

/// Validate that an address is a 20-byte hex string
pub fn validate_address(address: &str) -> Result<(), AddressError> {
    let normalized = normalize_address(address);

    if normalized.len() != 40 {
        return Err(AddressError::Length(normalized.len()));
    }

    if !normalized.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AddressError::NonHex);
    }

    Ok(())
}
