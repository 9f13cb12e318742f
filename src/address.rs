//! Address Validation
//!
//! Pure EIP-55 validation for recipient addresses. An address must be `0x`
//! followed by 40 hex characters; a mixed-case address must additionally
//! match the Keccak-256 checksum casing. All-lowercase and all-uppercase
//! forms carry no checksum and are accepted on shape alone.

use sha3::{Digest, Keccak256};

/// Validates an EVM address, including the EIP-55 checksum when one is
/// encoded in the casing.
///
/// # Arguments
///
/// * `address` - Candidate address string
///
/// # Returns
///
/// `true` if the address is well-formed and checksum-consistent
pub fn is_valid_address(address: &str) -> bool {
    let hex_part = match address.strip_prefix("0x") {
        Some(rest) => rest,
        None => return false,
    };
    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return false;
    }

    let has_upper = hex_part.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = hex_part.chars().any(|c| c.is_ascii_lowercase());
    if !(has_upper && has_lower) {
        // Single-case addresses encode no checksum.
        return true;
    }

    checksum_encode(hex_part) == hex_part
}

/// Produces the EIP-55 checksum casing for a 40-character hex string.
fn checksum_encode(hex_part: &str) -> String {
    let lower = hex_part.to_ascii_lowercase();
    let hash = Keccak256::digest(lower.as_bytes());

    lower
        .chars()
        .enumerate()
        .map(|(i, c)| {
            let nibble = if i % 2 == 0 {
                hash[i / 2] >> 4
            } else {
                hash[i / 2] & 0x0f
            };
            if c.is_ascii_alphabetic() && nibble >= 8 {
                c.to_ascii_uppercase()
            } else {
                c
            }
        })
        .collect()
}
