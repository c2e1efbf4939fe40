//! Chain primitives and the parsers that map their errors into the crate's
//! error codes.

pub use alloy_primitives::{Address, Selector, TxHash};

use alloy_primitives::keccak256;

use crate::error::{Error, Result};

/// Parse an address named `key` (an env var, config field or RPC result).
pub fn parse_address(key: &str, value: &str) -> Result<Address> {
    value
        .trim()
        .parse::<Address>()
        .map_err(|e| Error::config_invalid_value(key, Some(value.to_string()), e.to_string()))
}

pub fn parse_selector(key: &str, value: &str) -> Result<Selector> {
    value
        .trim()
        .parse::<Selector>()
        .map_err(|e| Error::config_invalid_value(key, Some(value.to_string()), e.to_string()))
}

pub fn parse_tx_hash(key: &str, value: &str) -> Result<TxHash> {
    value
        .trim()
        .parse::<TxHash>()
        .map_err(|e| Error::config_invalid_value(key, Some(value.to_string()), e.to_string()))
}

/// First four bytes of the keccak-256 hash of a canonical signature.
pub fn selector_of(signature: &str) -> Selector {
    Selector::from_slice(&keccak256(signature.as_bytes())[..4])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_parse_ignores_case() {
        let mixed = parse_address("a", "0x5FbDB2315678afecb367f032d93F642f64180aa3").unwrap();
        let lower = parse_address("a", "0x5fbdb2315678afecb367f032d93f642f64180aa3").unwrap();
        assert_eq!(mixed, lower);
    }

    #[test]
    fn address_rejects_wrong_length() {
        let err = parse_address("SAFE", "0x1234").unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_value");
        assert_eq!(err.details["key"], "SAFE");
    }

    #[test]
    fn address_rejects_non_hex() {
        assert!(parse_address("a", "0xzz00000000000000000000000000000000000000").is_err());
    }

    #[test]
    fn selector_parses_literal() {
        let sel = parse_selector("selector", "0x4816cbdf").unwrap();
        assert_eq!(sel.as_slice(), &[0x48, 0x16, 0xcb, 0xdf]);
    }

    #[test]
    fn selector_of_matches_known_value() {
        assert_eq!(selector_of("transfer(address,uint256)").to_string(), "0xa9059cbb");
    }

    #[test]
    fn addresses_serialize_as_hex_strings() {
        let addr = Address::repeat_byte(0x11);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json.to_lowercase(), format!("\"0x{}\"", "11".repeat(20)));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
