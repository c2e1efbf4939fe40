//! Capability grants: which external calls a delegated wallet may make on
//! behalf of an asset owner.

use serde::{Deserialize, Serialize};

use crate::abi::Token;
use crate::error::{CapabilityConflictDetails, Error, Result};
use crate::types::{Address, Selector};

/// Method on the capability registry that appends grants for one asset.
pub const ADD_SIGNATURE: &str = "add(address,address[],bytes4[],string[])";

/// Identity of a grant. The label is metadata and not part of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantKey {
    pub asset: Address,
    pub target: Address,
    pub selector: Selector,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityGrant {
    pub asset: Address,
    pub target: Address,
    pub selector: Selector,
    pub label: String,
}

impl CapabilityGrant {
    pub fn key(&self) -> GrantKey {
        GrantKey {
            asset: self.asset,
            target: self.target,
            selector: self.selector,
        }
    }

    /// Error for a grant whose key is already held under `existing_label`.
    pub fn conflict(&self, existing_label: &str) -> Error {
        Error::capability_conflict(CapabilityConflictDetails {
            asset: self.asset.to_string(),
            target: self.target.to_string(),
            selector: self.selector.to_string(),
            existing_label: existing_label.to_string(),
            requested_label: self.label.clone(),
        })
    }
}

/// Zip parallel arrays into grants for `asset`.
pub fn zip_grants(
    action: &str,
    asset: Address,
    targets: &[Address],
    selectors: &[Selector],
    labels: &[String],
) -> Result<Vec<CapabilityGrant>> {
    if targets.len() != selectors.len() || targets.len() != labels.len() {
        return Err(Error::arity_mismatch(
            action,
            targets.len(),
            selectors.len(),
            labels.len(),
        ));
    }

    Ok(targets
        .iter()
        .zip(selectors)
        .zip(labels)
        .map(|((target, selector), label)| CapabilityGrant {
            asset,
            target: *target,
            selector: *selector,
            label: label.clone(),
        })
        .collect())
}

/// Arguments of one `add` call. All grants must share the same asset.
pub fn add_call_args(asset: Address, grants: &[CapabilityGrant]) -> Vec<Token> {
    vec![
        Token::Address(asset),
        Token::Array(grants.iter().map(|g| Token::Address(g.target)).collect()),
        Token::Array(grants.iter().map(|g| Token::Bytes4(g.selector)).collect()),
        Token::Array(grants.iter().map(|g| Token::String(g.label.clone())).collect()),
    ]
}

/// Inverse of [`add_call_args`], used by registry models.
pub fn parse_add_call(action: &str, args: &[Token]) -> Result<Vec<CapabilityGrant>> {
    let malformed = || {
        Error::validation_invalid_argument(
            action,
            format!("expected arguments of {}", ADD_SIGNATURE),
            None,
            None,
        )
    };

    let [asset, targets, selectors, labels] = args else {
        return Err(malformed());
    };
    let asset = asset.as_address().ok_or_else(malformed)?;

    let targets = targets
        .as_array()
        .ok_or_else(malformed)?
        .iter()
        .map(|t| t.as_address().ok_or_else(malformed))
        .collect::<Result<Vec<_>>>()?;
    let selectors = selectors
        .as_array()
        .ok_or_else(malformed)?
        .iter()
        .map(|t| match t {
            Token::Bytes4(sel) => Ok(*sel),
            _ => Err(malformed()),
        })
        .collect::<Result<Vec<_>>>()?;
    let labels = labels
        .as_array()
        .ok_or_else(malformed)?
        .iter()
        .map(|t| match t {
            Token::String(s) => Ok(s.clone()),
            _ => Err(malformed()),
        })
        .collect::<Result<Vec<_>>>()?;

    zip_grants(action, asset, &targets, &selectors, &labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn sel() -> Selector {
        "0x4816cbdf".parse().unwrap()
    }

    #[test]
    fn zip_requires_equal_lengths() {
        let err = zip_grants("grant", addr(1), &[addr(2)], &[sel()], &[]).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationArityMismatch);
        assert_eq!(err.details["labels"], 0);
    }

    #[test]
    fn key_ignores_label() {
        let a = CapabilityGrant {
            asset: addr(1),
            target: addr(2),
            selector: sel(),
            label: "one".to_string(),
        };
        let b = CapabilityGrant {
            label: "two".to_string(),
            ..a.clone()
        };
        assert_eq!(a.key(), b.key());
        assert_ne!(a, b);
    }

    #[test]
    fn add_call_args_parse_back() {
        let grants = zip_grants(
            "grant",
            addr(1),
            &[addr(2), addr(3)],
            &[sel(), sel()],
            &["a".to_string(), "b".to_string()],
        )
        .unwrap();
        let args = add_call_args(addr(1), &grants);
        assert_eq!(parse_add_call("grant", &args).unwrap(), grants);
    }

    #[test]
    fn parse_rejects_wrong_shape() {
        let err = parse_add_call("grant", &[Token::String("x".to_string())]).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationInvalidArgument);
    }
}
