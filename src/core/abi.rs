//! Constructor and call arguments.
//!
//! [`Token`] is the serializable form kept in deployment records. Encoding
//! goes through `alloy-dyn-abi`.

use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{B256, U256};
use serde::{Deserialize, Serialize};

use crate::types::{self, Address, Selector};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Token {
    Address(Address),
    Uint(U256),
    Bytes4(Selector),
    String(String),
    Array(Vec<Token>),
}

impl Token {
    pub fn as_address(&self) -> Option<Address> {
        match self {
            Token::Address(addr) => Some(*addr),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Token]> {
        match self {
            Token::Array(items) => Some(items),
            _ => None,
        }
    }

    fn to_sol(&self) -> DynSolValue {
        match self {
            Token::Address(addr) => DynSolValue::Address(*addr),
            Token::Uint(value) => DynSolValue::Uint(*value, 256),
            Token::Bytes4(sel) => DynSolValue::FixedBytes(B256::right_padding_from(sel.as_slice()), 4),
            Token::String(s) => DynSolValue::String(s.clone()),
            Token::Array(items) => DynSolValue::Array(items.iter().map(Token::to_sol).collect()),
        }
    }
}

impl From<Address> for Token {
    fn from(addr: Address) -> Self {
        Token::Address(addr)
    }
}

/// Encode a tuple of tokens as function or constructor parameters.
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    DynSolValue::Tuple(tokens.iter().map(Token::to_sol).collect()).abi_encode_params()
}

/// Calldata for `signature` called with `args`.
pub fn encode_call(signature: &str, args: &[Token]) -> Vec<u8> {
    let mut data = types::selector_of(signature).to_vec();
    data.extend(encode(args));
    data
}
