use thiserror::Error;

use crate::protocol::Domain;
use crate::state::Status;

#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("RPC error: {0}")]
    Rpc(#[from] alloy_json_rpc::RpcError<alloy_transport::TransportErrorKind>),

    #[error("ABI encoding/decoding error: {0}")]
    Abi(#[from] alloy_sol_types::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("hex conversion error: {0}")]
    Hex(#[from] alloy_primitives::hex::FromHexError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("duplicate domain {domain} already registered by chain {chain}")]
    DuplicateDomain { domain: Domain, chain: String },

    #[error("no chain registered for domain {0}")]
    UnknownDomain(Domain),

    #[error("malformed message: {reason}")]
    MalformedMessage { reason: String },

    #[error("illegal status transition {from:?} -> {to:?}")]
    IllegalTransition { from: Status, to: Status },

    #[error("unknown message {lookup_id} in transaction {tx_hash}")]
    UnknownMessage { tx_hash: String, lookup_id: String },

    #[error("signing failed: {reason}")]
    Signing { reason: String },

    #[error("broadcast failed: {reason}")]
    Broadcast { reason: String },
}

pub type Result<T> = std::result::Result<T, RelayerError>;
