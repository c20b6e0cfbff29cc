//! CCTP v1 message format types
//!
//! Every `MessageSent` event carries a fixed-layout binary header followed by
//! a message body. The relayer only needs the header fields for routing and
//! the raw bytes for attestation lookup and re-broadcast.
//!
//! Reference: <https://developers.circle.com/cctp/technical-guide>

use alloy_primitives::{Bytes, FixedBytes, U256};
use serde::{Deserialize, Serialize};

use crate::error::{RelayerError, Result};

use super::Domain;

/// CCTP v1 message
///
/// # Format
///
/// - version: uint32 (4 bytes)
/// - sourceDomain: uint32 (4 bytes)
/// - destinationDomain: uint32 (4 bytes)
/// - nonce: uint64 (8 bytes)
/// - sender: bytes32 (32 bytes)
/// - recipient: bytes32 (32 bytes)
/// - destinationCaller: bytes32 (32 bytes) - authorized caller on destination (0 = anyone)
/// - messageBody: dynamic bytes
///
/// Total fixed size: 4 + 4 + 4 + 8 + 32 + 32 + 32 = 116 bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message format version
    pub version: u32,
    /// Source blockchain domain
    pub source_domain: Domain,
    /// Destination blockchain domain
    pub destination_domain: Domain,
    /// Nonce unique per source domain
    pub nonce: u64,
    /// Address that sent the message (padded to 32 bytes)
    pub sender: FixedBytes<32>,
    /// Address the message is addressed to (padded to 32 bytes)
    pub recipient: FixedBytes<32>,
    /// Address authorized to receive the message on the destination (0 = anyone)
    pub destination_caller: FixedBytes<32>,
    /// Message body, interpreted by the recipient contract
    pub body: Bytes,
}

impl Message {
    /// Size of the message header in bytes
    pub const HEADER_SIZE: usize = 116;

    /// Decodes a message from raw `MessageSent` bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::HEADER_SIZE {
            return Err(RelayerError::MalformedMessage {
                reason: format!(
                    "message is {} bytes, expected at least {}",
                    bytes.len(),
                    Self::HEADER_SIZE
                ),
            });
        }

        let version = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let source_domain = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let destination_domain = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);

        let mut nonce_bytes = [0u8; 8];
        nonce_bytes.copy_from_slice(&bytes[12..20]);
        let nonce = u64::from_be_bytes(nonce_bytes);

        let sender = FixedBytes::from_slice(&bytes[20..52]);
        let recipient = FixedBytes::from_slice(&bytes[52..84]);
        let destination_caller = FixedBytes::from_slice(&bytes[84..116]);

        Ok(Self {
            version,
            source_domain: Domain(source_domain),
            destination_domain: Domain(destination_domain),
            nonce,
            sender,
            recipient,
            destination_caller,
            body: Bytes::copy_from_slice(&bytes[Self::HEADER_SIZE..]),
        })
    }

    /// Encodes the message back to its wire representation
    pub fn encode(&self) -> Bytes {
        let mut bytes = Vec::with_capacity(Self::HEADER_SIZE + self.body.len());

        bytes.extend_from_slice(&self.version.to_be_bytes());
        bytes.extend_from_slice(&self.source_domain.as_u32().to_be_bytes());
        bytes.extend_from_slice(&self.destination_domain.as_u32().to_be_bytes());
        bytes.extend_from_slice(&self.nonce.to_be_bytes());
        bytes.extend_from_slice(self.sender.as_slice());
        bytes.extend_from_slice(self.recipient.as_slice());
        bytes.extend_from_slice(self.destination_caller.as_slice());
        bytes.extend_from_slice(&self.body);

        Bytes::from(bytes)
    }
}

/// CCTP v1 burn message body
///
/// # Format
///
/// - version: uint32 (4 bytes)
/// - burnToken: bytes32 (32 bytes)
/// - mintRecipient: bytes32 (32 bytes)
/// - amount: uint256 (32 bytes)
/// - messageSender: bytes32 (32 bytes)
///
/// Total size: 4 + 32 + 32 + 32 + 32 = 132 bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurnMessage {
    /// Message body version
    pub version: u32,
    /// Address of the token burned on the source chain
    pub burn_token: FixedBytes<32>,
    /// Address that receives minted tokens on the destination chain
    pub mint_recipient: FixedBytes<32>,
    /// Amount burned (smallest unit)
    pub amount: U256,
    /// Address of the original depositor
    pub message_sender: FixedBytes<32>,
}

impl BurnMessage {
    /// Minimum size of the burn message body in bytes
    pub const MIN_SIZE: usize = 132;

    /// Decodes a burn message body
    ///
    /// Returns `None` if the bytes are too short to be a burn message.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::MIN_SIZE {
            return None;
        }

        let version = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let burn_token = FixedBytes::from_slice(&bytes[4..36]);
        let mint_recipient = FixedBytes::from_slice(&bytes[36..68]);
        let amount = U256::from_be_slice(&bytes[68..100]);
        let message_sender = FixedBytes::from_slice(&bytes[100..132]);

        Some(Self {
            version,
            burn_token,
            mint_recipient,
            amount,
            message_sender,
        })
    }

    /// Encodes the burn message body
    pub fn encode(&self) -> Bytes {
        let mut bytes = Vec::with_capacity(Self::MIN_SIZE);

        bytes.extend_from_slice(&self.version.to_be_bytes());
        bytes.extend_from_slice(self.burn_token.as_slice());
        bytes.extend_from_slice(self.mint_recipient.as_slice());
        bytes.extend_from_slice(&self.amount.to_be_bytes::<32>());
        bytes.extend_from_slice(self.message_sender.as_slice());

        Bytes::from(bytes)
    }
}

/// Kind of transfer a message represents
///
/// A burn message mints on the destination chain; anything else (metadata,
/// forwarding instructions) is relayed as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Mint,
    Forward,
}

impl MessageType {
    /// Classifies a message body: burn bodies are mints, everything else is
    /// treated as a forward.
    pub fn classify(body: &[u8]) -> Self {
        if BurnMessage::decode(body).is_some() {
            MessageType::Mint
        } else {
            MessageType::Forward
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageType::Mint => write!(f, "mint"),
            MessageType::Forward => write!(f, "forward"),
        }
    }
}
