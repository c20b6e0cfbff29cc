//! CCTP protocol types and definitions
//!
//! This module contains the protocol-level types the relayer deals in: domain
//! identifiers and the fixed-layout v1 message wire format.

mod domain;
mod message;

pub use domain::Domain;
pub use message::{BurnMessage, Message, MessageType};
