//! # cctp-relayer
//!
//! A relayer for Circle's Cross-Chain Transfer Protocol (CCTP) between EVM
//! chains and Noble.
//!
//! The relayer observes `MessageSent` events on each configured source
//! chain, polls Circle's Iris service for attestations, and delivers the
//! attested messages to their destination chains. Every message is tracked
//! through a small state machine (`Created -> Pending -> Attested ->
//! Complete`, with `Filtered` for messages policy rules exclude) that
//! survives listener restarts and transient RPC failures.
//!
//! ## Architecture
//!
//! - [`chain`] - one adapter per network (EVM and Noble built in) exposing
//!   listener, broadcaster and introspection operations behind
//!   [`chain::ChainAdapter`]
//! - [`processor`] - the worker pool draining the processing queue and
//!   advancing each transaction's messages
//! - [`attestation`] - the stateless Iris polling client
//! - [`state`] - message lifecycle types and the in-memory state store
//! - [`api`] - the read-only transaction lookup endpoint
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use cctp_relayer::{app, Config};
//!
//! # async fn example() -> Result<(), cctp_relayer::RelayerError> {
//! let config = Config::load(Path::new("config.toml"))?;
//! app::run(config).await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod app;
pub mod attestation;
pub mod chain;
pub mod config;
mod error;
pub mod processor;
pub mod protocol;
pub mod sequence;
pub mod state;

// Public for integration tests and downstream test harnesses
pub mod testing;

pub use attestation::{AttestationClient, AttestationResponse, AttestationStatus, IrisClient};
pub use chain::{ChainAdapter, Registry};
pub use config::Config;
pub use error::{RelayerError, Result};
pub use processor::Processor;
pub use protocol::{BurnMessage, Domain, Message, MessageType};
pub use sequence::SequenceMap;
pub use state::{MessageState, StateStore, Status, TxState};
