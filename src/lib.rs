//! Cross-chain transfer orchestration core
//!
//! Discovers legal transfer routes between chains, submits ICP transfers,
//! bridge transactions and multi-hop swaps to a remote execution
//! environment, tracks them to a terminal state, and serves a merged,
//! time-ordered history.
//!
//! All remote work goes through a [`channel::MessageChannel`]; the crate
//! never talks to a chain directly.

pub mod catalog;
pub mod channel;
pub mod composer;
pub mod config;
pub mod confirmation;
pub mod error;
pub mod history;
pub mod metrics;
pub mod selector;
pub mod telemetry;
pub mod transfer;

pub use error::{TransferError, TransferResult};
