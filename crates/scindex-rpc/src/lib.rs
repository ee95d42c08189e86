//! scindex-rpc: daemon transport for SCIndex.
//!
//! # Features
//! - JSON-RPC 2.0 over one WebSocket channel, requests multiplexed by id
//! - Bounded retry (5 attempts, 1 s apart by default)
//! - Typed "height not found" errors instead of message matching at call sites
//! - `DeroDaemonClient` implementing `scindex_core::DaemonClient`
//! - `HeightPoller` background task publishing the chain height

pub mod client;
pub mod dero;
pub mod error;
pub mod poller;
pub mod request;
pub mod retry;

pub use client::WsRpcClient;
pub use dero::DeroDaemonClient;
pub use error::TransportError;
pub use poller::{HeightPoller, PollDecision};
pub use retry::{RetryConfig, RetryPolicy};
