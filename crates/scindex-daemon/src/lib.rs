//! scindex-daemon: daemon-mode indexing pipeline for SCIndex.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use scindex_daemon::IndexerBuilder;
//! # use scindex_core::DaemonClient;
//! # async fn example(client: Arc<dyn DaemonClient>) -> Result<(), scindex_core::IndexerError> {
//! let indexer = IndexerBuilder::new()
//!     .search_filter(["Function Initialize"])
//!     .client(client)
//!     .build()?;
//! indexer.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod fastsync;
pub mod gap;
pub mod pipeline;
pub mod registry;

#[cfg(test)]
mod testutil;

pub use builder::IndexerBuilder;
pub use fastsync::{parse_registry, Fastsync, FastsyncReport};
pub use gap::find_lowest_available;
pub use pipeline::{BatchReport, Indexer};
pub use registry::{Admission, ContractRegistry};
