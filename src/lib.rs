//! Ethereum Fund-Flow Tracer Library
//!
//! Follows value transfers outward from a root address through an
//! Etherscan-compatible explorer and produces a layered trace of classified
//! edges, suitable for AML investigation and flow visualisation.
//!
//! # Stages
//!
//! 1. **Fetching** ([`fetcher`]): paginated, rate-limit aware account history per address
//! 2. **Selection** ([`selector`]): keep everything, or only the top-K transfers by value
//! 3. **Classification** ([`classify`]): direction, unit conversion and fee per transaction
//! 4. **Traversal** ([`traversal`]): breadth-first expansion upstream, downstream or both
//! 5. **Output** ([`export`], [`render`]): CSV/Parquet traces and Sankey diagram data
//!
//! # Output Files
//!
//! - `{wallet6}_{YYYY-MM}_{YYYY-MM}.csv` / `.parquet`: classified edges
//! - `{wallet6}_{YYYY-MM}_{YYYY-MM}.sankey.json`: diagram nodes and links
//! - `{wallet6}_{YYYY-MM}_{YYYY-MM}.metadata.json`: run parameters and counts
//!
//! # Example
//!
//! ```no_run
//! use eth_flow_trace::config::TracerConfig;
//! use eth_flow_trace::explorer::EtherscanClient;
//! use eth_flow_trace::schemas::Trace;
//! use eth_flow_trace::traversal::TraceEngine;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = TracerConfig::load()?;
//!     config.trace.root_address = "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045".to_string();
//!     config.validate()?;
//!
//!     let client = EtherscanClient::new(config.explorer.clone())?;
//!     let engine = TraceEngine::new(client, &config.explorer, config.trace.clone());
//!     let mut trace = Trace::new();
//!     engine.run(&mut trace).await?;
//!     println!("Traced {} edges", trace.len());
//!     Ok(())
//! }
//! ```

pub mod classify;
pub mod config;
pub mod ethereum;
pub mod explorer;
pub mod export;
pub mod fetcher;
pub mod render;
pub mod schemas;
pub mod selector;
pub mod traversal;
pub mod window;

// Re-export commonly used types
pub use config::TracerConfig;
pub use schemas::{ClassifiedEdge, FlowDirection, RawTransaction, Trace, TraceDirection, TraceMetadata};
pub use traversal::{TraceEngine, TraceError, Traversal};
