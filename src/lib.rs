//! ipwatch library
//!
//! Tab-scoped IPv4 intelligence: records the public IPv4 addresses seen on
//! pages, grouped by the browser tab that loaded them, and enriches each
//! address with geolocation and abuse-reputation data.
//!
//! - Extract public IPv4 addresses from page text or HTML
//! - Keep per-tab sightings with source URLs in a durable store
//! - Enrich addresses from two independent lookup services concurrently,
//!   tolerating partial failures
//! - Drop a tab's data when the tab closes or the user clears it
//!
//! # Example
//!
//! ```rust,no_run
//! use ipwatch::{AddressStore, Enricher, Extractor, IpWatch, TabId};
//! use ipwatch::config::Config;
//!
//! # async fn demo() -> ipwatch::Result<()> {
//! let config = Config::default();
//! let service = IpWatch::new(
//!     AddressStore::in_memory(),
//!     Enricher::from_config(&config.network)?,
//!     Extractor::default(),
//! );
//!
//! service
//!     .ingest_page(TabId(7), "https://example.com", "resolver at 8.8.8.8")
//!     .await?;
//! for (ip, record) in service.tab_records(TabId(7)).await {
//!     println!("{ip} seen on {:?}", record.sources);
//! }
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod cli;
pub mod config;
pub mod enrich;
pub mod errors;
pub mod extract;
pub mod facade;
pub mod lifecycle;
pub mod messages;
pub mod model;
pub mod netutil;
pub mod output;
pub mod sources;
pub mod store;
pub mod structured_output;
pub mod styled_output;

// Re-export commonly used types and functions for convenience
pub use enrich::Enricher;
pub use errors::{ErrorCategory, IpWatchError, Result};
pub use extract::Extractor;
pub use facade::IpWatch;
pub use lifecycle::TabLifecycle;
pub use messages::{Request, Response, ScanSummary};
pub use model::{AbuseResult, EnrichmentResult, GeoResult, SightingRecord, TabId, TabRecords};
pub use netutil::{AddressPolicy, parse_ipv4};
pub use output::{OutputFormat, ThreatLevel};
pub use store::{AddressStore, MergeOutcome};
pub use styled_output::StyledFormatter;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
