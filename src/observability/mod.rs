//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! presentation / message / registry / dispatch produce:
//!     → tracing events with structured fields
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout, pretty or json)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - The library only emits; the binary installs the subscriber and exporter
//! - Metric updates go through the `metrics` facade and are no-ops without a recorder

pub mod logging;
pub mod metrics;
