//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events, one span per cycle)
//!     → metrics.rs (cycle outcomes, applied operations, rollbacks)
//!
//! Consumers:
//!     → stderr (fmt layer)
//!     → Prometheus scrape endpoint (optional)
//! ```

pub mod logging;
pub mod metrics;
