//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! gitlab.rb-style source file
//!     → parser.rs (strict schema, unknown-key warnings)
//!     → model.rs ServiceConfig (immutable once validated)
//!     → validation.rs (semantic + certificate checks)
//!     → handed to the reconciler, replaced wholesale next cycle
//!
//! render.rs writes a ServiceConfig back out in the same format.
//!
//! On change:
//!     watcher.rs detects the edit
//!     → loader.rs parses the new file
//!     → a new reconciliation cycle starts
//! ```
//!
//! Reconciler settings (schema.rs) are a separate TOML file.

pub mod loader;
pub mod model;
pub mod parser;
pub mod render;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use model::{ProxyConfig, ServiceConfig, ServiceKind};
pub use parser::{parse, MalformedConfig, ParseWarning, ParsedConfig};
pub use render::render;
pub use schema::ReconcilerSettings;
pub use validation::{listener_conflicts, validate_config, ValidationError};
