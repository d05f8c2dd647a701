//! tk-farm Config
//!
//! This crate contains the serializable configuration for the tk-farm
//! frontend stack. A config describes *where* the stack is deployed
//! (account, region) and the few knobs the stack exposes: the removal policy
//! and the root document. It knows nothing about resources.
//!
//! Configuration can be loaded from:
//! - JSON files (via CLI with `--config=stack.json`)
//! - Defaults that match the hosted tk-farm deployment
//!
//! Every resource name is derived from `(prefix, account_id)` by the pure
//! functions on [`StackConfig`], so two configs that compare equal always
//! produce the same names.

mod config;
mod enums;
mod error;

pub use config::StackConfig;
pub use enums::RemovalPolicy;
pub use error::ConfigError;
