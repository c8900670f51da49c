//! # Connector Framework
//!
//! Core abstractions for reading cohort data from an external tabular source.
//!
//! The reconciliation engine never talks SQL directly. It describes what it
//! wants as a [`SelectQuery`] and receives rows as [`FieldMap`] values whose
//! keys are already lower-cased, so downstream code never re-normalizes.
//!
//! ## Crate Organization
//!
//! - [`error`] - Error types with transient/permanent classification
//! - [`config`] - Connection settings and the [`ConnectorConfig`] trait
//! - [`row`] - Case-insensitive row value objects ([`FieldName`], [`FieldMap`])
//! - [`query`] - `SELECT` builder and literal escaping ([`QuotingStyle`])
//! - [`encoding`] - Character set transcoding ([`TextCodec`])
//! - [`traits`] - [`Connector`] and [`ExternalSource`] capability traits

pub mod config;
pub mod encoding;
pub mod error;
pub mod query;
pub mod row;
pub mod traits;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{ConfigError, ConnectionSettings, ConnectorConfig};
    pub use crate::encoding::TextCodec;
    pub use crate::error::{ConnectorError, ConnectorResult};
    pub use crate::query::{QuotingStyle, SelectQuery};
    pub use crate::row::{FieldMap, FieldName, RowIter};
    pub use crate::traits::{Connector, ExternalSource};
}

pub use config::{ConfigError, ConnectionSettings, ConnectorConfig};
pub use encoding::TextCodec;
pub use error::{ConnectorError, ConnectorResult};
pub use query::{QuotingStyle, SelectQuery};
pub use row::{FieldMap, FieldName, RowIter};
pub use traits::{Connector, ExternalSource};

// Re-export async_trait for connector implementors
pub use async_trait::async_trait;
