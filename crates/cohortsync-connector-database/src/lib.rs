//! # Database Connector
//!
//! Reads cohort rows from an external relational database.
//!
//! PostgreSQL, MySQL and SQLite are reached through a single `sqlx` `Any`
//! pool holding one connection, since a sync pass issues its queries strictly
//! one after another.
//!
//! ## Example
//!
//! ```ignore
//! use cohortsync_connector::prelude::*;
//! use cohortsync_connector_database::{DatabaseConfig, DatabaseConnector, DatabaseDriver};
//!
//! let config = DatabaseConfig::new(DatabaseDriver::MySql, "sis.example.com", "sis", "reader")
//!     .with_password("secret")
//!     .with_encoding("latin1");
//!
//! let connector = DatabaseConnector::new(config)?;
//! let rows = connector.query(&SelectQuery::new("ext_cohorts")).await?;
//! ```

pub mod config;
pub mod connector;

pub use config::{DatabaseConfig, DatabaseDriver};
pub use connector::DatabaseConnector;
