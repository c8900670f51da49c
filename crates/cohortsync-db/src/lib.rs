//! # cohortsync-db
//!
//! PostgreSQL [`LocalStore`](cohortsync_engine::LocalStore) for cohort sync,
//! with embedded migrations.
//!
//! ```rust,ignore
//! use cohortsync_db::{connect, run_migrations, PgLocalStore, PoolSettings};
//!
//! let pool = connect(&database_url, PoolSettings::default()).await?;
//! run_migrations(&pool).await?;
//! let store = PgLocalStore::new(pool).with_batch_size(500);
//! ```

pub mod error;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod store;

pub use error::DbError;
pub use migrations::run_migrations;
pub use pool::{connect, PoolSettings};
pub use store::PgLocalStore;
