//! Database Connector implementation
//!
//! Implements [`ExternalSource`] over a `sqlx` `Any` pool. The driver is
//! chosen at runtime from the configuration, so one binary serves every
//! supported backend.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Column, Executor, Row};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use url::Url;

use cohortsync_connector::config::ConnectorConfig;
use cohortsync_connector::encoding::TextCodec;
use cohortsync_connector::error::{ConnectorError, ConnectorResult};
use cohortsync_connector::query::SelectQuery;
use cohortsync_connector::row::{FieldMap, RowIter};
use cohortsync_connector::traits::{Connector, ExternalSource};

use crate::config::{DatabaseConfig, DatabaseDriver};

/// Read-only connector for the external cohort database.
pub struct DatabaseConnector {
    /// Configuration.
    config: DatabaseConfig,

    /// Charset of the remote data.
    codec: TextCodec,

    /// Display name for this connector instance.
    display_name: String,

    /// Connection pool (lazily initialized).
    pool: Arc<RwLock<Option<AnyPool>>>,

    /// Whether the connector has been disposed.
    disposed: Arc<RwLock<bool>>,
}

impl std::fmt::Debug for DatabaseConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConnector")
            .field("config", &self.config.redacted())
            .field("display_name", &self.display_name)
            .finish()
    }
}

impl DatabaseConnector {
    /// Create a new database connector with the given configuration.
    ///
    /// No connection is opened until the first query.
    pub fn new(config: DatabaseConfig) -> ConnectorResult<Self> {
        config.validate()?;
        let codec = config.codec()?;

        sqlx::any::install_default_drivers();

        let display_name = if config.driver.is_networked() {
            format!(
                "{}: {}@{}/{}",
                config.driver.as_str(),
                config.username,
                config.host,
                config.database
            )
        } else {
            format!("{}: {}", config.driver.as_str(), config.host)
        };

        Ok(Self {
            config,
            codec,
            display_name,
            pool: Arc::new(RwLock::new(None)),
            disposed: Arc::new(RwLock::new(false)),
        })
    }

    /// The configuration this connector was built with.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Get a connection pool, creating one if necessary.
    async fn get_pool(&self) -> ConnectorResult<AnyPool> {
        if *self.disposed.read().await {
            return Err(ConnectorError::invalid_configuration(
                "Connector has been disposed",
            ));
        }

        {
            let pool_guard = self.pool.read().await;
            if let Some(ref pool) = *pool_guard {
                return Ok(pool.clone());
            }
        }

        let pool = self.create_pool().await?;

        {
            let mut pool_guard = self.pool.write().await;
            *pool_guard = Some(pool.clone());
        }

        Ok(pool)
    }

    /// Create a new connection pool.
    async fn create_pool(&self) -> ConnectorResult<AnyPool> {
        let url = self.build_connection_url()?;
        let timeout = self.config.connection.connection_timeout();

        debug!(driver = %self.config.driver, host = %self.config.host, "Creating external database pool");

        let setup_sql = self.config.setup_sql.clone();
        let log_statements = self.config.debug;

        let connect = AnyPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(timeout)
            .after_connect(move |conn, _meta| {
                let setup_sql = setup_sql.clone();
                Box::pin(async move {
                    if let Some(sql) = setup_sql {
                        if log_statements {
                            info!(sql = %sql, "External setup statement");
                        }
                        conn.execute(sql.as_str()).await?;
                    }
                    Ok(())
                })
            })
            .connect(&url);

        let pool = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| ConnectorError::ConnectionTimeout {
                timeout_secs: self.config.connection.connection_timeout_secs,
            })?
            .map_err(|e| {
                ConnectorError::connection_failed_with_source(
                    format!(
                        "Failed to connect to {} database at {}",
                        self.config.driver, self.config.host
                    ),
                    e,
                )
            })?;

        info!(
            driver = %self.config.driver,
            host = %self.config.host,
            "External database connection established"
        );

        Ok(pool)
    }

    /// Build the connection URL for `SQLx`.
    ///
    /// Credentials are percent-encoded by [`Url`].
    fn build_connection_url(&self) -> ConnectorResult<String> {
        let config = &self.config;

        if config.driver == DatabaseDriver::Sqlite {
            return Ok(if config.host == ":memory:" {
                "sqlite::memory:".to_string()
            } else {
                format!("sqlite://{}?mode=ro", config.host)
            });
        }

        let invalid = |what: &str| {
            ConnectorError::invalid_configuration(format!("cannot use {what} in a connection URL"))
        };

        let mut url = Url::parse(&format!("{}://localhost", config.driver.as_str()))
            .map_err(|_| invalid("driver"))?;
        url.set_host(Some(&config.host))
            .map_err(|_| invalid("host"))?;
        url.set_port(config.effective_port())
            .map_err(|()| invalid("port"))?;
        if !config.username.is_empty() {
            url.set_username(&config.username)
                .map_err(|()| invalid("username"))?;
        }
        if let Some(ref password) = config.password {
            url.set_password(Some(password))
                .map_err(|()| invalid("password"))?;
        }
        url.set_path(&config.database);

        Ok(url.into())
    }

    /// Execute a statement and collect its rows within the read timeout.
    async fn fetch_rows(&self, sql: &str) -> ConnectorResult<Vec<AnyRow>> {
        let pool = self.get_pool().await?;

        if self.config.debug {
            info!(sql = %sql, "External query");
        } else {
            debug!(sql = %sql, "External query");
        }

        tokio::time::timeout(
            self.config.connection.read_timeout(),
            sqlx::query(sql).fetch_all(&pool),
        )
        .await
        .map_err(|_| ConnectorError::ReadTimeout {
            timeout_secs: self.config.connection.read_timeout_secs,
        })?
        .map_err(|e| ConnectorError::query_failed_with_source(format!("'{sql}' failed"), e))
    }

    /// Convert a row into a [`FieldMap`]. NULL columns are left out.
    fn row_to_field_map(row: &AnyRow, codec: TextCodec) -> FieldMap {
        let mut fields = FieldMap::new();
        for column in row.columns() {
            if let Some(value) = Self::column_text(row, column.ordinal(), codec) {
                fields.insert(column.name(), value);
            }
        }
        fields
    }

    /// Render one column as text, whatever its SQL type.
    fn column_text(row: &AnyRow, index: usize, codec: TextCodec) -> Option<String> {
        if let Ok(val) = row.try_get::<Option<String>, _>(index) {
            return val;
        }
        if let Ok(val) = row.try_get::<Option<Vec<u8>>, _>(index) {
            return val.map(|bytes| codec.decode(&bytes));
        }
        if let Ok(val) = row.try_get::<Option<i64>, _>(index) {
            return val.map(|n| n.to_string());
        }
        if let Ok(val) = row.try_get::<Option<i32>, _>(index) {
            return val.map(|n| n.to_string());
        }
        if let Ok(val) = row.try_get::<Option<f64>, _>(index) {
            return val.map(|n| n.to_string());
        }
        if let Ok(val) = row.try_get::<Option<bool>, _>(index) {
            return val.map(|b| if b { "1" } else { "0" }.to_string());
        }
        None
    }
}

#[async_trait]
impl Connector for DatabaseConnector {
    fn display_name(&self) -> &str {
        &self.display_name
    }

    #[instrument(skip(self))]
    async fn test_connection(&self) -> ConnectorResult<()> {
        self.fetch_rows("SELECT 1").await.map_err(|e| match e {
            ConnectorError::QueryFailed { message, source } => {
                ConnectorError::ConnectionFailed { message, source }
            }
            other => other,
        })?;

        info!(
            driver = %self.config.driver,
            host = %self.config.host,
            "External database connection test successful"
        );

        Ok(())
    }

    async fn dispose(&self) -> ConnectorResult<()> {
        *self.disposed.write().await = true;

        let mut pool_guard = self.pool.write().await;
        if let Some(pool) = pool_guard.take() {
            pool.close().await;
        }

        info!("External database connector disposed");
        Ok(())
    }
}

#[async_trait]
impl ExternalSource for DatabaseConnector {
    #[instrument(skip(self, query), fields(table = %query.table()))]
    async fn query(&self, query: &SelectQuery) -> ConnectorResult<RowIter> {
        let codec = self.codec;
        let sql = query.to_sql_with(self.config.quoting, |value| codec.narrow(value));
        let rows = self.fetch_rows(&sql).await?;

        debug!(row_count = rows.len(), "External query complete");

        Ok(Box::new(
            rows.into_iter()
                .map(move |row| Self::row_to_field_map(&row, codec)),
        ))
    }

    #[instrument(skip(self))]
    async fn count_rows(&self, table: &str) -> ConnectorResult<u64> {
        let rows = self
            .fetch_rows(&format!("SELECT COUNT(*) FROM {table}"))
            .await?;
        let count = rows
            .first()
            .and_then(|row| row.try_get::<i64, _>(0).ok())
            .ok_or_else(|| ConnectorError::InvalidData {
                message: format!("COUNT(*) on {table} returned no number"),
            })?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    #[instrument(skip(self))]
    async fn list_columns(&self, table: &str) -> ConnectorResult<Vec<String>> {
        let rows = self
            .fetch_rows(&format!("SELECT * FROM {table} LIMIT 1"))
            .await?;
        Ok(rows
            .first()
            .map(|row| {
                row.columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect()
            })
            .unwrap_or_default())
    }
}
