//! Connector capability traits

use async_trait::async_trait;

use crate::error::ConnectorResult;
use crate::query::SelectQuery;
use crate::row::{FieldMap, RowIter};

/// Base trait for all connectors.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Get the display name for this connector instance.
    fn display_name(&self) -> &str;

    /// Test the connection to the external system.
    ///
    /// Returns `Ok(())` if a connection can be established.
    async fn test_connection(&self) -> ConnectorResult<()>;

    /// Release pools and connections.
    async fn dispose(&self) -> ConnectorResult<()>;
}

/// Read access to an external tabular source.
///
/// Transactions are not required; each call stands on its own.
#[async_trait]
pub trait ExternalSource: Connector {
    /// Run a read query. Rows are decoded lazily as the iterator advances.
    async fn query(&self, query: &SelectQuery) -> ConnectorResult<RowIter>;

    /// Count rows in a table.
    async fn count_rows(&self, table: &str) -> ConnectorResult<u64>;

    /// Column names of a table as the source reports them.
    ///
    /// Returns an empty list when the table has no rows. The default reads
    /// them from a row, so they come back lower-cased; implementations that
    /// can see the real names should override it.
    async fn list_columns(&self, table: &str) -> ConnectorResult<Vec<String>> {
        let mut rows = self.query(&SelectQuery::new(table)).await?;
        Ok(rows
            .next()
            .map(|row: FieldMap| row.columns().map(str::to_string).collect())
            .unwrap_or_default())
    }
}
