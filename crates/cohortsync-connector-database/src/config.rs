//! Database Connector configuration
//!
//! Connection parameters for the external cohort database.

use std::env::VarError;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use cohortsync_connector::config::{
    optional_var, parse_flag, parse_var, ConfigError, ConnectionSettings, ConnectorConfig,
};
use cohortsync_connector::encoding::TextCodec;
use cohortsync_connector::error::{ConnectorError, ConnectorResult};
use cohortsync_connector::query::QuotingStyle;

/// Database driver type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    #[default]
    Postgres,
    MySql,
    Sqlite,
}

impl DatabaseDriver {
    /// Get the default port for this driver.
    #[must_use]
    pub fn default_port(&self) -> Option<u16> {
        match self {
            DatabaseDriver::Postgres => Some(5432),
            DatabaseDriver::MySql => Some(3306),
            DatabaseDriver::Sqlite => None,
        }
    }

    /// Get the driver identifier string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseDriver::Postgres => "postgres",
            DatabaseDriver::MySql => "mysql",
            DatabaseDriver::Sqlite => "sqlite",
        }
    }

    /// Whether the driver addresses a server rather than a local file.
    #[must_use]
    pub fn is_networked(&self) -> bool {
        !matches!(self, DatabaseDriver::Sqlite)
    }
}

impl fmt::Display for DatabaseDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseDriver {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" | "pgsql" => Ok(DatabaseDriver::Postgres),
            "mysql" | "mysqli" | "mariadb" => Ok(DatabaseDriver::MySql),
            "sqlite" | "sqlite3" => Ok(DatabaseDriver::Sqlite),
            other => Err(format!("unsupported driver '{other}'")),
        }
    }
}

/// Configuration for the external database connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database driver type.
    pub driver: DatabaseDriver,

    /// Server hostname, or the database file path for SQLite.
    pub host: String,

    /// Server port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Database name.
    #[serde(default)]
    pub database: String,

    /// Username for authentication.
    #[serde(default)]
    pub username: String,

    /// Password for authentication.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Character set of the stored text, as a WHATWG label.
    #[serde(default = "default_encoding")]
    pub encoding: String,

    /// Statement executed on every new connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_sql: Option<String>,

    /// Literal escaping style.
    #[serde(default)]
    pub quoting: QuotingStyle,

    /// Log every statement at info level.
    #[serde(default)]
    pub debug: bool,

    /// Connection settings (timeouts).
    #[serde(default)]
    pub connection: ConnectionSettings,
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

impl DatabaseConfig {
    /// Create a new database config with required fields.
    pub fn new(
        driver: DatabaseDriver,
        host: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            driver,
            host: host.into(),
            port: None,
            database: database.into(),
            username: username.into(),
            password: None,
            encoding: default_encoding(),
            setup_sql: None,
            quoting: QuotingStyle::default(),
            debug: false,
            connection: ConnectionSettings::default(),
        }
    }

    /// Set password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the remote character set.
    pub fn with_encoding(mut self, label: impl Into<String>) -> Self {
        self.encoding = label.into();
        self
    }

    /// Set the per-connection setup statement.
    pub fn with_setup_sql(mut self, sql: impl Into<String>) -> Self {
        self.setup_sql = Some(sql.into());
        self
    }

    #[must_use]
    pub fn with_quoting(mut self, quoting: QuotingStyle) -> Self {
        self.quoting = quoting;
        self
    }

    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub fn with_connection(mut self, connection: ConnectionSettings) -> Self {
        self.connection = connection;
        self
    }

    /// Get the effective port (driver default if not specified).
    #[must_use]
    pub fn effective_port(&self) -> Option<u16> {
        self.port.or_else(|| self.driver.default_port())
    }

    /// Resolve the configured character set.
    pub fn codec(&self) -> ConnectorResult<TextCodec> {
        TextCodec::for_label(&self.encoding)
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load configuration from a custom variable reader.
    ///
    /// Only the driver and host are mandatory here; `validate` applies the
    /// driver-specific rules.
    pub fn from_reader<F>(reader: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let driver = optional_var(&reader, "COHORTSYNC_DB_DRIVER")
            .ok_or_else(|| ConfigError::MissingVar("COHORTSYNC_DB_DRIVER".into()))?
            .parse::<DatabaseDriver>()
            .map_err(|e| ConfigError::InvalidValue("COHORTSYNC_DB_DRIVER".into(), e))?;

        let host = optional_var(&reader, "COHORTSYNC_DB_HOST")
            .ok_or_else(|| ConfigError::MissingVar("COHORTSYNC_DB_HOST".into()))?;

        let port = match optional_var(&reader, "COHORTSYNC_DB_PORT") {
            Some(raw) => Some(raw.parse::<u16>().map_err(|e| {
                ConfigError::InvalidValue("COHORTSYNC_DB_PORT".into(), e.to_string())
            })?),
            None => None,
        };

        let quoting = match optional_var(&reader, "COHORTSYNC_DB_QUOTING") {
            Some(raw) => QuotingStyle::parse(&raw).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "COHORTSYNC_DB_QUOTING".into(),
                    format!("expected 'standard' or 'backslash', got '{raw}'"),
                )
            })?,
            None => QuotingStyle::default(),
        };

        let defaults = ConnectionSettings::default();
        let connection = ConnectionSettings::new()
            .with_connection_timeout(parse_var(
                &reader,
                "COHORTSYNC_DB_CONNECT_TIMEOUT_SECS",
                defaults.connection_timeout_secs,
            )?)
            .with_read_timeout(parse_var(
                &reader,
                "COHORTSYNC_DB_READ_TIMEOUT_SECS",
                defaults.read_timeout_secs,
            )?);

        Ok(Self {
            driver,
            host,
            port,
            database: optional_var(&reader, "COHORTSYNC_DB_NAME").unwrap_or_default(),
            username: optional_var(&reader, "COHORTSYNC_DB_USER").unwrap_or_default(),
            password: reader("COHORTSYNC_DB_PASSWORD").ok().filter(|p| !p.is_empty()),
            encoding: optional_var(&reader, "COHORTSYNC_DB_ENCODING")
                .unwrap_or_else(default_encoding),
            setup_sql: optional_var(&reader, "COHORTSYNC_DB_SETUP_SQL"),
            quoting,
            debug: parse_flag(&reader, "COHORTSYNC_DB_DEBUG", false)?,
            connection,
        })
    }
}

impl ConnectorConfig for DatabaseConfig {
    fn validate(&self) -> ConnectorResult<()> {
        if self.host.trim().is_empty() {
            return Err(ConnectorError::invalid_configuration("host is required"));
        }

        if self.driver.is_networked() && self.database.trim().is_empty() {
            return Err(ConnectorError::invalid_configuration(
                "database is required",
            ));
        }

        if self.connection.connection_timeout_secs == 0 || self.connection.read_timeout_secs == 0 {
            return Err(ConnectorError::invalid_configuration(
                "timeouts must be greater than zero",
            ));
        }

        self.codec()?;
        Ok(())
    }

    fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.password.is_some() {
            config.password = Some("***REDACTED***".to_string());
        }
        config
    }
}
