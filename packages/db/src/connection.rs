//! Database connection management with lazy initialization.

use std::sync::LazyLock;
use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect};
use surrealdb::opt::auth::Root;
use thiserror::Error;
use tokio::sync::OnceCell;

/// Global database instance using lazy initialization.
static DB: LazyLock<OnceCell<Surreal<Any>>> = LazyLock::new(OnceCell::new);

/// Database connection wrapper.
pub type Database = Surreal<Any>;

/// Database configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    /// Connection endpoint: "mem://", "file://path", "rocksdb://path" or a remote URL
    pub endpoint: String,
    /// Namespace to use
    pub namespace: String,
    /// Database name to use
    pub database: String,
    /// Optional root credentials for authentication
    pub credentials: Option<(String, String)>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            endpoint: "mem://".to_string(),
            namespace: "mail2cal".to_string(),
            database: "broker".to_string(),
            credentials: None,
        }
    }
}

impl DbConfig {
    /// Create a config for in-memory testing.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Create a config for file-based persistence.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            endpoint: format!("file://{}", path.into()),
            ..Default::default()
        }
    }

    /// Create a config for RocksDB persistence (requires rocksdb feature).
    pub fn rocksdb(path: impl Into<String>) -> Self {
        Self {
            endpoint: format!("rocksdb://{}", path.into()),
            ..Default::default()
        }
    }

    /// Derive a config from a pipeline broker URI.
    ///
    /// Accepts `mem://` (or `memory`), `file://`, `rocksdb://` and remote
    /// SurrealDB URLs (`ws`, `wss`, `http`, `https`).
    pub fn from_broker_uri(uri: &str) -> Result<Self, DbError> {
        let uri = uri.trim();
        if uri == "memory" || uri == "mem://" {
            return Ok(Self::memory());
        }

        let Some((scheme, rest)) = uri.split_once("://") else {
            return Err(DbError::InvalidEndpoint(uri.to_string()));
        };
        match scheme {
            "file" if !rest.is_empty() => Ok(Self::file(rest)),
            "rocksdb" if !rest.is_empty() => Ok(Self::rocksdb(rest)),
            "ws" | "wss" | "http" | "https" if !rest.is_empty() => Ok(Self {
                endpoint: uri.to_string(),
                ..Default::default()
            }),
            _ => Err(DbError::InvalidEndpoint(uri.to_string())),
        }
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the database name.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set root credentials for authentication.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database not initialized - call init_db first")]
    NotInitialized,
    #[error("Connection error: {0}")]
    Connection(#[from] surrealdb::Error),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unsupported endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Initialize the database connection.
///
/// The first successful call wins; later calls return the existing connection.
pub async fn init_db(config: DbConfig) -> Result<&'static Database, DbError> {
    DB.get_or_try_init(|| async {
        tracing::info!("Connecting to database: {}", config.endpoint);

        let db = connect(&config.endpoint).await?;

        // Authenticate if credentials provided
        if let Some((username, password)) = &config.credentials {
            db.signin(Root { username, password }).await?;
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await?;

        tracing::info!(
            "Connected to database: {}/{}",
            config.namespace,
            config.database
        );

        Ok(db)
    })
    .await
}

/// Get the database connection.
pub fn get_db() -> Result<&'static Database, DbError> {
    DB.get().ok_or(DbError::NotInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_uri_maps_to_endpoint() -> Result<(), DbError> {
        assert_eq!(DbConfig::from_broker_uri("mem://")?, DbConfig::memory());
        assert_eq!(
            DbConfig::from_broker_uri("rocksdb://./data/queue")?.endpoint,
            "rocksdb://./data/queue"
        );
        assert_eq!(
            DbConfig::from_broker_uri("ws://localhost:8000")?.endpoint,
            "ws://localhost:8000"
        );
        assert!(matches!(
            DbConfig::from_broker_uri("amqp://guest@localhost"),
            Err(DbError::InvalidEndpoint(_))
        ));
        assert!(DbConfig::from_broker_uri("rocksdb://").is_err());
        Ok(())
    }
}
