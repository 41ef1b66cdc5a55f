//! PostgreSQL session implementing the engine's [`Connection`] seam.

use async_trait::async_trait;
use tokio_postgres::types::ToSql;
use tokio_postgres::{CancelToken, Client, NoTls, SimpleQueryMessage};
use tracing::{debug, warn};

use tidemark_migrate::{Connection, DbError, TextRow};

use crate::config::PgConfig;
use crate::error::{PgError, PgResult, to_db_error};

/// A single PostgreSQL session owned by the engine for one run.
pub struct PgConnection {
    client: Client,
    cancel_token: CancelToken,
}

impl PgConnection {
    /// Connect using `config`.
    ///
    /// The driver's connection task is spawned onto the current runtime and
    /// lives until the client is dropped.
    pub async fn connect(config: &PgConfig) -> PgResult<Self> {
        debug!(url = %config.redacted_url(), "Connecting to PostgreSQL");

        let (client, connection) = config
            .to_pg_config()
            .connect(NoTls)
            .await
            .map_err(|e| PgError::connection(format!("{}: {}", config.redacted_url(), e)))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "PostgreSQL connection closed with error");
            }
        });

        let cancel_token = client.cancel_token();
        Ok(Self {
            client,
            cancel_token,
        })
    }

    /// Parse `url` and connect.
    pub async fn connect_url(url: &str) -> PgResult<Self> {
        let config = PgConfig::from_url(url)?;
        Self::connect(&config).await
    }

    /// Whether the underlying connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }

    /// Get the underlying tokio-postgres client.
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn simple_query(&mut self, sql: &str) -> Result<Vec<TextRow>, DbError> {
        debug!(sql = %sql, "Executing simple query");

        let messages = self
            .client
            .simple_query(sql)
            .await
            .map_err(|e| to_db_error(&e))?;

        Ok(messages
            .into_iter()
            .filter_map(|message| match message {
                SimpleQueryMessage::Row(row) => Some(
                    (0..row.len())
                        .map(|i| row.get(i).map(str::to_string))
                        .collect(),
                ),
                _ => None,
            })
            .collect())
    }

    async fn execute(&mut self, sql: &str, params: &[&str]) -> Result<u64, DbError> {
        debug!(sql = %sql, params = params.len(), "Executing statement");

        let params: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        self.client
            .execute(sql, &params)
            .await
            .map_err(|e| to_db_error(&e))
    }

    async fn cancel_query(&mut self) -> Result<(), DbError> {
        debug!("Requesting cancellation of the running statement");
        self.cancel_token
            .cancel_query(NoTls)
            .await
            .map_err(|e| to_db_error(&e))
    }
}
