//! Source connection
//!
//! Owns the MongoDB client for one export run:
//! - connection establishment, verified with a `ping`
//! - the database's collection list, fetched once and then fixed for the run
//! - cursor acquisition bounded by the run's timeout
//! - shutdown

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use mongodb::bson::{Document, doc};
use mongodb::{Client, Database, options::ClientOptions};
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::config::SourceConfig;
use crate::error::{
    ConnectionError, MongoErrorClass, ReadError, Result, classify_mongodb_error,
    describe_mongodb_error,
};
use crate::export::{DocumentSource, DocumentStream};

/// MongoDB connection for one export run
pub struct SourceConnection {
    client: Client,
    database: Database,
    database_name: String,
    timeout: Duration,
    collections: OnceCell<Vec<String>>,
}

impl SourceConnection {
    /// Connect and verify the server answers
    ///
    /// # Arguments
    /// * `config` - Source credentials
    /// * `timeout` - Bound on server selection, the ping, collection listing
    ///   and each cursor acquisition
    ///
    /// # Returns
    /// * `Result<Self>` - Connected source or a connection error
    pub async fn connect(config: &SourceConfig, timeout: Duration) -> Result<Self> {
        let connection = Self::open(config, timeout).await?;

        if let Err(e) = connection.ping().await {
            connection.disconnect().await;
            return Err(e);
        }
        info!("Connected to database '{}'", connection.database_name);
        Ok(connection)
    }

    /// Build the client without contacting the server
    async fn open(config: &SourceConfig, timeout: Duration) -> Result<Self> {
        info!("Connecting to {}", config.sanitized_uri());

        let mut options = ClientOptions::parse(config.connection_uri())
            .await
            .map_err(|e| ConnectionError::InvalidUri(describe_mongodb_error(&e)))?;
        options.app_name = Some("mongobucket".to_string());
        options.credential = config.credential();
        options.server_selection_timeout = Some(timeout);
        options.connect_timeout = Some(timeout);

        let client = Client::with_options(options)
            .map_err(|e| ConnectionError::ConnectionFailed(describe_mongodb_error(&e)))?;
        let database = client.database(&config.database);

        Ok(Self {
            client,
            database,
            database_name: config.database.clone(),
            timeout,
            collections: OnceCell::new(),
        })
    }

    /// Send a `ping` to the database
    pub async fn ping(&self) -> Result<()> {
        match timeout(self.timeout, self.database.run_command(doc! { "ping": 1 })).await {
            Err(_) => Err(ConnectionError::Timeout.into()),
            Ok(Err(e)) => {
                let message = describe_mongodb_error(&e);
                Err(match classify_mongodb_error(&e) {
                    MongoErrorClass::Authentication => {
                        ConnectionError::AuthenticationFailed(message)
                    }
                    _ => ConnectionError::PingFailed(message),
                }
                .into())
            }
            Ok(Ok(_)) => {
                debug!("Ping ok");
                Ok(())
            }
        }
    }

    /// Close the client and its pooled connections
    pub async fn disconnect(&self) {
        self.client.clone().shutdown().immediate(true).await;
        debug!("Disconnected from '{}'", self.database_name);
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch_collection_names(&self) -> Result<Vec<String>> {
        let listing = self
            .database
            .list_collection_names()
            .filter(doc! { "type": "collection" });

        let mut names = timeout(self.timeout, listing)
            .await
            .map_err(|_| {
                ReadError::EnumerationFailed(format!(
                    "listing collections timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| ReadError::EnumerationFailed(describe_mongodb_error(&e)))?;

        names.retain(|name| !name.starts_with("system."));
        names.sort();
        debug!("Collections: {:?}", names);
        Ok(names)
    }
}

#[async_trait]
impl DocumentSource for SourceConnection {
    fn database_name(&self) -> &str {
        &self.database_name
    }

    async fn collection_names(&self) -> Result<Vec<String>> {
        let names = self
            .collections
            .get_or_try_init(|| self.fetch_collection_names())
            .await?;
        Ok(names.clone())
    }

    async fn documents(
        &self,
        collection: &str,
        skip: u64,
    ) -> std::result::Result<DocumentStream, ReadError> {
        let coll = self.database.collection::<Document>(collection);
        let find = coll
            .find(doc! {})
            .sort(doc! { "_id": 1 })
            .skip(skip);

        let cursor = match timeout(self.timeout, find).await {
            Err(_) => {
                return Err(ReadError::CursorTimeout {
                    collection: collection.to_string(),
                });
            }
            Ok(Err(e)) => {
                return Err(ReadError::CursorFailed {
                    collection: collection.to_string(),
                    message: describe_mongodb_error(&e),
                });
            }
            Ok(Ok(cursor)) => cursor,
        };
        debug!("Opened '{}' at offset {}", collection, skip);

        let name = collection.to_string();
        Ok(cursor
            .map(move |item| {
                item.map_err(|e| ReadError::CursorFailed {
                    collection: name.clone(),
                    message: describe_mongodb_error(&e),
                })
            })
            .boxed())
    }
}
