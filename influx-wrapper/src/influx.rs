//! InfluxDB 1.x query transport and the executor that classifies its failures.

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{LookupError, LookupResult};

/// Body of a `/query` reply.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub results: Vec<StatementResult>,
    #[serde(default, rename = "error")]
    pub err: Option<String>,
}

/// Outcome of one statement in a query.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StatementResult {
    #[serde(default)]
    pub statement_id: u64,
    #[serde(default)]
    pub series: Vec<Series>,
    #[serde(default, rename = "error")]
    pub err: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Series {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub values: Vec<Vec<serde_json::Value>>,
}

impl Response {
    /// First embedded error, response level before statement level.
    pub fn error(&self) -> Option<&str> {
        self.err
            .as_deref()
            .or_else(|| self.results.iter().find_map(|r| r.err.as_deref()))
    }
}

/// A failed round trip to the store.
///
/// Implementations report whether the failure was a timeout or otherwise
/// temporary, which is what the executor keys `LookupError::Connection` on.
pub trait TransportFailure: std::error::Error + Send + Sync + 'static {
    fn is_timeout(&self) -> bool;
    fn is_temporary(&self) -> bool;
}

impl TransportFailure for reqwest::Error {
    fn is_timeout(&self) -> bool {
        reqwest::Error::is_timeout(self)
    }

    fn is_temporary(&self) -> bool {
        self.is_connect() || self.is_request() || self.is_body()
    }
}

/// Runs raw query strings against a named database.
///
/// `Ok(None)` means the transport produced neither a response nor an error.
#[async_trait]
pub trait QueryClient: Send + Sync {
    async fn query(
        &self,
        database: &str,
        query: &str,
    ) -> Result<Option<Response>, Box<dyn TransportFailure>>;
}

/// `QueryClient` speaking the InfluxDB 1.x HTTP API.
pub struct HttpQueryClient {
    client: Client,
    url: Url,
    credentials: Option<(String, String)>,
}

impl HttpQueryClient {
    pub fn new(client: Client, url: Url, credentials: Option<(String, String)>) -> Self {
        HttpQueryClient {
            client,
            url,
            credentials,
        }
    }
}

#[async_trait]
impl QueryClient for HttpQueryClient {
    async fn query(
        &self,
        database: &str,
        query: &str,
    ) -> Result<Option<Response>, Box<dyn TransportFailure>> {
        let mut builder = self
            .client
            .get(format!("{}/query", self.url.as_str().trim_end_matches('/')))
            .query(&[("db", database), ("q", query)]);
        if let Some((user, password)) = &self.credentials {
            builder = builder.basic_auth(user, Some(password));
        }
        let resp = builder.send().await.map_err(boxed)?;
        debug!("InfluxDB answered with status {}", resp.status());
        // Error replies carry a JSON body too, so the status is not checked here
        let body = resp.json::<Response>().await.map_err(boxed)?;
        Ok(Some(body))
    }
}

fn boxed(e: reqwest::Error) -> Box<dyn TransportFailure> {
    Box::new(e)
}

/// Issues queries through the shared client and classifies every failure.
#[derive(Clone)]
pub struct QueryExecutor {
    client: Arc<dyn QueryClient>,
    debug: bool,
}

impl QueryExecutor {
    pub fn new(client: Arc<dyn QueryClient>, debug: bool) -> Self {
        QueryExecutor { client, debug }
    }

    pub async fn execute(&self, database: &str, query: &str) -> LookupResult<Response> {
        if self.debug {
            info!(database, query, "Executing influx query");
        }

        let response = match self.client.query(database, query).await {
            Ok(Some(response)) => response,
            Ok(None) => return Err(LookupError::Null),
            Err(e) if e.is_timeout() || e.is_temporary() => {
                warn!("InfluxDB unreachable: {}", e);
                return Err(LookupError::Connection);
            }
            Err(e) => return Err(LookupError::Transport(e)),
        };

        if let Some(msg) = response.error() {
            if msg.contains("not found") {
                return Err(LookupError::NotFound);
            }
            return Err(LookupError::Store(msg.to_string()));
        }
        Ok(response)
    }
}
