use crate::config::Config;
use crate::influx::{HttpQueryClient, QueryExecutor};
use crate::latest::LatestValueResolver;
use reqwest::{Client, Url};
use std::sync::Arc;
use tracing::{debug, info};

pub struct AppState {
    pub resolver: LatestValueResolver,
    pub debug: bool,
    pub max_request_body_bytes: usize,
}

impl AppState {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let timeout = std::time::Duration::from_secs(cfg.timeout_secs.unwrap_or(5));
        let mut builder = Client::builder().timeout(timeout);
        if let Some(secs) = cfg.connect_timeout_secs {
            builder = builder.connect_timeout(std::time::Duration::from_secs(secs));
        }
        let client = builder.build()?;
        debug!("HTTP client created with timeout: {:?}", timeout);

        // Parse and validate the InfluxDB URL at startup
        let url = Url::parse(&cfg.influx_url)
            .map_err(|e| anyhow::anyhow!("Invalid influx URL '{}': {}", cfg.influx_url, e))?;
        let credentials = match (&cfg.influx_username, &cfg.influx_password) {
            (Some(user), Some(password)) => Some((user.clone(), password.clone())),
            _ => None,
        };
        info!(
            "Using InfluxDB at '{}' (basic auth: {})",
            url,
            credentials.is_some()
        );

        let executor = QueryExecutor::new(
            Arc::new(HttpQueryClient::new(client, url, credentials)),
            cfg.debug,
        );

        // Default to 5 MB if not specified
        const DEFAULT_MAX_BODY_BYTES: usize = 5_242_880;
        let max_request_body_bytes = cfg.max_request_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES);
        debug!("Maximum request body size: {} bytes", max_request_body_bytes);

        Ok(AppState {
            resolver: LatestValueResolver::new(executor),
            debug: cfg.debug,
            max_request_body_bytes,
        })
    }
}
