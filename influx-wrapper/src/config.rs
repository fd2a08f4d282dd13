use serde::Deserialize;
use std::fs;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub listen: Option<String>,
    // Base URL of the InfluxDB 1.x HTTP API, e.g. `http://localhost:8086`
    pub influx_url: String,
    // Basic auth credentials, only sent when both are set
    pub influx_username: Option<String>,
    pub influx_password: Option<String>,
    // Overall request timeout towards InfluxDB in seconds. Defaults to 5.
    pub timeout_secs: Option<u64>,
    // Connection timeout in seconds for establishing connections to InfluxDB.
    // If not set, uses reqwest's default behavior (no specific connect timeout).
    pub connect_timeout_secs: Option<u64>,
    // Logs issued queries and decoded batch requests.
    #[serde(default)]
    pub debug: bool,
    // Maximum request body size in bytes. Requests exceeding this will return 413 Payload Too Large.
    // If not set, defaults to 5 MB (5_242_880 bytes).
    pub max_request_body_bytes: Option<usize>,
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let cfg_str = fs::read_to_string(path)?;
        Ok(toml::from_str(&cfg_str)?)
    }
}
