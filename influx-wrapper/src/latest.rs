//! Resolution of the most recent value of a measurement column.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{LookupError, LookupResult};
use crate::influx::{QueryExecutor, Response};

/// A non-null scalar as stored by InfluxDB, type preserved.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(serde_json::Number),
    String(String),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestValue {
    pub time: String,
    pub value: Scalar,
}

#[derive(Clone)]
pub struct LatestValueResolver {
    executor: QueryExecutor,
}

impl LatestValueResolver {
    pub fn new(executor: QueryExecutor) -> Self {
        LatestValueResolver { executor }
    }

    pub async fn resolve_latest(
        &self,
        database: &str,
        measurement: &str,
        column: &str,
    ) -> LookupResult<LatestValue> {
        let query = latest_value_query(measurement, column);
        let response = self.executor.execute(database, &query).await?;
        let latest = extract_single(response)?;
        debug!(measurement, column, time = %latest.time, "Resolved latest value");
        Ok(latest)
    }
}

pub fn latest_value_query(measurement: &str, column: &str) -> String {
    format!(
        "SELECT {} FROM {} ORDER BY time DESC LIMIT 1",
        quote_ident(column),
        quote_ident(measurement)
    )
}

fn quote_ident(ident: &str) -> String {
    let escaped = ident.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

/// Takes the one `(time, value)` row out of a response, or says why it can't.
fn extract_single(response: Response) -> LookupResult<LatestValue> {
    let mut results = response.results;
    if results.len() > 1 {
        return Err(LookupError::UnexpectedLength);
    }
    let mut series = match results.pop() {
        Some(result) => result.series,
        None => return Err(LookupError::NotFound),
    };
    if series.len() > 1 {
        return Err(LookupError::UnexpectedLength);
    }
    let mut rows = match series.pop() {
        Some(s) => s.values,
        None => return Err(LookupError::NotFound),
    };
    if rows.len() > 1 {
        return Err(LookupError::UnexpectedLength);
    }
    let row = rows.pop().ok_or(LookupError::NotFound)?;

    let [time, value]: [Value; 2] = row
        .try_into()
        .map_err(|_| LookupError::UnexpectedLength)?;

    let time = match time {
        Value::String(s) => s,
        // epoch precision replies carry integer timestamps
        Value::Number(n) => n.to_string(),
        Value::Null => return Err(LookupError::Null),
        _ => return Err(LookupError::UnexpectedLength),
    };
    let value = match value {
        Value::Number(n) => Scalar::Number(n),
        Value::String(s) => Scalar::String(s),
        Value::Bool(b) => Scalar::Bool(b),
        Value::Null => return Err(LookupError::Null),
        Value::Array(_) | Value::Object(_) => return Err(LookupError::UnexpectedLength),
    };
    Ok(LatestValue { time, value })
}
