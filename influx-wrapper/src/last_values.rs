use crate::latest::LatestValue;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Header carrying the database to query, passed through unvalidated.
pub const USER_HEADER: &str = "X-UserID";

#[derive(Debug, Serialize, Deserialize)]
pub struct RequestElement {
    pub measurement: String,
    #[serde(rename = "columnName")]
    pub column_name: String,
}

/// Resolves the latest value of every requested column, in request order.
///
/// The first failing lookup aborts the batch and decides the status code.
pub async fn last_values_handler(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
) -> Result<Json<Vec<LatestValue>>, Response> {
    debug!("Received last-values request");

    let db = req
        .headers()
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());
    let db = match db {
        Some(db) => db,
        None => {
            warn!("Request without {} header", USER_HEADER);
            return Err(
                (StatusCode::BAD_REQUEST, format!("Missing header {}", USER_HEADER))
                    .into_response(),
            );
        }
    };

    let mut req = req;
    let body_bytes = match to_bytes(req.body_mut(), state.max_request_body_bytes).await {
        Ok(b) => b,
        Err(e) => {
            error!("Failed to read request body: {:?}", e);
            return Err(e.into_response());
        }
    };

    let elements: Vec<RequestElement> = match serde_json::from_slice(&body_bytes) {
        Ok(v) => v,
        Err(e) => {
            warn!("Failed to parse batch body: {}", e);
            return Err((StatusCode::BAD_REQUEST, e.to_string()).into_response());
        }
    };

    if state.debug {
        match serde_json::to_string(&elements) {
            Ok(json) => info!("Request: {}", json),
            Err(e) => warn!("Failed to encode request for logging: {}", e),
        }
    }

    let mut values = Vec::with_capacity(elements.len());
    for element in &elements {
        match state
            .resolver
            .resolve_latest(&db, &element.measurement, &element.column_name)
            .await
        {
            Ok(latest) => values.push(latest),
            Err(e) => {
                error!(
                    "Lookup of {}.{} failed: {}",
                    element.measurement, element.column_name, e
                );
                return Err(e.into_response());
            }
        }
    }

    info!("Resolved {} latest value(s)", values.len());
    Ok(Json(values))
}

// Helper to read the full body with size limit
async fn to_bytes(body: &mut Body, max_size: usize) -> Result<Bytes, StatusCode> {
    use axum::body::HttpBody;
    use bytes::BytesMut;

    let mut buf = BytesMut::new();
    let mut total_size: usize = 0;

    while let Some(chunk_res) = body.data().await {
        let chunk = match chunk_res {
            Ok(chunk) => chunk,
            Err(_) => return Err(StatusCode::BAD_REQUEST),
        };

        total_size = match total_size.checked_add(chunk.len()) {
            Some(new_size) if new_size <= max_size => new_size,
            _ => return Err(StatusCode::PAYLOAD_TOO_LARGE),
        };

        buf.extend_from_slice(&chunk);
    }

    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::{extract::Query, routing::get, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;

    // Answers `/query` like InfluxDB 1.x, keyed on database and selected column.
    async fn spawn_mock_influx() -> String {
        let app = Router::new().route(
            "/query",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                let db = params.get("db").cloned().unwrap_or_default();
                let q = params.get("q").cloned().unwrap_or_default();
                let body = if db == "missing" {
                    json!({ "results": [{ "statement_id": 0, "error": "database not found: missing" }] })
                } else if q.contains("\"empty\"") {
                    json!({ "results": [{ "statement_id": 0 }] })
                } else {
                    let value = if q.contains("\"flag\"") {
                        json!(true)
                    } else if q.contains("\"state\"") {
                        json!("on")
                    } else if q.contains("\"nothing\"") {
                        Value::Null
                    } else {
                        json!(21.5)
                    };
                    json!({ "results": [{
                        "statement_id": 0,
                        "series": [{
                            "name": "m",
                            "columns": ["time", "value"],
                            "values": [["2020-05-01T10:00:00Z", value]]
                        }]
                    }] })
                };
                axum::Json(body)
            }),
        );

        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = axum::Server::from_tcp(listener)
            .expect("server")
            .serve(app.into_make_service());
        tokio::spawn(server);
        format!("http://127.0.0.1:{}", addr.port())
    }

    fn state_for(url: &str, max_request_body_bytes: Option<usize>) -> Arc<AppState> {
        let cfg = Config {
            listen: None,
            influx_url: url.to_string(),
            influx_username: None,
            influx_password: None,
            timeout_secs: Some(2),
            connect_timeout_secs: Some(1),
            debug: true,
            max_request_body_bytes,
        };
        Arc::new(AppState::from_config(&cfg).expect("state"))
    }

    fn request(db: Option<&str>, body: Vec<u8>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(axum::http::Method::POST)
            .uri("/last-values")
            .header("content-type", "application/json");
        if let Some(db) = db {
            builder = builder.header(USER_HEADER, db);
        }
        builder.body(Body::from(body)).unwrap()
    }

    async fn call(state: Arc<AppState>, req: Request<Body>) -> (StatusCode, Bytes) {
        let resp = last_values_handler(State(state), req).await.into_response();
        let status = resp.status();
        let bytes = hyper::body::to_bytes(resp.into_body())
            .await
            .expect("bytes");
        (status, bytes)
    }

    fn batch(pairs: &[(&str, &str)]) -> Vec<u8> {
        let v: Vec<Value> = pairs
            .iter()
            .map(|(m, c)| json!({ "measurement": m, "columnName": c }))
            .collect();
        serde_json::to_vec(&v).unwrap()
    }

    #[tokio::test]
    async fn resolves_batch_in_request_order() {
        let url = spawn_mock_influx().await;
        let body = batch(&[("m", "celsius"), ("m", "flag"), ("m", "state")]);
        let (status, bytes) = call(state_for(&url, None), request(Some("user-1"), body)).await;

        assert_eq!(status, StatusCode::OK);
        let v: Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(
            v,
            json!([
                { "time": "2020-05-01T10:00:00Z", "value": 21.5 },
                { "time": "2020-05-01T10:00:00Z", "value": true },
                { "time": "2020-05-01T10:00:00Z", "value": "on" }
            ])
        );
    }

    #[tokio::test]
    async fn empty_batch_returns_empty_array() {
        let url = spawn_mock_influx().await;
        let (status, bytes) = call(state_for(&url, None), request(Some("user-1"), b"[]".to_vec())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&bytes[..], b"[]");
    }

    #[tokio::test]
    async fn missing_header_is_bad_request() {
        let url = spawn_mock_influx().await;
        let body = batch(&[("m", "celsius")]);
        let (status, bytes) = call(state_for(&url, None), request(None, body.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(&bytes[..], b"Missing header X-UserID");

        let (status, _) = call(state_for(&url, None), request(Some(""), body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn user_header_is_case_insensitive() {
        let url = spawn_mock_influx().await;
        let req = Request::builder()
            .method(axum::http::Method::POST)
            .uri("/last-values")
            .header("x-userid", "user-1")
            .body(Body::from(batch(&[("m", "celsius")])))
            .unwrap();
        let (status, _) = call(state_for(&url, None), req).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn request_element_logs_with_wire_field_names() {
        let elements = vec![RequestElement {
            measurement: "m".into(),
            column_name: "celsius".into(),
        }];
        assert_eq!(
            serde_json::to_string(&elements).unwrap(),
            r#"[{"measurement":"m","columnName":"celsius"}]"#
        );
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let url = spawn_mock_influx().await;
        let (status, _) = call(
            state_for(&url, None),
            request(Some("user-1"), br#"{"measurement":"m"}"#.to_vec()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let url = spawn_mock_influx().await;
        let long = "x".repeat(200);
        let body = batch(&[("m", long.as_str())]);
        let (status, _) = call(state_for(&url, Some(100)), request(Some("user-1"), body)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn lookup_errors_map_to_status_codes() {
        let url = spawn_mock_influx().await;

        let (status, bytes) = call(
            state_for(&url, None),
            request(Some("missing"), batch(&[("m", "celsius")])),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(&bytes[..], b"not found");

        let (status, _) = call(
            state_for(&url, None),
            request(Some("user-1"), batch(&[("m", "empty")])),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            state_for(&url, None),
            request(Some("user-1"), batch(&[("m", "nothing")])),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn first_failure_aborts_batch() {
        let url = spawn_mock_influx().await;
        let body = batch(&[("m", "celsius"), ("m", "empty"), ("m", "flag")]);
        let (status, bytes) = call(state_for(&url, None), request(Some("user-1"), body)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(&bytes[..], b"not found");
    }

    #[tokio::test]
    async fn unreachable_influx_is_bad_gateway() {
        // Reserve a port, then close it so connections are refused
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let url = format!("http://127.0.0.1:{}", port);
        let (status, bytes) = call(
            state_for(&url, None),
            request(Some("user-1"), batch(&[("m", "celsius")])),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(&bytes[..], b"could not connect to influxdb");
    }
}
