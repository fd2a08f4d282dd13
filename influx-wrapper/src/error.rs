//! Classified failures of a latest-value lookup.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::influx::TransportFailure;

pub type LookupResult<T> = Result<T, LookupError>;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("could not connect to influxdb")]
    Connection,

    #[error("not found")]
    NotFound,

    #[error("value is null")]
    Null,

    #[error("unexpected length of influx result")]
    UnexpectedLength,

    /// Application-level error reported inside an InfluxDB response, verbatim.
    #[error("{0}")]
    Store(String),

    /// Transport failure without timeout or temporary semantics.
    #[error("{0}")]
    Transport(Box<dyn TransportFailure>),
}

impl LookupError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            LookupError::NotFound => StatusCode::NOT_FOUND,
            LookupError::Connection => StatusCode::BAD_GATEWAY,
            LookupError::Null
            | LookupError::UnexpectedLength
            | LookupError::Store(_)
            | LookupError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for LookupError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}
