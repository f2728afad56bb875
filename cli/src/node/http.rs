use anyhow::{Context, Result};
use axum::Json;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use kadnode_network::{Dht, ID_LEN, KadId, StoreError, Transport};
use tokio::net::TcpListener;

use super::HttpConfig;

const OBJECTS_PREFIX: &str = "/objects";

pub async fn bind(config: &HttpConfig) -> Result<TcpListener> {
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind HTTP gateway to {}", config.listen_addr))?;
    tracing::info!(listen_addr = %config.listen_addr, "HTTP gateway started");
    Ok(listener)
}

/// `POST /objects` and `GET /objects/{hash}` on top of the DHT.
pub fn router<T: Transport>(dht: Dht<T>) -> axum::Router {
    let max_body_len = dht.config().max_value_len();

    axum::Router::new()
        .route(OBJECTS_PREFIX, post(put_object::<T>))
        .route("/objects/{hash}", get(get_object::<T>))
        .layer(DefaultBodyLimit::max(max_body_len))
        .with_state(dht)
}

async fn put_object<T: Transport>(
    State(dht): State<Dht<T>>,
    body: Bytes,
) -> Result<Response, Error> {
    let content = String::from_utf8_lossy(&body).into_owned();
    let key = dht.put(body).await?;
    tracing::debug!(%key, "object stored");

    let mut object = serde_json::Map::new();
    object.insert(key.to_string(), content.into());

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, format!("{OBJECTS_PREFIX}/{key}"))],
        Json(object),
    )
        .into_response())
}

async fn get_object<T: Transport>(
    State(dht): State<Dht<T>>,
    Path(hash): Path<String>,
) -> Result<Response, Error> {
    if hash.len() != ID_LEN * 2 {
        return Err(Error::InvalidHashLength);
    }
    let key = KadId::from_hex(&hash).map_err(|_e| Error::InvalidHash)?;

    let res = dht.get(&key).await;
    match res.value {
        Some(value) => Ok((StatusCode::OK, value).into_response()),
        None if res.contacts.is_empty() => Err(Error::NoPeers),
        None => Err(Error::NotFound),
    }
}

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("hash must be {} hex characters", ID_LEN * 2)]
    InvalidHashLength,
    #[error("hash is not a valid hex string")]
    InvalidHash,
    #[error("object not found")]
    NotFound,
    #[error("no reachable peers")]
    NoPeers,
}

impl Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Store(StoreError::EmptyValue) | Self::InvalidHash => StatusCode::BAD_REQUEST,
            Self::Store(StoreError::ValueTooBig { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InvalidHashLength => StatusCode::LENGTH_REQUIRED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::NoPeers => StatusCode::NO_CONTENT,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        tracing::debug!(%status, "request failed: {self}");

        // Responses with 204 must have no body
        if status == StatusCode::NO_CONTENT {
            return status.into_response();
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
