//! Strict JSON extraction.
//!
//! Drop-in replacement for `axum::Json` on the request side: bodies are
//! deserialized through `serde_path_to_error`, so a rejection names the
//! offending field ("invalid request body at `target_value`: ...") instead
//! of serde's bare message. Responses pass through to `axum::Json`.

use axum::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRequest, Request};
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::AppError;

#[derive(Debug)]
pub struct Json<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for Json<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|err| AppError::bad_request(format!("could not read request body: {err}")))?;

        let deserializer = &mut serde_json::Deserializer::from_slice(&bytes);
        match serde_path_to_error::deserialize::<_, T>(deserializer) {
            Ok(value) => Ok(Json(value)),
            Err(err) => {
                let path = err.path().to_string();
                let message = if path == "." {
                    format!("invalid request body: {}", err.inner())
                } else {
                    format!("invalid request body at `{path}`: {}", err.inner())
                };
                Err(AppError::bad_request(message))
            }
        }
    }
}

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}
