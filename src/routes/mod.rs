pub mod model_routes;
pub mod topic_routes;

use std::convert::Infallible;

use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::Json;

use crate::errors::AppError;

/// Header carrying the caller's user id. Callers without it are anonymous.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The caller's user id, if the request named one.
#[derive(Debug, Clone, Default)]
pub struct CallerId(pub Option<String>);

impl CallerId {
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for CallerId {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        Ok(Self(id))
    }
}

/// Unwraps a JSON body, turning extractor rejections into a 400 problem.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::MalformedBody { message: rejection.body_text() })
}
