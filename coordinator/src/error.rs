use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use goconnect_model::{Error, ErrorKind};

/// Renders a domain [`Error`] as an HTTP response: the kind picks the
/// status code, the body carries the kind, message and details so
/// clients never have to parse driver text out of a string.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind {
            ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict | ErrorKind::IpExhausted => StatusCode::CONFLICT,
            ErrorKind::Unauthorized | ErrorKind::TokenExpired | ErrorKind::InvalidCredentials => {
                StatusCode::UNAUTHORIZED
            }
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(self.0)).into_response()
    }
}
