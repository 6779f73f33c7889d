use axum::{http::StatusCode, response::IntoResponse, Json};
use brokkctl_common::{ErrorBody, ErrorKind};

/// Maps the closed error taxonomy onto HTTP responses.
pub struct ApiError(pub ErrorKind, pub String);

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self(kind, message.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.0 {
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound | ErrorKind::SessionNotFound => StatusCode::NOT_FOUND,
            ErrorKind::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ErrorKind::CapacityExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::NoCapacity | ErrorKind::ProvisionerUnhealthy => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::SpawnFailed => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::ProtocolUnsupportedFeature | ErrorKind::ProtocolIncompatible | ErrorKind::IllegalTransition => {
                StatusCode::CONFLICT
            }
            ErrorKind::Io | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody::new(self.0, self.1))).into_response()
    }
}
