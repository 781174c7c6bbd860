use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{error, warn};

use carbonex_core::errors::{ApplicationError, InterfaceError};

use crate::request::CorrelationId;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub correlation_id: String,
}

/// Failure of a JSON endpoint. Client errors echo the domain message;
/// server-side failures answer with a generic text and log the detail.
#[derive(Debug)]
pub struct ApiError(InterfaceError);

impl ApiError {
    pub fn from_application(error: ApplicationError, correlation_id: &CorrelationId) -> Self {
        Self(error.into_interface(correlation_id.as_str()))
    }

    pub fn not_found(message: impl Into<String>, correlation_id: &CorrelationId) -> Self {
        Self(InterfaceError::NotFound {
            message: message.into(),
            correlation_id: correlation_id.to_string(),
        })
    }

    pub fn status(&self) -> StatusCode {
        match self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let interface = self.0;

        let error = if status.is_client_error() {
            warn!(
                event_name = "server.request.rejected",
                correlation_id = interface.correlation_id(),
                status = status.as_u16(),
                error = interface.message(),
                "request rejected"
            );
            interface.message().to_string()
        } else {
            error!(
                event_name = "server.request.failed",
                correlation_id = interface.correlation_id(),
                status = status.as_u16(),
                error = interface.message(),
                "request failed"
            );
            interface.user_message().to_string()
        };

        let body = ErrorBody { error, correlation_id: interface.correlation_id().to_string() };
        (status, Json(body)).into_response()
    }
}
