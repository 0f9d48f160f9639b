//! Maps [`CoordinatorError`] onto the HTTP error envelope described in the
//! error-handling design: a status code, an `X-Error-Code` header, and a
//! `{error: {message, code}}` JSON body.

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::errors::CoordinatorError;

pub struct ApiError(CoordinatorError);

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        Self(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    message: String,
    code: String,
}

fn status_for(err: &CoordinatorError) -> StatusCode {
    match err {
        CoordinatorError::InvalidInput { .. } | CoordinatorError::InvalidParameter { .. } => {
            StatusCode::BAD_REQUEST
        }
        CoordinatorError::NotFound { .. } => StatusCode::NOT_FOUND,
        CoordinatorError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        CoordinatorError::OperationRepeat { .. } => StatusCode::CONFLICT,
        CoordinatorError::ResourceExhausted { .. } => StatusCode::TOO_MANY_REQUESTS,
        CoordinatorError::CallError { .. }
        | CoordinatorError::Kube { .. }
        | CoordinatorError::Http { .. }
        | CoordinatorError::Json { .. }
        | CoordinatorError::Io { .. }
        | CoordinatorError::Exception { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let code = self.0.code();
        let body = ErrorBody {
            error: ErrorDetail {
                message: self.0.to_string(),
                code: code.clone(),
            },
        };
        let mut response = (status, Json(body)).into_response();
        if let Ok(value) = HeaderValue::from_str(&code) {
            response
                .headers_mut()
                .insert(HeaderName::from_static("x-error-code"), value);
        }
        response
    }
}
