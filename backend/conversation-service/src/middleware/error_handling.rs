use crate::error::AppError;
use actix_web::{error::JsonPayloadError, http::StatusCode, HttpRequest, HttpResponse};
use error_types::{error_codes, error_types as kinds, ErrorResponse};

/// Map domain errors to HTTP status and body
///
/// Server-side failures get an opaque message; the detail goes to the log.
pub fn map_error(err: &AppError) -> (StatusCode, ErrorResponse) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let (error_type, code) = match err {
        AppError::BadRequest(_) => (kinds::VALIDATION_ERROR, error_codes::INVALID_REQUEST),
        AppError::Unauthorized => (
            kinds::AUTHENTICATION_ERROR,
            error_codes::TOKEN_MISSING,
        ),
        AppError::Forbidden(_) => (kinds::AUTHORIZATION_ERROR, error_codes::FORBIDDEN),
        AppError::NotFound(_) => (kinds::NOT_FOUND_ERROR, error_codes::NOT_FOUND),
        AppError::Conflict(_) => (kinds::CONFLICT_ERROR, error_codes::CONFLICT),
        AppError::Database(_) => (kinds::SERVER_ERROR, error_codes::DATABASE_ERROR),
        AppError::Config(_) | AppError::StartServer(_) | AppError::Internal => (
            kinds::SERVER_ERROR,
            error_codes::INTERNAL_SERVER_ERROR,
        ),
    };

    let message = if err.is_client_facing() {
        err.to_string()
    } else {
        "internal server error".to_string()
    };

    let response = ErrorResponse::for_status(status.as_u16(), &message, error_type, code);
    (status, response)
}

pub fn into_response(err: &AppError) -> HttpResponse {
    if !err.is_client_facing() {
        tracing::error!(error = %err, "Request failed");
    }
    let (status, response) = map_error(err);
    HttpResponse::build(status).json(response)
}

/// Render extractor failures (bad JSON, query or path) as validation errors
pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    AppError::BadRequest(format!("invalid request body: {err}")).into()
}

pub fn query_error_handler(
    err: actix_web::error::QueryPayloadError,
    _req: &HttpRequest,
) -> actix_web::Error {
    AppError::BadRequest(format!("invalid query: {err}")).into()
}

pub fn path_error_handler(
    err: actix_web::error::PathError,
    _req: &HttpRequest,
) -> actix_web::Error {
    AppError::BadRequest(format!("invalid path: {err}")).into()
}
