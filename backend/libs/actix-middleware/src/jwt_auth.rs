use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::{header, StatusCode},
    Error, HttpMessage, HttpResponse, ResponseError,
};
use crypto_core::jwt::{SessionTokens, TokenError};
use error_types::{error_codes, error_types as kinds, ErrorResponse};
use futures::future::{ready, Ready};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use uuid::Uuid;

/// User ID extracted from the session token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub Uuid);

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing Authorization header")]
    MissingToken,

    #[error("Authorization header must use the Bearer scheme")]
    InvalidScheme,

    #[error("request is not authenticated")]
    Unauthenticated,

    #[error(transparent)]
    Token(#[from] TokenError),
}

impl ResponseError for AuthError {
    fn status_code(&self) -> StatusCode {
        StatusCode::UNAUTHORIZED
    }

    fn error_response(&self) -> HttpResponse {
        let code = match self {
            AuthError::MissingToken | AuthError::Unauthenticated => error_codes::TOKEN_MISSING,
            AuthError::Token(TokenError::Expired) => error_codes::TOKEN_EXPIRED,
            AuthError::InvalidScheme | AuthError::Token(_) => error_codes::TOKEN_INVALID,
        };
        HttpResponse::Unauthorized().json(ErrorResponse::for_status(
            StatusCode::UNAUTHORIZED.as_u16(),
            &self.to_string(),
            kinds::AUTHENTICATION_ERROR,
            code,
        ))
    }
}

/// Resolve the caller from the `Authorization: Bearer <token>` header
pub fn authenticate(req: &ServiceRequest, tokens: &SessionTokens) -> Result<Uuid, AuthError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingToken)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::InvalidScheme)?;

    Ok(tokens.user_id(token)?)
}

/// Session token authentication middleware
///
/// Rejects the request with 401 unless it carries a valid token; otherwise
/// inserts [`UserId`] into the request extensions.
#[derive(Clone)]
pub struct JwtAuthMiddleware {
    tokens: Arc<SessionTokens>,
}

impl JwtAuthMiddleware {
    pub fn new(tokens: Arc<SessionTokens>) -> Self {
        Self { tokens }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtAuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = JwtAuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(JwtAuthMiddlewareService {
            service: Rc::new(service),
            tokens: self.tokens.clone(),
        }))
    }
}

pub struct JwtAuthMiddlewareService<S> {
    service: Rc<S>,
    tokens: Arc<SessionTokens>,
}

impl<S, B> Service<ServiceRequest> for JwtAuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();

        match authenticate(&req, &self.tokens) {
            Ok(user_id) => {
                req.extensions_mut().insert(UserId(user_id));
                Box::pin(async move { service.call(req).await })
            }
            Err(e) => {
                tracing::warn!(path = %req.path(), error = %e, "Rejected unauthenticated request");
                Box::pin(async move { Err(Error::from(e)) })
            }
        }
    }
}

impl actix_web::FromRequest for UserId {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(
        req: &actix_web::HttpRequest,
        _payload: &mut actix_web::dev::Payload,
    ) -> Self::Future {
        match req.extensions().get::<UserId>() {
            Some(user_id) => ready(Ok(*user_id)),
            None => ready(Err(AuthError::Unauthenticated.into())),
        }
    }
}
