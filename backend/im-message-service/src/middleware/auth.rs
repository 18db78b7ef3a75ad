//! Bearer-token authentication (HS256 with the shared `JWT_SECRET`).

use crate::error::{AppError, AppResult};
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderMap, AUTHORIZATION},
    Error, HttpMessage,
};
use chrono::Utc;
use futures::future::{ready, LocalBoxFuture, Ready};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use std::sync::Arc;

/// JWT claims: `sub` carries the numeric user id.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Authenticated user id, stored in request extensions by [`JwtAuth`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub i64);

pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtKeys {
    pub fn from_secret(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 30;
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Sign a token for `user_id` valid for `ttl`.
    pub fn issue(&self, user_id: i64, ttl: chrono::Duration) -> AppResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AppError::Config(format!("sign token: {e}")))
    }

    /// Validate signature and expiry and return the user id.
    pub fn verify(&self, token: &str) -> AppResult<i64> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "JWT validation failed");
            AppError::Unauthorized
        })?;

        match data.claims.sub.parse::<i64>() {
            Ok(id) if id > 0 => Ok(id),
            _ => {
                tracing::warn!(sub = %data.claims.sub, "JWT subject is not a user id");
                Err(AppError::Unauthorized)
            }
        }
    }
}

/// `Authorization: Bearer <token>`
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// JWT Authentication Middleware
pub struct JwtAuth {
    keys: Arc<JwtKeys>,
}

impl JwtAuth {
    pub fn new(keys: Arc<JwtKeys>) -> Self {
        Self { keys }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = JwtAuthService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(JwtAuthService {
            service: Rc::new(service),
            keys: self.keys.clone(),
        }))
    }
}

pub struct JwtAuthService<S> {
    service: Rc<S>,
    keys: Arc<JwtKeys>,
}

impl<S, B> Service<ServiceRequest> for JwtAuthService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let verified = bearer_token(req.headers())
            .ok_or(AppError::Unauthorized)
            .and_then(|token| self.keys.verify(token));

        Box::pin(async move {
            let user_id = verified?;
            req.extensions_mut().insert(UserId(user_id));
            service.call(req).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header::HeaderValue;

    const SECRET: &str = "test-secret-0123456789";

    #[test]
    fn issued_token_verifies() {
        let keys = JwtKeys::from_secret(SECRET);
        let token = keys.issue(42, chrono::Duration::hours(1)).unwrap();
        assert_eq!(keys.verify(&token).unwrap(), 42);
    }

    #[test]
    fn wrong_secret_and_expired_tokens_fail() {
        let keys = JwtKeys::from_secret(SECRET);
        let other = JwtKeys::from_secret("another-secret-9876543210");
        let token = other.issue(42, chrono::Duration::hours(1)).unwrap();
        assert!(matches!(keys.verify(&token), Err(AppError::Unauthorized)));

        let expired = keys.issue(42, chrono::Duration::hours(-2)).unwrap();
        assert!(matches!(keys.verify(&expired), Err(AppError::Unauthorized)));
    }

    #[test]
    fn bearer_prefix_required() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Token abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));
    }
}
