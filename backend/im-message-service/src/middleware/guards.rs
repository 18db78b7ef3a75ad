//! Request guards that make authentication visible in handler signatures.

use crate::error::AppError;
use crate::middleware::auth::UserId;
use actix_web::{dev::Payload, Error, FromRequest, HttpMessage, HttpRequest};
use futures::future::{ready, Ready};

/// Represents an authenticated user extracted from JWT claims
///
/// Only resolvable behind [`crate::middleware::auth::JwtAuth`]; anywhere else
/// the extractor fails with 401.
#[derive(Debug, Clone, Copy)]
pub struct User {
    pub id: i64,
}

impl FromRequest for User {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let user = req
            .extensions()
            .get::<UserId>()
            .map(|u| User { id: u.0 })
            .ok_or_else(|| AppError::Unauthorized.into());
        ready(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test::TestRequest};

    #[actix_rt::test]
    async fn resolves_id_stored_by_auth_middleware() {
        let req = TestRequest::default().to_http_request();
        req.extensions_mut().insert(UserId(42));

        let user = User::extract(&req).await.unwrap();
        assert_eq!(user.id, 42);
    }

    #[actix_rt::test]
    async fn missing_identity_is_unauthorized() {
        let req = TestRequest::default().to_http_request();

        let err = User::extract(&req).await.unwrap_err();
        assert_eq!(err.as_response_error().status_code(), StatusCode::UNAUTHORIZED);
    }
}
