//! Shared-key guard for service-to-service routes.
//!
//! Callers present `X-Internal-API-Key`. When no key is configured every
//! request is rejected, so producer hooks are never open by default.

use crate::error::AppError;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures::future::{ready, LocalBoxFuture, Ready};
use std::rc::Rc;
use std::sync::Arc;

pub const INTERNAL_API_KEY_HEADER: &str = "x-internal-api-key";

pub struct InternalApiKey {
    expected: Option<Arc<str>>,
}

impl InternalApiKey {
    pub fn new(expected: Option<&str>) -> Self {
        Self {
            expected: expected.filter(|k| !k.is_empty()).map(Arc::from),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for InternalApiKey
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = InternalApiKeyService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(InternalApiKeyService {
            service: Rc::new(service),
            expected: self.expected.clone(),
        }))
    }
}

pub struct InternalApiKeyService<S> {
    service: Rc<S>,
    expected: Option<Arc<str>>,
}

impl<S, B> Service<ServiceRequest> for InternalApiKeyService<S>
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
        let Some(expected) = self.expected.as_deref() else {
            tracing::warn!(
                path = %req.path(),
                "internal API key not configured, blocking internal request"
            );
            return Box::pin(ready(Err(AppError::Unauthorized.into())));
        };

        let provided = req
            .headers()
            .get(INTERNAL_API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        if provided != expected {
            tracing::warn!(path = %req.path(), "rejected internal request with invalid API key");
            return Box::pin(ready(Err(AppError::Unauthorized.into())));
        }

        let service = self.service.clone();
        Box::pin(async move { service.call(req).await })
    }
}
