//! Request extractors

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::convert::Infallible;
use tsplug::TenantId;

/// Header carrying the caller's tenant
pub const TENANT_HEADER: &str = "apim-subscription-id";

/// Tenant of the request; the default tenant when the header is absent or blank
#[derive(Debug, Clone)]
pub struct Tenant(pub TenantId);

impl<S> FromRequestParts<S> for Tenant
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let tenant = parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(TenantId::from_string)
            .unwrap_or_default();
        Ok(Tenant(tenant))
    }
}
