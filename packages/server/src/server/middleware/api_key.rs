//! Bearer-credential authentication.
//!
//! Every tenant-facing route extracts [`AuthTenant`], which resolves the
//! Authorization header against the `users` table. A missing or unknown
//! credential fails the request with `UNAUTHORIZED` before any handler
//! logic runs.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use tracing::debug;

use crate::common::ApiError;
use crate::kernel::Tenant;
use crate::server::app::AppState;

/// The authenticated tenant for this request.
#[derive(Debug)]
pub struct AuthTenant(pub Tenant);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthTenant {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        // Accept both "Bearer <token>" and a raw token
        let token = header.strip_prefix("Bearer ").unwrap_or(header);

        let tenant = state
            .store
            .find_tenant_by_api_key(token)
            .await
            .map_err(ApiError::Internal)?
            .ok_or(ApiError::Unauthorized)?;

        debug!(tenant_id = %tenant.tenant_id, "request authenticated");
        Ok(AuthTenant(tenant))
    }
}
