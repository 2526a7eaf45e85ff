//! Per-tenant metrics route.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::common::ApiError;
use crate::server::app::AppState;
use crate::server::middleware::AuthTenant;

/// GET /api/metrics — per-status counts for the authenticated tenant,
/// derived on demand from the jobs table.
pub async fn metrics_handler(
    State(state): State<AppState>,
    AuthTenant(tenant): AuthTenant,
) -> Result<impl IntoResponse, ApiError> {
    let counts = state.service.metrics(&tenant).await?;
    Ok(Json(counts))
}
