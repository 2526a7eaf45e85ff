//! Dead-letter queue route.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;

use crate::common::{ApiError, PageParams};
use crate::server::app::AppState;
use crate::server::middleware::AuthTenant;

/// GET /api/dlq?limit=&offset=
pub async fn list_dlq(
    State(state): State<AppState>,
    AuthTenant(tenant): AuthTenant,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state.service.dlq_list(&tenant, params).await?;
    Ok(Json(page))
}
