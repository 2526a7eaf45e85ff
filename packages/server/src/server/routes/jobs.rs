//! Job submission and query routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::common::{ApiError, PageParams};
use crate::domains::jobs::SubmitRequest;
use crate::kernel::jobs::JobStatus;
use crate::server::app::AppState;
use crate::server::middleware::AuthTenant;

/// POST /api/jobs
///
/// 201 for a new job, 200 when the idempotency key matched a prior one.
pub async fn submit_job(
    State(state): State<AppState>,
    AuthTenant(tenant): AuthTenant,
    Json(request): Json<SubmitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.service.submit(&tenant, request).await?;
    let status = if outcome.is_created() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome.job().clone())))
}

/// GET /api/jobs/:id
pub async fn get_job(
    State(state): State<AppState>,
    AuthTenant(tenant): AuthTenant,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.service.get(&tenant, job_id).await?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<JobStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /api/jobs?status=&limit=&offset=
pub async fn list_jobs(
    State(state): State<AppState>,
    AuthTenant(tenant): AuthTenant,
    Query(query): Query<ListJobsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let params = PageParams {
        limit: query.limit,
        offset: query.offset,
    };
    let page = state.service.list(&tenant, query.status, params).await?;
    Ok(Json(page))
}
