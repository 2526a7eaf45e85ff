//! Application setup and router assembly.

use std::sync::Arc;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::Method;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::domains::jobs::JobService;
use crate::kernel::jobs::JobStore;
use crate::kernel::EventBus;
use crate::server::routes::{
    events_handler, get_job, health_handler, list_dlq, list_jobs, metrics_handler, submit_job,
};

/// Shared state for every route.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub service: Arc<JobService>,
    pub bus: EventBus,
}

/// Build the axum application.
pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/jobs", get(list_jobs).post(submit_job))
        .route("/api/jobs/:id", get(get_job))
        .route("/api/dlq", get(list_dlq))
        .route("/api/metrics", get(metrics_handler))
        .route("/api/events", get(events_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::domains::jobs::JobServiceConfig;
    use crate::kernel::jobs::testing::InMemoryJobStore;
    use crate::kernel::Admission;

    fn test_app() -> Router {
        let store = Arc::new(InMemoryJobStore::new());
        store.insert_tenant("acme", "key-acme", None, None);
        let store: Arc<dyn JobStore> = store;
        let admission = Arc::new(Admission::new());
        let bus = EventBus::new();
        let service = Arc::new(JobService::new(
            store.clone(),
            admission,
            bus.clone(),
            JobServiceConfig {
                default_max_retries: 3,
                default_rate_limit_per_minute: 60,
                default_max_concurrent_jobs: 10,
            },
        ));
        build_app(AppState {
            store,
            service,
            bus,
        })
    }

    fn submit_request(auth: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/jobs")
            .header("content-type", "application/json");
        if let Some(auth) = auth {
            builder = builder.header("authorization", auth);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn submit_without_credentials_is_401() {
        let app = test_app();
        let response = app
            .oneshot(submit_request(None, r#"{"payload":{"x":1}}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn submit_with_credentials_creates_a_job() {
        let app = test_app();
        let response = app
            .oneshot(submit_request(
                Some("Bearer key-acme"),
                r#"{"payload":{"x":1},"max_retries":2}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["status"], "PENDING");
        assert_eq!(body["tenant_id"], "acme");
        assert_eq!(body["max_retries"], 2);
        assert!(body["id"].as_str().is_some());
    }

    #[tokio::test]
    async fn repeated_idempotent_submit_returns_200_with_same_id() {
        let app = test_app();
        let body = r#"{"payload":{"x":1},"idempotency_key":"k1"}"#;

        let first = app
            .clone()
            .oneshot(submit_request(Some("Bearer key-acme"), body))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);
        let first_id = body_json(first).await["id"].clone();

        let second = app
            .oneshot(submit_request(Some("Bearer key-acme"), body))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(body_json(second).await["id"], first_id);
    }

    #[tokio::test]
    async fn list_jobs_is_tenant_scoped_and_paged() {
        let app = test_app();
        app.clone()
            .oneshot(submit_request(Some("Bearer key-acme"), r#"{"payload":{}}"#))
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/jobs?limit=10&offset=0")
                    .header("authorization", "Bearer key-acme")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["items"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn metrics_reports_status_counts() {
        let app = test_app();
        app.clone()
            .oneshot(submit_request(Some("Bearer key-acme"), r#"{"payload":{}}"#))
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/metrics")
                    .header("authorization", "Bearer key-acme")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["pending"], 1);
        assert_eq!(body["dlq"], 0);
    }

    #[tokio::test]
    async fn dlq_starts_empty() {
        let app = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/dlq")
                    .header("authorization", "Bearer key-acme")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["total"], 0);
    }

    #[tokio::test]
    async fn unknown_job_id_is_404() {
        let app = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/jobs/{}", uuid::Uuid::new_v4()))
                    .header("authorization", "Bearer key-acme")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn health_is_ok_with_a_reachable_store() {
        let app = test_app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
    }
}
