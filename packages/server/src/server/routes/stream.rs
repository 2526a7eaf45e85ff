//! SSE observer gateway.
//!
//! Bridges event-bus subscriptions to long-lived connections. Fan-out
//! only: nothing here mutates state. Events are scoped to the
//! authenticated tenant at this boundary; a subscriber that falls
//! behind sees a `lagged` marker instead of the dropped events. The
//! subscription is released when the connection closes and the stream
//! is dropped.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::server::app::AppState;
use crate::server::middleware::AuthTenant;

/// GET /api/events — long-lived lifecycle event stream.
pub async fn events_handler(
    State(state): State<AppState>,
    AuthTenant(tenant): AuthTenant,
) -> impl IntoResponse {
    let rx = state.bus.subscribe();
    let tenant_id = tenant.tenant_id;

    let stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(event) if event.tenant_id == tenant_id => serde_json::to_string(&event)
            .ok()
            .map(|data| Ok::<_, Infallible>(Event::default().event(event.kind.wire_name()).data(data))),
        Ok(_) => None,
        Err(BroadcastStreamRecvError::Lagged(_)) => {
            Some(Ok(Event::default().event("lagged").data("{}")))
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
