use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub dispatcher: HealthCheck,
    pub seen_events: HealthCheck,
    pub checked_at: String,
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let dispatcher = dispatcher_check(&state);
    let ready = dispatcher.status == "ready";

    let dedup = state.intake.deduplicator();
    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "greeter-server runtime initialized".to_owned(),
        },
        dispatcher,
        seen_events: HealthCheck {
            status: "ready",
            detail: format!("{} of {} event ids tracked", dedup.len(), dedup.policy().max_tracked),
        },
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

fn dispatcher_check(state: &AppState) -> HealthCheck {
    let dispatcher = state.intake.dispatcher();
    let stats = dispatcher.stats();
    if dispatcher.is_closed() {
        return HealthCheck {
            status: "degraded",
            detail: format!("reply queue closed with {} replies undelivered", stats.in_flight()),
        };
    }

    HealthCheck {
        status: "ready",
        detail: format!(
            "{} delivered, {} failed, {} in flight",
            stats.delivered,
            stats.failed,
            stats.in_flight()
        ),
    }
}
