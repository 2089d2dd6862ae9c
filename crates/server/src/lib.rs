//! HTTP surface of the greeter bot: the Slack Events API webhook, the items
//! API and a health report, served by axum.

pub mod api;
pub mod bootstrap;
pub mod events;
pub mod health;

use std::sync::Arc;

use axum::{
    http::{
        header::{
            ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
            ACCESS_CONTROL_ALLOW_ORIGIN,
        },
        HeaderValue,
    },
    routing::{get, post},
    Router,
};
use greeter_core::ItemStore;
use greeter_slack::{intake::EventIntake, signature::SignatureVerifier};
use tower_http::{
    catch_panic::CatchPanicLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer,
};

/// Older webhook path, still routed for Slack apps that were configured against it.
pub const LEGACY_EVENTS_PATH: &str = "/default/slack-subscriptions";

/// Paths owned by the built-in routes; the events path must not reuse them.
pub const RESERVED_PATHS: &[&str] = &["/", "/health", "/api/items", "/api/items/{id}"];

#[derive(Clone)]
pub struct AppState {
    pub intake: Arc<EventIntake>,
    /// Present when a signing secret is configured.
    pub verifier: Option<Arc<SignatureVerifier>>,
    pub items: Arc<ItemStore>,
}

impl AppState {
    pub fn new(intake: EventIntake, verifier: Option<SignatureVerifier>, items: ItemStore) -> Self {
        Self {
            intake: Arc::new(intake),
            verifier: verifier.map(Arc::new),
            items: Arc::new(items),
        }
    }
}

const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
const ALLOWED_HEADERS: &str = "Origin, Accept, Content-Type, X-Requested-With, X-CSRF-Token";

pub fn router(state: AppState, events_path: &str) -> Router {
    let mut router = Router::new()
        .route("/", get(api::index).options(api::preflight))
        .route("/health", get(health::health).options(api::preflight))
        .route("/api/items", get(api::list_items).post(api::create_item).options(api::preflight))
        .route("/api/items/{id}", get(api::get_item).options(api::preflight))
        .route(events_path, post(events::receive).options(api::preflight));
    if events_path != LEGACY_EVENTS_PATH {
        router =
            router.route(LEGACY_EVENTS_PATH, post(events::receive).options(api::preflight));
    }

    with_middleware(router).with_state(state)
}

/// Shared layer stack: JSON 404 fallback, panic-to-500 conversion, request
/// tracing and the fixed CORS headers. OPTIONS requests still reach the
/// routed `preflight` handler so they answer with `{}`.
pub fn with_middleware<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .fallback(api::fallback)
        .layer(CatchPanicLayer::custom(api::panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        ))
}
