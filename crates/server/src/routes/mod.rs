pub mod events;
pub mod status;

use axum::{
    Router,
    routing::{get, post},
};
use services::services::dispatch::Dispatcher;
use tower_http::trace::TraceLayer;

pub fn router(dispatcher: Dispatcher, require_https: bool) -> Router {
    let mut router = Router::new()
        .route("/slack/events", post(events::slack_events))
        .route("/status", get(status::get_status))
        .with_state(dispatcher)
        .layer(TraceLayer::new_for_http());
    if require_https {
        router = router.layer(axum::middleware::from_fn(
            crate::middleware::require_forwarded_https,
        ));
    }
    router
}
