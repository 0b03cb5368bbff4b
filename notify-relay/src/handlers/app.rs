use std::sync::Arc;

use axum::{routing, Router};
use health::HealthRegistry;
use notify_common::pipeline::DispatchPipeline;

use super::webhook;

/// Routes served by the relay. `/webhook` is only mounted when a pipeline is
/// given, i.e. when the Synology source is enabled.
pub fn app(pipeline: Option<Arc<DispatchPipeline>>, liveness: HealthRegistry) -> Router {
    let router = Router::new().route("/", routing::get(index)).route(
        "/_liveness",
        routing::get(move || std::future::ready(liveness.get_status())),
    );

    match pipeline {
        Some(pipeline) => router.route("/webhook", routing::post(webhook::post).with_state(pipeline)),
        None => router,
    }
}

pub async fn index() -> &'static str {
    "nvr-notify"
}
