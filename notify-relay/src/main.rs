//! Relay NVR detection events and webhooks to a push-notification provider.
use std::sync::Arc;

use envconfig::Envconfig;
use health::HealthRegistry;
use notify_common::metrics::{serve, setup_metrics_recorder, setup_metrics_routes};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use notify_relay::config::Config;
use notify_relay::error::RelayError;
use notify_relay::frigate::FrigateSubscriber;
use notify_relay::{build_pipeline, handlers};

#[tokio::main]
async fn main() -> Result<(), RelayError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::init_from_env().expect("Invalid configuration:");

    let pipeline = Arc::new(build_pipeline(&config)?);
    let liveness = HealthRegistry::new("liveness");

    let recorder_handle = setup_metrics_recorder().expect("failed to install metrics recorder");
    let webhook_pipeline = config.nvr_type.synology.then(|| pipeline.clone());
    let router = setup_metrics_routes(
        handlers::app(webhook_pipeline, liveness.clone()),
        recorder_handle,
    )
    .layer(TraceLayer::new_for_http());

    let server_liveness = liveness.register("http_server", time::Duration::seconds(30));
    let bind = config.bind();
    let server = tokio::task::spawn(async move {
        info!("listening on {}", bind);
        tokio::select! {
            result = serve(router, &bind) => result,
            _ = async {
                loop {
                    server_liveness.report_healthy();
                    tokio::time::sleep(std::time::Duration::from_secs(10)).await;
                }
            } => Ok(()),
        }
    });

    if config.nvr_type.frigate {
        let subscriber_liveness = liveness.register(
            "mqtt_subscriber",
            time::Duration::milliseconds(2 * config.mqtt.keep_alive.0.as_millis() as i64),
        );
        let subscriber = FrigateSubscriber::new(&config.mqtt, pipeline, subscriber_liveness);

        if let Err(e) = subscriber.run().await {
            error!("Frigate subscriber stopped: {}", e);
            if !config.nvr_type.synology {
                return Err(e);
            }
        }
    }

    server.await??;

    Ok(())
}
