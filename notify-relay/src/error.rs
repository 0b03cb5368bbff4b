use notify_common::token::TokenPoolError;
use thiserror::Error;

/// Enumeration of errors that stop the relay, or one of its ingestion adapters.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("invalid notification token pool: {0}")]
    TokenPool(#[from] TokenPoolError),
    #[error("failed to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("failed to connect to MQTT broker at {broker} after {attempts} attempts")]
    MqttConnect { broker: String, attempts: u32 },
    #[error("failed to subscribe to MQTT topic {topic}: {error}")]
    MqttSubscribe {
        topic: String,
        error: rumqttc::ClientError,
    },
    #[error("http server failed: {0}")]
    Serve(#[from] std::io::Error),
    #[error("relay task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
