use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use notify_common::pipeline::{DispatchError, DispatchPipeline};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error};

/// Synology puts this in `image_url` when the snapshot is sent as an attachment
/// instead of a downloadable link.
pub const NO_IMAGE_SENTINEL: &str = "ATTACHMENT";

#[derive(Error, Debug)]
pub enum WebhookHandlerError {
    #[error("unsupported content type")]
    UnsupportedContentType,
    #[error("failed to parse request: {0}")]
    RequestParsingError(String),
    #[error("missing message or image_url")]
    MissingFields,
    #[error("failed to retrieve image")]
    ImageFetchError,
    #[error("failed to send notification")]
    DeliveryError,
}

impl IntoResponse for WebhookHandlerError {
    fn into_response(self) -> Response {
        match self {
            WebhookHandlerError::UnsupportedContentType
            | WebhookHandlerError::RequestParsingError(_)
            | WebhookHandlerError::MissingFields => (StatusCode::BAD_REQUEST, self.to_string()),

            WebhookHandlerError::ImageFetchError | WebhookHandlerError::DeliveryError => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
        }
        .into_response()
    }
}

impl From<DispatchError> for WebhookHandlerError {
    fn from(error: DispatchError) -> Self {
        match error {
            DispatchError::Fetch(_) => WebhookHandlerError::ImageFetchError,
            DispatchError::Delivery(_) => WebhookHandlerError::DeliveryError,
        }
    }
}

/// The JSON document a Synology Surveillance Station webhook sends.
#[derive(Deserialize, Debug, PartialEq)]
pub struct WebhookPayload {
    message: Option<String>,
    image_url: Option<String>,
}

impl WebhookPayload {
    /// Message to send, and the image to download with it, if any.
    fn validate(self) -> Result<(String, Option<String>), WebhookHandlerError> {
        match (self.message, self.image_url) {
            (Some(message), Some(image_url)) if image_url.contains(NO_IMAGE_SENTINEL) => {
                Ok((message, None))
            }
            (Some(message), Some(image_url)) => Ok((message, Some(image_url))),
            _ => Err(WebhookHandlerError::MissingFields),
        }
    }
}

/// Decode the body according to its content type. Form bodies carry the JSON
/// document as the name of their first field.
pub fn parse_request(headers: &HeaderMap, body: &[u8]) -> Result<WebhookPayload, WebhookHandlerError> {
    let mimetype = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_default();

    let parse_error = |e: serde_json::Error| WebhookHandlerError::RequestParsingError(e.to_string());

    match mimetype.as_str() {
        "application/json" => serde_json::from_slice(body).map_err(parse_error),
        "application/x-www-form-urlencoded" => {
            let fields: Vec<(String, String)> = serde_urlencoded::from_bytes(body)
                .map_err(|e| WebhookHandlerError::RequestParsingError(e.to_string()))?;
            let (document, _) = fields.into_iter().next().ok_or_else(|| {
                WebhookHandlerError::RequestParsingError("empty form".to_owned())
            })?;
            serde_json::from_str(&document).map_err(parse_error)
        }
        _ => Err(WebhookHandlerError::UnsupportedContentType),
    }
}

pub async fn post(
    State(pipeline): State<Arc<DispatchPipeline>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, WebhookHandlerError> {
    let (message, image_url) = parse_request(&headers, &body)
        .and_then(WebhookPayload::validate)
        .inspect_err(|e| error!("failed to parse webhook request: {}", e))?;

    debug!("received webhook: {:?} {:?}", message, image_url);

    pipeline
        .dispatch_message(&message, image_url.as_deref())
        .await?;

    Ok("Webhook received successfully")
}
