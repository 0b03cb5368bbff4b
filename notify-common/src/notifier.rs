use std::time;

use bytes::Bytes;
use http::StatusCode;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::event::{ImageSource, NotificationRequest};
use crate::retry::{is_retryable_status, RetryPolicy};
use crate::util::{first_n_bytes_of_response, parse_retry_after_header};

pub const LINE_NOTIFY_API_URL: &str = "https://notify-api.line.me/api/notify";

/// Provider response body marking image-specific throttling.
const IMAGE_RATE_LIMIT_MESSAGE: &str = "Image rate limit exceeded";

/// How much of a provider response body we keep for logs and errors.
const MAX_RESPONSE_BODY: usize = 1024;

/// Enumeration of errors that can occur while delivering a notification.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("failed to reach the notification provider: {0}")]
    Request(#[from] reqwest::Error),
    #[error("notification provider responded with {status}: {response}")]
    Status {
        status: StatusCode,
        response: String,
    },
    #[error("failed to build notification form: {0}")]
    Form(reqwest::Error),
}

impl DeliveryError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            DeliveryError::Status { status, .. } => Some(*status),
            DeliveryError::Request(error) => error.status(),
            DeliveryError::Form(_) => None,
        }
    }
}

/// Image content as it goes on the wire.
enum Attachment {
    File(Bytes),
    Remote(String),
}

/// A response we have fully read.
struct ProviderResponse {
    status: StatusCode,
    body: String,
}

impl ProviderResponse {
    fn is_image_rate_limited(&self) -> bool {
        self.status == StatusCode::BAD_REQUEST && self.body.contains(IMAGE_RATE_LIMIT_MESSAGE)
    }
}

pub fn build_http_client(request_timeout: time::Duration) -> reqwest::Result<Client> {
    reqwest::Client::builder()
        .user_agent("nvr-notify")
        .timeout(request_timeout)
        .build()
}

/// Sends notifications to a LINE Notify compatible endpoint.
///
/// Every call to `send` builds its own HTTP client, so no connection state is
/// shared between notifications.
#[derive(Clone, Debug)]
pub struct Notifier {
    url: String,
    request_timeout: time::Duration,
    retry_policy: RetryPolicy,
}

impl Notifier {
    pub fn new(url: &str, request_timeout: time::Duration, retry_policy: RetryPolicy) -> Self {
        Self {
            url: url.to_owned(),
            request_timeout,
            retry_policy,
        }
    }

    /// Send a notification authenticated with `token`.
    ///
    /// Server errors and transport failures are retried according to the
    /// `RetryPolicy`. A 400 reporting the image rate limit triggers one more
    /// request without the image, with a fresh retry budget. Only a final 2xx
    /// counts as delivered.
    pub async fn send(
        &self,
        token: &str,
        request: &NotificationRequest,
    ) -> Result<(), DeliveryError> {
        let client = build_http_client(self.request_timeout)?;
        let attachment = resolve_attachment(request.image.as_ref()).await;

        let mut response = self
            .post_with_retries(&client, token, &request.text, attachment.as_ref())
            .await?;

        if attachment.is_some() && response.is_image_rate_limited() {
            warn!("image rate limit exceeded, sending text only");
            metrics::counter!("notify_image_fallbacks_total").increment(1);

            response = self
                .post_with_retries(&client, token, &request.text, None)
                .await?;
        }

        if response.status.is_success() {
            info!("notification delivered");
            Ok(())
        } else {
            Err(DeliveryError::Status {
                status: response.status,
                response: response.body,
            })
        }
    }

    async fn post_with_retries(
        &self,
        client: &Client,
        token: &str,
        text: &str,
        attachment: Option<&Attachment>,
    ) -> Result<ProviderResponse, DeliveryError> {
        let mut retries = 0;

        loop {
            let (result, retry_after) = match self.request(client, token, text, attachment) {
                Ok(request) => match request.send().await {
                    Ok(response) => {
                        let status = response.status();
                        let retry_after = parse_retry_after_header(response.headers());
                        let body = first_n_bytes_of_response(response, MAX_RESPONSE_BODY)
                            .await
                            .unwrap_or_default();
                        (Ok(ProviderResponse { status, body }), retry_after)
                    }
                    Err(error) => (Err(DeliveryError::Request(error)), None),
                },
                Err(error) => return Err(error),
            };

            let retryable = match &result {
                Ok(response) => is_retryable_status(response.status),
                Err(DeliveryError::Request(_)) => true,
                Err(_) => false,
            };
            if !retryable || !self.retry_policy.can_retry(retries) {
                return result;
            }

            let interval = self.retry_policy.retry_interval(retries, retry_after);
            match &result {
                Ok(response) => warn!(
                    "notification provider responded with {}, retrying in {:?}",
                    response.status, interval
                ),
                Err(error) => warn!("{}, retrying in {:?}", error, interval),
            }
            metrics::counter!("notify_retries_total").increment(1);

            tokio::time::sleep(interval).await;
            retries += 1;
        }
    }

    fn request(
        &self,
        client: &Client,
        token: &str,
        text: &str,
        attachment: Option<&Attachment>,
    ) -> Result<RequestBuilder, DeliveryError> {
        let request = client.post(&self.url).bearer_auth(token);

        let request = match attachment {
            None => request.form(&[("message", text)]),
            Some(Attachment::File(content)) => {
                let image = Part::bytes(content.to_vec())
                    .file_name("snapshot.jpg")
                    .mime_str("image/jpeg")
                    .map_err(DeliveryError::Form)?;
                request.multipart(
                    Form::new()
                        .text("message", text.to_owned())
                        .part("imageFile", image),
                )
            }
            Some(Attachment::Remote(url)) => request.multipart(
                Form::new()
                    .text("message", text.to_owned())
                    .text("imageThumbnail", url.clone())
                    .text("imageFullsize", url.clone()),
            ),
        };

        Ok(request)
    }
}

/// Turn an `ImageSource` into wire content. An unreadable file degrades to a
/// text-only notification.
async fn resolve_attachment(image: Option<&ImageSource>) -> Option<Attachment> {
    match image? {
        ImageSource::Bytes(content) => Some(Attachment::File(content.clone())),
        ImageSource::FilePath(path) => match tokio::fs::read(path).await {
            Ok(content) => Some(Attachment::File(Bytes::from(content))),
            Err(e) => {
                error!("failed to read image file {}: {}", path.display(), e);
                None
            }
        },
        ImageSource::RemoteUrl(url) => Some(Attachment::Remote(url.clone())),
    }
}
