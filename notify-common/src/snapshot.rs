use std::time;

use bytes::Bytes;
use http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("failed to retrieve image from {url}: {error}")]
    Request { url: String, error: reqwest::Error },
    #[error("failed to retrieve image from {url}: status code {status}")]
    Status { url: String, status: StatusCode },
}

/// Downloads snapshot images, from the Frigate event API or from any URL
/// handed in by a webhook.
#[derive(Clone)]
pub struct SnapshotClient {
    base_url: String,
    client: reqwest::Client,
}

impl SnapshotClient {
    /// `base_url` is the Frigate API root, e.g. `http://frigate:5000`.
    pub fn new(base_url: &str, request_timeout: time::Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("nvr-notify")
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            client,
        })
    }

    /// Snapshot of a Frigate event, with bounding box and timestamp drawn in.
    pub fn event_snapshot_url(&self, event_id: &str) -> String {
        format!(
            "{}/api/events/{}/snapshot.jpg?bbox=1&timestamp=1",
            self.base_url, event_id
        )
    }

    pub async fn event_snapshot(&self, event_id: &str) -> Result<Bytes, FetchError> {
        self.fetch(&self.event_snapshot_url(event_id)).await
    }

    /// GET `url` and return the body. Anything but a 2xx is an error.
    pub async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let request_error = |error| FetchError::Request {
            url: url.to_owned(),
            error,
        };

        let response = self.client.get(url).send().await.map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_owned(),
                status,
            });
        }

        response.bytes().await.map_err(request_error)
    }
}
