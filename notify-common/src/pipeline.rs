use std::time::Instant;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::event::{DetectionEvent, ImageSource, NotificationRequest};
use crate::gate::{EventGate, Rejection, Verdict};
use crate::notifier::{DeliveryError, Notifier};
use crate::snapshot::{FetchError, SnapshotClient};
use crate::token::TokenPool;

/// Enumeration of reasons a dispatch was aborted.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// Outcome of a detection event that did not fail.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dispatched {
    Delivered,
    Dropped(Rejection),
}

/// Shared by every ingestion adapter: gates detection events, resolves images,
/// and delivers notifications while rotating through the token pool.
pub struct DispatchPipeline {
    gate: EventGate,
    /// Held for the whole read, send, advance sequence of a delivery.
    tokens: Mutex<TokenPool>,
    notifier: Notifier,
    snapshots: SnapshotClient,
}

impl DispatchPipeline {
    pub fn new(
        gate: EventGate,
        tokens: TokenPool,
        notifier: Notifier,
        snapshots: SnapshotClient,
    ) -> Self {
        Self {
            gate,
            tokens: Mutex::new(tokens),
            notifier,
            snapshots,
        }
    }

    pub fn gate(&self) -> &EventGate {
        &self.gate
    }

    /// The token the next delivery will use.
    pub async fn current_token(&self) -> String {
        self.tokens.lock().await.current().to_owned()
    }

    /// Gate a detection event and, when accepted, notify with its snapshot.
    ///
    /// The gate records the event as soon as it accepts it, so a failed
    /// snapshot fetch or delivery still counts against the camera's interval.
    pub async fn dispatch_event(&self, event: &DetectionEvent) -> Result<Dispatched, DispatchError> {
        metrics::counter!("notify_events_total").increment(1);

        if let Verdict::Rejected(rejection) = self.gate.evaluate(event) {
            let labels = [("reason", rejection.as_str())];
            metrics::counter!("notify_events_dropped_total", &labels).increment(1);
            debug!("dropped detection event {:?}: {}", event.id, rejection);

            return Ok(Dispatched::Dropped(rejection));
        }

        // Both are present and non-empty once the gate accepted the event.
        let event_id = event.id.as_deref().unwrap_or_default();
        let camera = event.key.as_deref().unwrap_or_default();

        let image = self
            .snapshots
            .event_snapshot(event_id)
            .await
            .inspect_err(|e| {
                metrics::counter!("notify_snapshot_failures_total").increment(1);
                error!("{}", e);
            })?;

        self.deliver(NotificationRequest::with_image(camera, ImageSource::Bytes(image)))
            .await?;

        Ok(Dispatched::Delivered)
    }

    /// Notify with `text`, downloading the image at `image_url` first when given.
    /// No gating: the caller already decided the message is worth sending.
    pub async fn dispatch_message(
        &self,
        text: &str,
        image_url: Option<&str>,
    ) -> Result<(), DispatchError> {
        let request = match image_url {
            Some(url) => {
                let image = self.snapshots.fetch(url).await.inspect_err(|e| {
                    metrics::counter!("notify_snapshot_failures_total").increment(1);
                    error!("{}", e);
                })?;
                NotificationRequest::with_image(text, ImageSource::Bytes(image))
            }
            None => NotificationRequest::text(text),
        };

        self.deliver(request).await
    }

    /// Send `request` with the current token, and rotate to the next token only
    /// if the provider confirmed delivery.
    pub async fn deliver(&self, request: NotificationRequest) -> Result<(), DispatchError> {
        let mut tokens = self.tokens.lock().await;
        let start = Instant::now();

        let result = self.notifier.send(tokens.current(), &request).await;

        metrics::histogram!("notify_delivery_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                tokens.advance();
                metrics::counter!("notify_deliveries_total").increment(1);
                info!("sent notification, next token #{}", tokens.cursor());
                Ok(())
            }
            Err(e) => {
                metrics::counter!("notify_deliveries_failed_total").increment(1);
                error!(
                    "failed to send notification with token #{}: {}",
                    tokens.cursor(),
                    e
                );
                Err(DispatchError::Delivery(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time;

    use futures::future::join_all;
    use httpmock::prelude::*;

    use super::*;
    use crate::retry::RetryPolicy;

    fn pipeline(server: &MockServer, tokens: &[&str]) -> DispatchPipeline {
        let timeout = time::Duration::from_secs(5);
        DispatchPipeline::new(
            EventGate::default(),
            TokenPool::new(tokens).unwrap(),
            Notifier::new(&server.url("/api/notify"), timeout, RetryPolicy::immediate(2)),
            SnapshotClient::new(&server.base_url(), timeout).unwrap(),
        )
    }

    fn frigate_event(id: &str, camera: &str, frame_time: f64) -> DetectionEvent {
        DetectionEvent {
            id: Some(id.to_owned()),
            key: Some(camera.to_owned()),
            timestamp: Some(frame_time),
            has_zone_entry: true,
            had_zone_entry: false,
            is_new_track: true,
        }
    }

    #[tokio::test]
    async fn test_successful_dispatches_rotate_tokens() {
        let server = MockServer::start();
        let with_a = server.mock(|when, then| {
            when.method(POST)
                .path("/api/notify")
                .header("authorization", "Bearer A");
            then.status(200);
        });
        let with_b = server.mock(|when, then| {
            when.method(POST)
                .path("/api/notify")
                .header("authorization", "Bearer B");
            then.status(200);
        });

        let pipeline = pipeline(&server, &["A", "B"]);

        pipeline.dispatch_message("first", None).await.unwrap();
        assert_eq!(with_a.hits(), 1);
        assert_eq!(with_b.hits(), 0);

        pipeline.dispatch_message("second", None).await.unwrap();
        assert_eq!(with_a.hits(), 1);
        assert_eq!(with_b.hits(), 1);

        assert_eq!(pipeline.current_token().await, "A");
    }

    #[tokio::test]
    async fn test_failed_delivery_keeps_token() {
        let server = MockServer::start();
        let provider = server.mock(|when, then| {
            when.method(POST).path("/api/notify");
            then.status(503);
        });

        let pipeline = pipeline(&server, &["A", "B"]);
        let before = pipeline.current_token().await;

        let error = pipeline.dispatch_message("alert", None).await.unwrap_err();

        assert!(matches!(error, DispatchError::Delivery(_)));
        assert_eq!(provider.hits(), 3);
        assert_eq!(pipeline.current_token().await, before);
    }

    #[tokio::test]
    async fn test_detection_event_is_delivered_with_snapshot() {
        let server = MockServer::start();
        let snapshot = server.mock(|when, then| {
            when.method(GET).path("/api/events/123/snapshot.jpg");
            then.status(200).body("JPEGDATA");
        });
        let provider = server.mock(|when, then| {
            when.method(POST)
                .path("/api/notify")
                .header("authorization", "Bearer A")
                .body_contains("front")
                .body_contains("JPEGDATA");
            then.status(200);
        });

        let pipeline = pipeline(&server, &["A", "B"]);

        let outcome = pipeline
            .dispatch_event(&frigate_event("123", "front", 100.0))
            .await
            .unwrap();

        assert_eq!(outcome, Dispatched::Delivered);
        snapshot.assert();
        provider.assert();
        assert_eq!(pipeline.current_token().await, "B");
    }

    #[tokio::test]
    async fn test_event_within_interval_is_dropped_without_side_effects() {
        let server = MockServer::start();
        let snapshot = server.mock(|when, then| {
            when.method(GET).path_contains("/snapshot.jpg");
            then.status(200).body("JPEGDATA");
        });
        let provider = server.mock(|when, then| {
            when.method(POST).path("/api/notify");
            then.status(200);
        });

        let pipeline = pipeline(&server, &["A", "B"]);

        pipeline
            .dispatch_event(&frigate_event("123", "front", 100.0))
            .await
            .unwrap();
        let outcome = pipeline
            .dispatch_event(&frigate_event("124", "front", 100.5))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Dispatched::Dropped(Rejection::TooSoon { elapsed: 0.5 })
        );
        assert_eq!(snapshot.hits(), 1);
        assert_eq!(provider.hits(), 1);
        assert_eq!(pipeline.current_token().await, "B");
    }

    #[tokio::test]
    async fn test_snapshot_failure_aborts_dispatch() {
        let server = MockServer::start();
        let snapshot = server.mock(|when, then| {
            when.method(GET).path("/api/events/123/snapshot.jpg");
            then.status(500);
        });
        let provider = server.mock(|when, then| {
            when.method(POST).path("/api/notify");
            then.status(200);
        });

        let pipeline = pipeline(&server, &["A", "B"]);

        let error = pipeline
            .dispatch_event(&frigate_event("123", "front", 100.0))
            .await
            .unwrap_err();

        assert!(matches!(error, DispatchError::Fetch(_)));
        assert_eq!(snapshot.hits(), 1);
        assert_eq!(provider.hits(), 0);
        assert_eq!(pipeline.current_token().await, "A");
    }

    /// Current behavior, not necessarily the desired one: the gate records an
    /// accepted event before delivery, so an event that failed to go out still
    /// suppresses the next one inside the interval.
    #[tokio::test]
    async fn test_interval_is_consumed_even_when_delivery_fails() {
        let server = MockServer::start();
        let _snapshot = server.mock(|when, then| {
            when.method(GET).path_contains("/snapshot.jpg");
            then.status(200).body("JPEGDATA");
        });
        let provider = server.mock(|when, then| {
            when.method(POST).path("/api/notify");
            then.status(400).body("Invalid access token");
        });

        let pipeline = pipeline(&server, &["A", "B"]);

        let first = pipeline
            .dispatch_event(&frigate_event("123", "front", 100.0))
            .await;
        assert!(matches!(first, Err(DispatchError::Delivery(_))));
        assert_eq!(pipeline.gate().last_accepted("front"), Some(100.0));

        let second = pipeline
            .dispatch_event(&frigate_event("124", "front", 101.0))
            .await
            .unwrap();
        assert!(matches!(
            second,
            Dispatched::Dropped(Rejection::TooSoon { .. })
        ));
        assert_eq!(provider.hits(), 1);
        assert_eq!(pipeline.current_token().await, "A");
    }

    #[tokio::test]
    async fn test_message_image_is_downloaded_and_attached() {
        let server = MockServer::start();
        let image = server.mock(|when, then| {
            when.method(GET).path("/webapi/snapshot");
            then.status(200).body("SYNOJPEG");
        });
        let provider = server.mock(|when, then| {
            when.method(POST)
                .path("/api/notify")
                .body_contains("name=\"imageFile\"")
                .body_contains("SYNOJPEG");
            then.status(200);
        });

        let pipeline = pipeline(&server, &["A"]);
        let image_url = server.url("/webapi/snapshot");

        pipeline
            .dispatch_message("Motion detected", Some(&image_url))
            .await
            .unwrap();

        image.assert();
        provider.assert();
    }

    #[tokio::test]
    async fn test_concurrent_deliveries_use_each_token_once() {
        let server = MockServer::start();
        let tokens = ["A", "B", "C", "D"];
        let mocks: Vec<_> = tokens
            .iter()
            .map(|token| {
                server.mock(|when, then| {
                    when.method(POST)
                        .path("/api/notify")
                        .header("authorization", format!("Bearer {token}"));
                    then.status(200);
                })
            })
            .collect();

        let pipeline = Arc::new(pipeline(&server, &tokens));

        let results = join_all((0..tokens.len()).map(|n| {
            let pipeline = pipeline.clone();
            async move { pipeline.deliver(NotificationRequest::text(&n.to_string())).await }
        }))
        .await;

        assert!(results.iter().all(Result::is_ok));
        for mock in mocks {
            assert_eq!(mock.hits(), 1);
        }
        assert_eq!(pipeline.current_token().await, "A");
    }
}
