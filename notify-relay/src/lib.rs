use notify_common::gate::EventGate;
use notify_common::notifier::Notifier;
use notify_common::pipeline::DispatchPipeline;
use notify_common::snapshot::SnapshotClient;
use notify_common::token::TokenPool;

use crate::config::Config;
use crate::error::RelayError;

pub mod config;
pub mod error;
pub mod frigate;
pub mod handlers;

/// Assemble the shared dispatch pipeline both ingestion adapters feed.
pub fn build_pipeline(config: &Config) -> Result<DispatchPipeline, RelayError> {
    let tokens = TokenPool::new(&config.line_notify_tokens.0)?;
    let gate = EventGate::new(config.send_interval.0);
    let notifier = Notifier::new(
        config.line_notify_api_url.as_str(),
        config.request_timeout.0,
        config.retry_policy.policy(),
    );
    let snapshots = SnapshotClient::new(&config.frigate.api_url(), config.request_timeout.0)?;

    Ok(DispatchPipeline::new(gate, tokens, notifier, snapshots))
}
