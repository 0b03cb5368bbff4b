pub mod event;
pub mod gate;
pub mod metrics;
pub mod notifier;
pub mod pipeline;
pub mod retry;
pub mod snapshot;
pub mod token;
pub mod util;
