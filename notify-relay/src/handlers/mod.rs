mod app;
pub mod webhook;

pub use app::app;
