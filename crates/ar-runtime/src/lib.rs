#[macro_use]
mod log_macros;

pub mod deliver;
pub mod discovery;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod pipeline;
pub mod publisher;
pub mod receiver;
pub mod sweeper;
pub mod tracing_init;
