pub mod alert;
pub mod breaker;
pub mod cache;
pub mod dlq;
pub mod error;
pub mod fingerprint;
pub mod group;
pub mod ingest;
pub mod inhibit;
pub mod matcher;
pub mod publish;
pub mod queue;
pub mod route;
pub mod silence;
pub mod target;

pub use alert::{Alert, AlertStatus, LabelSet};
pub use error::{CoreError, CoreReason, CoreResult};
