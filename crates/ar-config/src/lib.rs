pub mod inhibit;
pub mod limits;
pub mod logging;
pub mod metrics;
pub mod receiver;
pub mod relay;
pub mod route;
pub mod server;
pub mod types;
pub mod validate;

pub use inhibit::InhibitRuleConfig;
pub use limits::{
    BreakerConfig, CacheConfig, DiscoveryConfig, InhibitionCleanupConfig, QueueConfig,
    RetryConfig, SilenceCleanupConfig, TierCapacity,
};
pub use logging::{LOG_DOMAINS, LogFormat, LoggingConfig};
pub use metrics::MetricsConfig;
pub use receiver::{PayloadFormat, Priority, ReceiverConfig, TargetKind};
pub use relay::RelayConfig;
pub use route::RouteConfig;
pub use server::ServerConfig;
pub use types::HumanDuration;
pub use validate::{MAX_ROUTE_DEPTH, valid_receiver_name};
