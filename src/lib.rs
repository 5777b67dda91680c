pub mod backends;
pub mod balancer;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod proxy;
pub mod refresh;
pub mod registry;
pub mod rewrite;
pub mod routing;
pub mod server;
pub mod status;
pub mod tracker;
