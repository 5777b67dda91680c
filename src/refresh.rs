use crate::balancer::Balancer;
use crate::registry::ModelSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Spawn the periodic registry refresh.
///
/// The first refresh is expected to have run already (startup awaits it),
/// so the task waits one full period before its first tick.
pub fn spawn_model_refresher(
    balancer: Arc<Balancer>,
    source: Arc<dyn ModelSource>,
    period: Duration,
) -> JoinHandle<()> {
    debug!("Starting model updater with {}ms interval", period.as_millis());

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            debug!("Updating model list...");
            let summary = balancer.refresh(source.as_ref()).await;
            debug!("Model update completed. Available models: {}", summary.loaded);
        }
    })
}
