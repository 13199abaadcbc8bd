use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::promotions::PromotionManager;

/// Spawns the periodic promotion sweep. Reads derive the same status lazily,
/// so a missed or failed round only delays what is persisted.
pub fn spawn(promotions: PromotionManager, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            run_once(&promotions).await;
        }
    })
}

pub async fn run_once(promotions: &PromotionManager) {
    match promotions.sweep().await {
        Ok(0) => log::debug!("Promotion sweep: nothing to update"),
        Ok(moved) => log::info!("Promotion sweep updated {} promotion(s)", moved),
        Err(err) => log::error!("Promotion sweep failed: {err:?}"),
    }
}
