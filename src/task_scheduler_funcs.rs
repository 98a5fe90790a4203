use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::{
    data_types::{Destination, Language},
    sync_coordinator::SyncCoordinator,
};

/// every 30 minutes, only fetches what went stale
const REFRESH_SCHEDULE: &str = "0 0/30 * * * *";
/// daily at 03:15 UTC
const EXPIRY_SCHEDULE: &str = "0 15 3 * * *";

pub async fn start_refresh_jobs(
    sched: &JobScheduler,
    coordinator: Arc<SyncCoordinator>,
    language: Language,
) -> Result<(), JobSchedulerError> {
    let refresh_coordinator = Arc::clone(&coordinator);
    let refresh_job = Job::new_async(REFRESH_SCHEDULE, move |_uuid, mut _l| {
        let coordinator = Arc::clone(&refresh_coordinator);

        Box::pin(async move {
            for destination in [Destination::Today, Destination::ThisWeek] {
                let fetched = coordinator.refresh_if_needed(destination, language).await;
                if !fetched.is_empty() {
                    log::info!(
                        target: "mensa_sync::TaskSched",
                        "Refreshed {}/{}: {:?}",
                        destination.code(),
                        language,
                        fetched
                    );
                }
            }
        })
    })?;
    sched.add(refresh_job).await?;

    let expiry_job = Job::new_async(EXPIRY_SCHEDULE, move |_uuid, mut _l| {
        let coordinator = Arc::clone(&coordinator);

        Box::pin(async move {
            log::info!(target: "mensa_sync::TaskSched", "Sweeping expired menus");
            if let Err(e) = coordinator.delete_expired().await {
                log::warn!(target: "mensa_sync::TaskSched", "Expiry sweep failed: {}", e);
            }
        })
    })?;
    sched.add(expiry_job).await?;

    Ok(())
}
