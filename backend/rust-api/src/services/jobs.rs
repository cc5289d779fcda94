use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::{sync::watch, task::JoinHandle, time::sleep};
use tracing::{info, warn};

use crate::{
    metrics::JOB_TICKS_TOTAL,
    services::{
        due_date_service::DueDateService, notification_service::NotificationService,
        section_service::SectionService, AppState,
    },
};

/// A periodic background task. A failing tick is logged and the loop goes on.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;
    fn interval(&self) -> Duration;
    async fn tick(&self) -> Result<()>;
}

/// Pushes pending fee and salary entries once the configured due day arrives
pub struct PaymentDueJob {
    state: Arc<AppState>,
}

#[async_trait]
impl Job for PaymentDueJob {
    fn name(&self) -> &'static str {
        "payment_due"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.state.config.jobs.payment_check_interval_secs)
    }

    async fn tick(&self) -> Result<()> {
        DueDateService::new(self.state.mongo.clone())
            .run_payment_check(Utc::now().date_naive())
            .await?;
        Ok(())
    }
}

pub struct ScheduledNotificationJob {
    state: Arc<AppState>,
}

#[async_trait]
impl Job for ScheduledNotificationJob {
    fn name(&self) -> &'static str {
        "scheduled_notifications"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.state.config.jobs.notification_sweep_interval_secs)
    }

    async fn tick(&self) -> Result<()> {
        NotificationService::new(&self.state)
            .dispatch_due(Utc::now())
            .await?;
        Ok(())
    }
}

pub struct SectionExpiryJob {
    state: Arc<AppState>,
}

#[async_trait]
impl Job for SectionExpiryJob {
    fn name(&self) -> &'static str {
        "section_expiry"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.state.config.jobs.section_sweep_interval_secs)
    }

    async fn tick(&self) -> Result<()> {
        SectionService::new(self.state.mongo.clone())
            .deactivate_expired(Utc::now())
            .await?;
        Ok(())
    }
}

/// Runs one job until the shutdown flag flips to true
pub async fn run_job(job: Arc<dyn Job>, mut shutdown: watch::Receiver<bool>) {
    let interval = job.interval().max(Duration::from_secs(1));
    info!(job = job.name(), interval_secs = interval.as_secs(), "Starting background job");

    loop {
        match job.tick().await {
            Ok(()) => {
                JOB_TICKS_TOTAL
                    .with_label_values(&[job.name(), "success"])
                    .inc();
                tracing::debug!(job = job.name(), "Job tick completed");
            }
            Err(err) => {
                JOB_TICKS_TOTAL
                    .with_label_values(&[job.name(), "error"])
                    .inc();
                warn!(job = job.name(), error = %err, "Job tick failed");
            }
        }

        tokio::select! {
            _ = sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!(job = job.name(), "Background job stopped");
}

pub fn default_jobs(state: &Arc<AppState>) -> Vec<Arc<dyn Job>> {
    let payments: Arc<dyn Job> = Arc::new(PaymentDueJob {
        state: state.clone(),
    });
    let notifications: Arc<dyn Job> = Arc::new(ScheduledNotificationJob {
        state: state.clone(),
    });
    let sections: Arc<dyn Job> = Arc::new(SectionExpiryJob {
        state: state.clone(),
    });
    vec![payments, notifications, sections]
}

/// Spawns every job; returns nothing when jobs are disabled in config
pub fn spawn_jobs(state: &Arc<AppState>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
    if !state.config.jobs.enabled {
        info!("Background jobs disabled");
        return Vec::new();
    }
    default_jobs(state)
        .into_iter()
        .map(|job| tokio::spawn(run_job(job, shutdown.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingJob {
        ticks: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Job for CountingJob {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn interval(&self) -> Duration {
            Duration::from_secs(1)
        }

        async fn tick(&self) -> Result<()> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_keeps_ticking_after_errors_until_shutdown() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_job(
            Arc::new(CountingJob {
                ticks: ticks.clone(),
                fail: true,
            }),
            rx,
        ));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(ticks.load(Ordering::SeqCst) >= 2);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_job() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_job(
            Arc::new(CountingJob {
                ticks: ticks.clone(),
                fail: false,
            }),
            rx,
        ));
        tokio::task::yield_now().await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(ticks.load(Ordering::SeqCst) >= 1);
    }
}
