//! Periodic jobs
//!
//! Provides:
//! - File integrity audit with a report to the site administrators
//! - Pattern-based OAI set synchronisation (membership tasks are queued)
//! - Sitemap rebuild

use crate::worker::{pause, WorkerError};
use futures::future::join_all;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info};
use zenodo_common::{auditor, config::TaskConfig, metrics, oaiset, sitemap, Services};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodicJob {
    FileAudit,
    PatternSync,
    Sitemap,
}

impl PeriodicJob {
    pub const ALL: [PeriodicJob; 3] = [PeriodicJob::FileAudit, PeriodicJob::PatternSync, PeriodicJob::Sitemap];

    pub fn name(&self) -> &'static str {
        match self {
            PeriodicJob::FileAudit => "file_audit",
            PeriodicJob::PatternSync => "pattern_sync",
            PeriodicJob::Sitemap => "sitemap",
        }
    }

    pub fn interval(&self, config: &TaskConfig) -> Duration {
        let secs = match self {
            PeriodicJob::FileAudit => config.audit_interval_secs,
            PeriodicJob::PatternSync => config.pattern_sync_interval_secs,
            PeriodicJob::Sitemap => config.sitemap_interval_secs,
        };
        Duration::from_secs(secs.max(1))
    }

    /// The sitemap is served from the cache, so it is built right away
    fn runs_at_startup(&self) -> bool {
        matches!(self, PeriodicJob::Sitemap)
    }

    /// Run once; the count is bad files, queued tasks or sitemap pages
    pub async fn run(&self, services: &Services) -> Result<usize, WorkerError> {
        let outcome = match self {
            PeriodicJob::FileAudit => auditor::files::audit_files(
                services.db.write(),
                &services.storage,
                services.mailer.as_ref(),
                &services.config.site.admin_email,
            )
            .await
            .map(|report| report.bad_files.len()),
            PeriodicJob::PatternSync => queue_pattern_sync(services).await,
            PeriodicJob::Sitemap => sitemap::update_sitemap(services).await,
        };

        metrics::record_periodic_job(self.name(), outcome.is_ok());
        outcome.map_err(|e| WorkerError::Job {
            job: self.name(),
            message: e.to_string(),
        })
    }
}

async fn queue_pattern_sync(services: &Services) -> zenodo_common::Result<usize> {
    let tasks = oaiset::pattern_sync_tasks(services.db.read()).await?;
    let queued = tasks.len();
    for task in tasks {
        services.queue.push(task).await?;
    }
    Ok(queued)
}

async fn job_loop(services: &Services, job: PeriodicJob, mut shutdown: watch::Receiver<bool>) {
    let interval = job.interval(&services.config.tasks);
    info!(job = job.name(), interval_secs = interval.as_secs(), "Periodic job scheduled");

    if !job.runs_at_startup() && pause(&mut shutdown, interval).await {
        return;
    }

    loop {
        let started = Instant::now();
        match job.run(services).await {
            Ok(count) => info!(
                job = job.name(),
                count,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Periodic job finished"
            ),
            Err(e) => error!(job = job.name(), error = %e, "Periodic job failed"),
        }

        if pause(&mut shutdown, interval).await {
            return;
        }
    }
}

/// Run every periodic job on its own interval until shutdown
pub async fn run_schedule(services: Services, shutdown: watch::Receiver<bool>) {
    join_all(
        PeriodicJob::ALL
            .iter()
            .map(|job| job_loop(&services, *job, shutdown.clone())),
    )
    .await;
    info!("Periodic jobs stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intervals_follow_config() {
        let config = TaskConfig {
            audit_interval_secs: 10,
            pattern_sync_interval_secs: 20,
            sitemap_interval_secs: 0,
            ..TaskConfig::default()
        };
        assert_eq!(PeriodicJob::FileAudit.interval(&config), Duration::from_secs(10));
        assert_eq!(PeriodicJob::PatternSync.interval(&config), Duration::from_secs(20));
        assert_eq!(PeriodicJob::Sitemap.interval(&config), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_jobs_on_empty_site() {
        let services = Services::in_memory().await.unwrap();

        assert_eq!(PeriodicJob::FileAudit.run(&services).await.unwrap(), 0);
        assert_eq!(PeriodicJob::PatternSync.run(&services).await.unwrap(), 0);
        assert_eq!(PeriodicJob::Sitemap.run(&services).await.unwrap(), 0);

        // The index exists even without pages
        let index = sitemap::page(&services.cache, 0).await.unwrap().unwrap();
        assert!(index.contains("<sitemapindex"));
    }

    #[tokio::test]
    async fn test_schedule_builds_sitemap_and_stops() {
        let services = Services::in_memory().await.unwrap();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_schedule(services.clone(), rx));

        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("schedule did not stop")
            .unwrap();

        assert!(sitemap::page(&services.cache, 0).await.unwrap().is_some());
    }
}
