use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info};

use crate::clients::persistence::QueryStore;
use crate::config::SchedulerConfig;
use crate::models::SearchQuery;
use crate::services::search::SearchService;

/// Periodically re-runs persisted queries marked `scheduled` whose
/// interval has elapsed since their last run.
pub struct Scheduler {
    search: Arc<SearchService>,
    store: Arc<dyn QueryStore>,
    config: SchedulerConfig,
    running: RwLock<bool>,
    cron: tokio::sync::Mutex<Option<JobScheduler>>,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        search: Arc<SearchService>,
        store: Arc<dyn QueryStore>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            search,
            store,
            config,
            running: RwLock::new(false),
            cron: tokio::sync::Mutex::new(None),
        })
    }

    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut running = self.running.write().await;
            if *running {
                return Ok(());
            }
            *running = true;
        }

        if let Some(expression) = self.config.cron_expression.clone() {
            info!("Scheduler using cron expression: {expression}");
            let scheduler = JobScheduler::new().await?;
            let this = Arc::clone(self);
            scheduler
                .add(Job::new_async(expression.as_str(), move |_id, _lock| {
                    let this = Arc::clone(&this);
                    Box::pin(async move {
                        this.run_once().await;
                    })
                })?)
                .await?;
            scheduler.start().await?;
            *self.cron.lock().await = Some(scheduler);
        } else {
            info!(
                "Scheduler checking every {} minutes",
                self.config.check_interval_minutes
            );
            let this = Arc::clone(self);
            tokio::spawn(async move {
                let every =
                    Duration::from_secs(u64::from(this.config.check_interval_minutes) * 60);
                let mut ticker = tokio::time::interval(every);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if !*this.running.read().await {
                        break;
                    }
                    this.run_once().await;
                }
            });
        }

        Ok(())
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
        if let Some(mut scheduler) = self.cron.lock().await.take() {
            drop(scheduler.shutdown().await);
        }
    }

    fn is_due(record: &SearchQuery, now: DateTime<Utc>) -> bool {
        let Some(interval) = record.schedule_interval_minutes else {
            return false;
        };

        match record
            .last_run
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        {
            Some(last_run) => {
                now.signed_duration_since(last_run) >= chrono::Duration::minutes(i64::from(interval))
            }
            // Never run, or an unparseable timestamp: run now.
            None => true,
        }
    }

    /// One scheduler pass over all scheduled queries. Also backs the CLI
    /// `check` command.
    pub async fn run_once(&self) {
        let records = match self.store.scheduled_queries().await {
            Ok(records) => records,
            Err(err) => {
                error!("Failed to load scheduled searches: {err}");
                return;
            }
        };

        let now = Utc::now();
        let due: Vec<SearchQuery> = records
            .into_iter()
            .filter(|r| Self::is_due(r, now))
            .collect();

        if due.is_empty() {
            debug!("No scheduled searches due");
            return;
        }

        info!("Running {} scheduled search(es)", due.len());
        for record in due {
            if let Err(err) = self.search.run_scheduled(&record).await {
                error!("Scheduled search failed: {err}");
            }
            metrics::counter!("guardarr_scheduled_runs_total").increment(1);
            tokio::time::sleep(Duration::from_secs(u64::from(self.config.check_delay_seconds)))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QueryType;

    fn record(interval: Option<u32>, last_run: Option<&str>) -> SearchQuery {
        SearchQuery {
            id: Some("s1".to_string()),
            user_id: "u1".to_string(),
            query_type: QueryType::Name,
            query_text: Some("jane doe".to_string()),
            image_url: None,
            search_params: serde_json::Value::Null,
            scheduled: true,
            schedule_interval_minutes: interval,
            last_run: last_run.map(str::to_string),
            created_at: None,
        }
    }

    #[test]
    fn never_run_query_is_due() {
        let now = Utc::now();
        assert!(Scheduler::is_due(&record(Some(60), None), now));
    }

    #[test]
    fn query_without_interval_is_never_due() {
        let now = Utc::now();
        assert!(!Scheduler::is_due(&record(None, None), now));
    }

    #[test]
    fn due_only_after_interval_elapses() {
        let now = Utc::now();
        let recent = (now - chrono::Duration::minutes(30)).to_rfc3339();
        let stale = (now - chrono::Duration::minutes(90)).to_rfc3339();

        assert!(!Scheduler::is_due(&record(Some(60), Some(&recent)), now));
        assert!(Scheduler::is_due(&record(Some(60), Some(&stale)), now));
    }
}
