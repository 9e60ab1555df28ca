use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local, NaiveTime, TimeZone, Utc};
use serde::Serialize;

use super::ics::{self, Window};
use super::{FeedStore, FeedSubscription};
use crate::error::Result;
use crate::interfaces::feeds::FeedFetcher;
use crate::interfaces::scheduler::ScheduledJob;
use crate::todo::{ImportedTodo, TodoStore};

const UNTITLED_EVENT: &str = "(untitled event)";

/// Outcome of one pass over every subscription.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SyncReport {
    pub subscriptions_synced: usize,
    pub subscriptions_failed: usize,
    pub imported: usize,
    pub skipped: usize,
    pub insert_failures: usize,
}

/// Outcome of syncing a single subscription.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SubscriptionSync {
    pub subscription_id: i32,
    pub imported: usize,
    pub skipped: usize,
    pub insert_failures: usize,
}

/// Imports calendar feed events into todos, one subscription at a time.
pub struct FeedIngestor {
    feeds: FeedStore,
    todos: TodoStore,
    fetcher: Arc<dyn FeedFetcher>,
}

impl FeedIngestor {
    pub fn new(feeds: FeedStore, todos: TodoStore, fetcher: Arc<dyn FeedFetcher>) -> Self {
        Self {
            feeds,
            todos,
            fetcher,
        }
    }

    pub fn feeds(&self) -> &FeedStore {
        &self.feeds
    }

    /// Sync every subscription. A failing subscription is logged and counted,
    /// and the others still run.
    pub async fn sync_all(&self) -> Result<SyncReport> {
        let subscriptions = self.feeds.list().await?;
        let mut report = SyncReport::default();
        for subscription in &subscriptions {
            match self.sync_subscription(subscription).await {
                Ok(outcome) => {
                    report.subscriptions_synced += 1;
                    report.imported += outcome.imported;
                    report.skipped += outcome.skipped;
                    report.insert_failures += outcome.insert_failures;
                }
                Err(err) => {
                    report.subscriptions_failed += 1;
                    tracing::warn!(
                        subscription_id = subscription.id,
                        url = %subscription.url,
                        error = %err,
                        "feed sync failed"
                    );
                }
            }
        }
        tracing::info!(
            synced = report.subscriptions_synced,
            failed = report.subscriptions_failed,
            imported = report.imported,
            "feed refresh finished"
        );
        Ok(report)
    }

    /// Fetch, parse and import one feed. Fetch and parse errors are returned
    /// without touching the last-sync stamp; individual insert failures are
    /// counted and the stamp is still set.
    pub async fn sync_subscription(
        &self,
        subscription: &FeedSubscription,
    ) -> Result<SubscriptionSync> {
        let body = self.fetcher.fetch(&subscription.url).await?;
        let now = Local::now();
        let window = Window::starting_today(&now);
        let events = ics::parse_calendar(&body, &window, &Local)?;

        let mut outcome = SubscriptionSync {
            subscription_id: subscription.id,
            ..SubscriptionSync::default()
        };
        let mut position = self.todos.bottom_position(subscription.project_id).await?;

        for event in &events {
            match self.todos.external_uid_exists(&event.uid).await {
                Ok(true) => {
                    outcome.skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(err) => {
                    outcome.insert_failures += 1;
                    tracing::warn!(
                        subscription_id = subscription.id,
                        uid = %event.uid,
                        error = %err,
                        "duplicate check failed, event not imported"
                    );
                    continue;
                }
            }
            let title = match event.summary.trim() {
                "" => UNTITLED_EVENT,
                summary => summary,
            };
            let imported = ImportedTodo {
                project_id: subscription.project_id,
                title,
                due_date: Some(normalize_start(&event.start, &Local)),
                external_uid: &event.uid,
                position,
            };
            match self.todos.create_imported(imported).await {
                Ok(_) => {
                    outcome.imported += 1;
                    position += 1;
                }
                Err(err) => {
                    outcome.insert_failures += 1;
                    tracing::warn!(
                        subscription_id = subscription.id,
                        uid = %event.uid,
                        error = %err,
                        "failed to import feed event"
                    );
                }
            }
        }

        self.feeds.mark_synced(subscription.id, Utc::now()).await?;
        tracing::debug!(
            subscription_id = subscription.id,
            imported = outcome.imported,
            skipped = outcome.skipped,
            "feed synced"
        );
        Ok(outcome)
    }

    /// Store a subscription and sync it in the background.
    pub async fn subscribe(
        self: &Arc<Self>,
        url: &str,
        project_name: &str,
    ) -> Result<FeedSubscription> {
        let subscription = self.feeds.subscribe(url, project_name).await?;
        let ingestor = Arc::clone(self);
        let pending = subscription.clone();
        tokio::spawn(async move {
            if let Err(err) = ingestor.sync_subscription(&pending).await {
                tracing::warn!(
                    subscription_id = pending.id,
                    url = %pending.url,
                    error = %err,
                    "initial feed sync failed"
                );
            }
        });
        Ok(subscription)
    }
}

/// Due date for an event start. A start at exactly local midnight is taken as
/// that calendar day in `tz`; anything else is converted as an instant.
pub fn normalize_start<Tz: TimeZone>(start: &DateTime<FixedOffset>, tz: &Tz) -> DateTime<Utc> {
    let local = start.with_timezone(tz);
    if local.time() != NaiveTime::MIN {
        return start.with_timezone(&Utc);
    }
    let midnight = local.date_naive().and_time(NaiveTime::MIN);
    tz.from_local_datetime(&midnight)
        .earliest()
        .map(|value| value.with_timezone(&Utc))
        .unwrap_or_else(|| start.with_timezone(&Utc))
}

/// Periodic [`FeedIngestor::sync_all`].
pub struct FeedRefreshJob {
    ingestor: Arc<FeedIngestor>,
    interval: Duration,
}

impl FeedRefreshJob {
    pub fn new(ingestor: Arc<FeedIngestor>, interval: Duration) -> Self {
        Self { ingestor, interval }
    }
}

#[async_trait]
impl ScheduledJob for FeedRefreshJob {
    fn name(&self) -> &str {
        "feed_refresh"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> Result<()> {
        self.ingestor.sync_all().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midnight_start_uses_local_calendar_day() {
        let berlin = FixedOffset::east_opt(2 * 3600).unwrap();
        let start = berlin.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap();
        let due = normalize_start(&start, &berlin);
        assert_eq!(due, Utc.with_ymd_and_hms(2024, 6, 9, 22, 0, 0).unwrap());
    }

    #[test]
    fn timed_start_converts_instant() {
        let berlin = FixedOffset::east_opt(2 * 3600).unwrap();
        let start = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 6, 10, 0, 0, 0)
            .unwrap();
        // 02:00 in Berlin, not midnight there.
        let due = normalize_start(&start, &berlin);
        assert_eq!(due, Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap());

        let start = berlin.with_ymd_and_hms(2024, 6, 10, 14, 45, 0).unwrap();
        assert_eq!(
            normalize_start(&start, &berlin),
            Utc.with_ymd_and_hms(2024, 6, 10, 12, 45, 0).unwrap()
        );
    }
}
