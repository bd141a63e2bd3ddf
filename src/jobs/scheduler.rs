//! Periodic jobs: interval discovery, daily and weekly digests
//!
//! Digests are generated for the period that just ended: the daily job at
//! 08:00 UTC summarizes yesterday, the weekly job on Monday 09:00 UTC
//! summarizes last week.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, Utc, Weekday};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::service::DiscoveryService;
use crate::discovery::Budget;
use crate::neo4j::models::{DigestPeriod, PeriodKind};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleConfig {
    pub discovery_interval: Duration,
    pub daily_digest_at: NaiveTime,
    pub weekly_digest_on: Weekday,
    pub weekly_digest_at: NaiveTime,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            discovery_interval: Duration::from_secs(3600),
            daily_digest_at: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            weekly_digest_on: Weekday::Mon,
            weekly_digest_at: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

/// Next instant strictly after `now` at `at` UTC
pub fn next_daily(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

/// Next instant strictly after `now` on `weekday` at `at` UTC
pub fn next_weekly(now: DateTime<Utc>, weekday: Weekday, at: NaiveTime) -> DateTime<Utc> {
    let days_ahead = (7 + weekday.num_days_from_monday() as i64
        - now.weekday().num_days_from_monday() as i64)
        % 7;
    let candidate = (now.date_naive() + ChronoDuration::days(days_ahead))
        .and_time(at)
        .and_utc();
    if candidate > now {
        candidate
    } else {
        candidate + ChronoDuration::days(7)
    }
}

fn until(target: DateTime<Utc>) -> Duration {
    (target - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}

pub struct Scheduler {
    service: DiscoveryService,
    config: ScheduleConfig,
    budget: Budget,
}

impl Scheduler {
    pub fn new(service: DiscoveryService, config: ScheduleConfig, budget: Budget) -> Self {
        Self {
            service,
            config,
            budget,
        }
    }

    /// Run until `cancel` fires. Jobs run one at a time.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    async fn run(self, cancel: CancellationToken) {
        let mut discovery = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.discovery_interval,
            self.config.discovery_interval,
        );
        discovery.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.config.discovery_interval.as_secs(),
            "Scheduler started"
        );

        loop {
            let now = Utc::now();
            let daily = until(next_daily(now, self.config.daily_digest_at));
            let weekly = until(next_weekly(
                now,
                self.config.weekly_digest_on,
                self.config.weekly_digest_at,
            ));

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = discovery.tick() => self.discover().await,
                _ = tokio::time::sleep(daily) => self.digest(PeriodKind::Day).await,
                _ = tokio::time::sleep(weekly) => self.digest(PeriodKind::Week).await,
            }
        }
        tracing::info!("Scheduler stopped");
    }

    async fn discover(&self) {
        match self.service.run_discovery(self.budget).await {
            Ok(report) => tracing::info!(
                run_id = %report.run_id,
                accepted = report.accepted.len(),
                "Scheduled discovery finished"
            ),
            Err(e) => tracing::warn!("Scheduled discovery failed: {:#}", e),
        }
    }

    async fn digest(&self, kind: PeriodKind) {
        let period = DigestPeriod::containing(kind, Utc::now().date_naive()).previous();
        match self.service.summarize_period(period).await {
            Ok(digest) => tracing::info!(
                period = %period,
                edges = digest.referenced_edges.len(),
                "Scheduled digest stored"
            ),
            Err(e) => tracing::warn!(period = %period, "Scheduled digest failed: {}", e),
        }
    }
}
