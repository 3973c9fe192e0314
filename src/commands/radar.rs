//! One discovery cycle and the daemon loop around it.

use crate::analysis::spam::SpamEvaluator;
use crate::analysis::velocity::VelocityScorer;
use crate::commands::collector::collect_metrics;
use crate::commands::github::GitHubSource;
use crate::commands::pinning::Pinner;
use crate::commands::settings::RadarSettings;
use crate::commands::shutdown::wait_or_shutdown;
use crate::commands::{db, feed, watchlist};
use crate::error::{RadarError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rusqlite::Connection;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct RadarOptions {
    pub topics: Vec<String>,
    pub orgs: Vec<String>,
    pub rss_path: PathBuf,
    pub watchlist_path: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub candidates: usize,
    pub stored: usize,
    pub skipped: usize,
    pub spam: usize,
    pub high_velocity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Skipped,
    Stored,
    Spam,
    HighVelocity,
}

pub struct Radar {
    source: Box<dyn GitHubSource>,
    scorer: VelocityScorer,
    evaluator: SpamEvaluator,
    pinner: Pinner,
    options: RadarOptions,
    window_days: u32,
    archive_threshold: f64,
    search_limit: usize,
    feed_limit: usize,
}

impl Radar {
    pub fn new(
        source: Box<dyn GitHubSource>,
        settings: &RadarSettings,
        options: RadarOptions,
        pinner: Pinner,
    ) -> Result<Self> {
        if options.topics.is_empty() && options.orgs.is_empty() {
            return Err(RadarError::config(
                "at least one topic (--watch) or org (--orgs) must be specified",
            ));
        }

        Ok(Self {
            source,
            scorer: VelocityScorer::new(settings.velocity.clone()),
            evaluator: SpamEvaluator::new(settings.spam.clone())?,
            pinner,
            options,
            window_days: settings.window_days,
            archive_threshold: settings.archive_threshold,
            search_limit: settings.search_limit,
            feed_limit: settings.feed_limit,
        })
    }

    pub fn options(&self) -> &RadarOptions {
        &self.options
    }

    pub fn archive_threshold(&self) -> f64 {
        self.archive_threshold
    }

    pub fn publish_feed(&self, conn: &Connection) -> Result<()> {
        feed::publish_repo_feed(
            conn,
            &self.options.rss_path,
            &self.options.topics,
            self.feed_limit,
        )?;
        Ok(())
    }

    pub async fn scan_once(&self, conn: &Connection) -> Result<CycleSummary> {
        let now = Utc::now();
        let (candidates, event_ids) = self.gather_candidates(conn, now).await?;

        let mut summary = CycleSummary {
            candidates: candidates.len(),
            ..CycleSummary::default()
        };

        for full_name in &candidates {
            log::debug!("Analyzing {full_name}");
            match self.process(conn, full_name, now).await? {
                Outcome::Skipped => summary.skipped += 1,
                Outcome::Stored => summary.stored += 1,
                Outcome::Spam => {
                    summary.stored += 1;
                    summary.spam += 1;
                }
                Outcome::HighVelocity => {
                    summary.stored += 1;
                    summary.high_velocity += 1;
                }
            }
        }

        db::mark_events_processed(conn, &event_ids)?;
        self.publish_feed(conn)?;

        log::info!(
            "Scan complete: {} candidates, {} stored, {} skipped, {} spam, {} high-velocity",
            summary.candidates,
            summary.stored,
            summary.skipped,
            summary.spam,
            summary.high_velocity
        );
        Ok(summary)
    }

    /// Candidate repos in first-seen order, plus the ids of events they came from.
    async fn gather_candidates(
        &self,
        conn: &Connection,
        now: DateTime<Utc>,
    ) -> Result<(Vec<String>, Vec<String>)> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        let mut push = |name: String| {
            if name.contains('/') && seen.insert(name.clone()) {
                candidates.push(name);
            }
        };

        let pushed_since = now - ChronoDuration::days(i64::from(self.window_days));
        for topic in &self.options.topics {
            log::info!("Scanning topic: {topic}");
            match self.source.search_topic(topic, pushed_since, self.search_limit).await {
                Ok(names) => names.into_iter().for_each(&mut push),
                Err(e) => log::warn!("Topic search for {topic} failed: {e}"),
            }
        }

        for org in &self.options.orgs {
            log::info!("Scanning org: {org}");
            match self.source.org_repos(org).await {
                Ok(names) => names.into_iter().for_each(&mut push),
                Err(e) => log::warn!("Listing repos of {org} failed: {e}"),
            }
            match self.source.org_events(org).await {
                Ok(events) => {
                    for event in &events {
                        db::record_event(conn, event)?;
                    }
                }
                Err(e) => log::warn!("Fetching events of {org} failed: {e}"),
            }
        }

        let pending = db::unprocessed_events(conn)?;
        let mut event_ids = Vec::with_capacity(pending.len());
        for event in pending {
            push(event.repo_name);
            event_ids.push(event.event_id);
        }

        Ok((candidates, event_ids))
    }

    async fn process(
        &self,
        conn: &Connection,
        full_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Outcome> {
        let collected =
            collect_metrics(self.source.as_ref(), full_name, self.window_days, now).await;
        let mut record = match collected {
            Ok(record) => record,
            Err(e) if e.is_not_found() => {
                log::debug!("Skipping {full_name}: {e}");
                return Ok(Outcome::Skipped);
            }
            Err(e) => {
                log::warn!("Skipping {full_name} this cycle: {e}");
                return Ok(Outcome::Skipped);
            }
        };

        record.velocity_score = self
            .scorer
            .score_at(&record.activity(), record.created_at.as_deref(), now);
        let verdict = self
            .evaluator
            .evaluate(&record.full_name, record.velocity_score, &record.description, conn);

        if let Some(previous) = db::load_repo(conn, full_name)? {
            record.ipfs_cid = previous.ipfs_cid;
            record.fed_to_gar = previous.fed_to_gar;
        }
        db::upsert_repo(conn, &record)?;

        if verdict.is_spam {
            log::info!(
                "Spam: {full_name} (probability {:.2}, {} signals)",
                verdict.spam_probability,
                verdict.signals.len()
            );
            return Ok(Outcome::Spam);
        }

        if record.velocity_score < self.archive_threshold {
            return Ok(Outcome::Stored);
        }

        log::info!("High velocity: {full_name} (score: {:.1})", record.velocity_score);

        let cid = self.pinner.pin(&serde_json::to_value(&record)?).await?;
        db::set_ipfs_cid(conn, full_name, &cid)?;

        if !record.fed_to_gar && !record.owner.is_empty() {
            watchlist::add_owner(&self.options.watchlist_path, &record.owner)?;
            db::mark_fed_to_gar(conn, full_name)?;
        }

        Ok(Outcome::HighVelocity)
    }
}

/// Publish once, then scan every `interval` until `shutdown` flips.
pub async fn run_radar_daemon(
    radar: &Radar,
    conn: &Connection,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let options = radar.options();
    log::info!("Starting Repo Radar");
    log::info!("  Topics: {}", options.topics.join(", "));
    log::info!("  Orgs: {}", options.orgs.join(", "));
    log::info!("  Interval: {}s", interval.as_secs());
    log::info!("  Threshold: {}", radar.archive_threshold());
    log::info!("  RSS: {}", options.rss_path.display());

    radar.publish_feed(conn)?;

    loop {
        if let Err(e) = radar.scan_once(conn).await {
            log::error!("Scan error: {e}");
        }

        if wait_or_shutdown(&mut shutdown, interval).await {
            break;
        }
    }

    log::info!("Radar stopped");

    Ok(())
}
