//! Commit archiving for watched orgs and users.

use crate::analysis::secrets::SecretScanner;
use crate::commands::github::{GitHubSource, RemoteCommit};
use crate::commands::pinning::{ArweaveUploader, Pinner};
use crate::commands::shutdown::wait_or_shutdown;
use crate::commands::{db, feed, watchlist};
use crate::error::{RadarError, Result};
use crate::models::commit::CommitRecord;
use rusqlite::Connection;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

pub const MAX_MESSAGE_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub orgs: Vec<String>,
    /// Watch-list written by the radar; re-read every cycle.
    pub orgs_file: Option<PathBuf>,
    pub rss_path: PathBuf,
    pub check_secrets: bool,
    pub feed_limit: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub repos: usize,
    pub archived: usize,
    pub blocked: usize,
}

pub struct Relay {
    source: Box<dyn GitHubSource>,
    scanner: SecretScanner,
    pinner: Pinner,
    arweave: Option<ArweaveUploader>,
    options: RelayOptions,
}

impl Relay {
    pub fn new(
        source: Box<dyn GitHubSource>,
        options: RelayOptions,
        pinner: Pinner,
        arweave: Option<ArweaveUploader>,
    ) -> Result<Self> {
        let relay = Self {
            source,
            scanner: SecretScanner::new()?,
            pinner,
            arweave,
            options,
        };
        if relay.watched_orgs()?.is_empty() {
            return Err(RadarError::config(
                "no orgs to watch: pass --orgs or provide a watch-list file",
            ));
        }
        Ok(relay)
    }

    /// Orgs from the command line first, then watch-list entries not already named.
    pub fn watched_orgs(&self) -> Result<Vec<String>> {
        let mut orgs = self.options.orgs.clone();
        if let Some(path) = &self.options.orgs_file {
            for owner in watchlist::read_watchlist(path)? {
                if !orgs.contains(&owner) {
                    orgs.push(owner);
                }
            }
        }
        Ok(orgs)
    }

    pub fn publish_feed(&self, conn: &Connection) -> Result<()> {
        let orgs = self.watched_orgs()?;
        feed::publish_commit_feed(conn, &self.options.rss_path, &orgs, self.options.feed_limit)?;
        Ok(())
    }

    pub async fn poll_once(&self, conn: &Connection) -> Result<PollSummary> {
        let mut summary = PollSummary::default();
        let orgs = self.watched_orgs()?;

        for org in &orgs {
            log::info!("Polling {org}...");
            let repos = match self.source.org_repos(org).await {
                Ok(repos) => repos,
                Err(e) => {
                    log::warn!("Listing repos of {org} failed: {e}");
                    continue;
                }
            };
            log::info!("  Found {} repos", repos.len());
            summary.repos += repos.len();

            for repo in &repos {
                let commits = match self.source.recent_commits(repo).await {
                    Ok(commits) => commits,
                    Err(e) => {
                        log::debug!("Fetching commits for {repo} failed: {e}");
                        continue;
                    }
                };

                for remote in commits {
                    if remote.sha.is_empty() || db::commit_exists(conn, &remote.sha)? {
                        continue;
                    }
                    if self.archive(conn, repo, remote).await? {
                        summary.archived += 1;
                    } else {
                        summary.blocked += 1;
                    }
                }
            }
        }

        if summary.archived > 0 {
            self.publish_feed(conn)?;
        }
        log::info!(
            "Poll complete: {} new commits archived, {} blocked",
            summary.archived,
            summary.blocked
        );
        Ok(summary)
    }

    /// Gate, pin, upload and store one commit. Returns false when the gate blocked it.
    async fn archive(&self, conn: &Connection, repo: &str, remote: RemoteCommit) -> Result<bool> {
        let mut commit = CommitRecord {
            sha: remote.sha,
            repo: repo.to_string(),
            message: remote.message.chars().take(MAX_MESSAGE_CHARS).collect(),
            author: remote.author,
            timestamp: remote.timestamp,
            url: remote.url,
            tree_sha: remote.tree_sha,
            ..CommitRecord::default()
        };

        let decision = self.scanner.should_archive(&commit, self.options.check_secrets);
        if !decision.allows() {
            log::warn!(
                "  Skipping commit {} from {repo}: {}",
                short_sha(&commit.sha),
                decision.reason()
            );
            return Ok(false);
        }

        commit.ipfs_cid = Some(self.pinner.pin(&serde_json::to_value(&commit)?).await?);
        if let Some(arweave) = &self.arweave {
            commit.arweave_tx = arweave.upload(&serde_json::to_value(&commit)?).await;
        }

        db::store_commit(conn, &commit)?;
        log::info!(
            "  New commit: {repo} {} - {}",
            short_sha(&commit.sha),
            commit.message.chars().take(50).collect::<String>()
        );
        Ok(true)
    }
}

fn short_sha(sha: &str) -> &str {
    sha.get(..8).unwrap_or(sha)
}

/// Publish once, then poll every `interval` until `shutdown` flips.
pub async fn run_relay_daemon(
    relay: &Relay,
    conn: &Connection,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    log::info!("Starting GitHub Archive Relay");
    log::info!("  Orgs: {}", relay.watched_orgs()?.join(", "));
    log::info!("  Interval: {}s", interval.as_secs());
    log::info!(
        "  Secret detection: {}",
        if relay.options.check_secrets { "enabled" } else { "disabled" }
    );

    relay.publish_feed(conn)?;

    loop {
        if let Err(e) = relay.poll_once(conn).await {
            log::error!("Poll error: {e}");
        }

        if wait_or_shutdown(&mut shutdown, interval).await {
            break;
        }
    }

    log::info!("Relay stopped");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_sha_handles_short_input() {
        assert_eq!(short_sha("0123456789abcdef"), "01234567");
        assert_eq!(short_sha("abc"), "abc");
    }
}
