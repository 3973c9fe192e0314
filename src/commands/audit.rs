//! Read-only inspection commands over the state stores and feed files.

use crate::commands::db::{self, Predicate};
use crate::error::{RadarError, Result};
use crate::models::commit::RelayStats;
use crate::models::repo::short_name;
use rusqlite::Connection;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// Names shared by many unrelated projects; a high score on one is worth a second look.
const COMMON_NAMES: &[&str] = &["lynx", "atlas", "phoenix", "core", "framework", "engine"];
const SINGLE_DEV_COMMIT_FLOOR: u64 = 50;

pub fn render_stats(conn: &Connection, limit: usize) -> Result<String> {
    let repos = db::top_repos(conn, limit)?;
    let rule = "=".repeat(80);
    let mut out = String::new();

    let _ = writeln!(out, "\n{rule}");
    let _ = writeln!(out, "Repo Radar - Top Repos by Velocity");
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "\n{:<6} {:<8} {:<8} {:<7} Repo", "Rank", "Score", "Commits", "Forks");
    let _ = writeln!(out, "{}", "-".repeat(80));
    for (i, r) in repos.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:<6} {:<8.1} {:<8} {:<7} {}",
            i + 1,
            r.velocity_score,
            r.commits_7d,
            r.forks_7d,
            r.full_name
        );
    }
    let _ = writeln!(out, "{rule}");
    Ok(out)
}

pub fn render_verify_db(conn: &Connection) -> Result<String> {
    let total: i64 = conn.query_row("SELECT COUNT(*) FROM repos", [], |row| row.get(0))?;
    let top = db::top_repos(conn, 10)?;
    let mut out = String::new();

    let _ = writeln!(out, "Database contains {total} repos\n");
    let _ = writeln!(out, "Top 10 by velocity:");
    for (i, r) in top.iter().enumerate() {
        let _ = writeln!(out, "{:>2}. {} (score {:.1})", i + 1, r.full_name, r.velocity_score);
        let _ = writeln!(out, "    owner: {}  name: {}", r.owner, r.name);
        let _ = writeln!(
            out,
            "    created: {}  pushed: {}",
            r.created_at.as_deref().unwrap_or("unknown"),
            r.pushed_at.as_deref().unwrap_or("unknown")
        );
        let _ = writeln!(
            out,
            "    commits: {}  contributors: {}  stars: {}",
            r.commits_7d, r.contributors_7d, r.stars
        );
        if !r.description.is_empty() {
            let snippet: String = r.description.chars().take(100).collect();
            let _ = writeln!(out, "    {snippet}");
        }
        if COMMON_NAMES.contains(&short_name(&r.full_name).to_lowercase().as_str()) {
            let _ = writeln!(
                out,
                "    WARNING: '{}' is a common name; confirm this is the intended repo",
                r.name
            );
        }
    }

    let bursts = db::count_where(
        conn,
        &Predicate::SingleDevBurst {
            min_commits: SINGLE_DEV_COMMIT_FLOOR,
        },
    )?;
    let _ = writeln!(
        out,
        "\nSingle-developer bursts (>{SINGLE_DEV_COMMIT_FLOOR} commits, 1 contributor): {bursts}"
    );
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Rss,
    Atom,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedCheck {
    pub path: PathBuf,
    pub size: u64,
    pub kind: FeedKind,
    pub entries: usize,
}

pub fn verify_feeds(dir: &Path) -> Result<Vec<FeedCheck>> {
    let base = glob::Pattern::escape(&dir.to_string_lossy());
    let mut checks = Vec::new();

    for ext in ["xml", "atom"] {
        let pattern = format!("{base}/*.{ext}");
        let paths = glob::glob(&pattern)
            .map_err(|e| RadarError::config(format!("bad feed pattern {pattern}: {e}")))?;

        for entry in paths {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    log::warn!("Unreadable feed path: {e}");
                    continue;
                }
            };
            let bytes = fs::read(&path)?;
            let size = bytes.len() as u64;
            let Ok(body) = String::from_utf8(bytes) else {
                log::warn!("{} is not UTF-8 text", path.display());
                checks.push(FeedCheck {
                    path,
                    size,
                    kind: FeedKind::Unknown,
                    entries: 0,
                });
                continue;
            };
            let kind = if body.contains("<rss") {
                FeedKind::Rss
            } else if body.contains("<feed") {
                FeedKind::Atom
            } else {
                FeedKind::Unknown
            };
            let entries = match kind {
                FeedKind::Rss => body.matches("<item>").count(),
                FeedKind::Atom => body.matches("<entry>").count(),
                FeedKind::Unknown => 0,
            };
            checks.push(FeedCheck {
                size,
                path,
                kind,
                entries,
            });
        }
    }

    Ok(checks)
}

pub fn render_feed_checks(checks: &[FeedCheck]) -> String {
    let mut out = String::new();
    if checks.is_empty() {
        let _ = writeln!(out, "No feed files found");
        return out;
    }
    for check in checks {
        let label = match check.kind {
            FeedKind::Rss => "RSS",
            FeedKind::Atom => "Atom",
            FeedKind::Unknown => "NOT A FEED",
        };
        let _ = writeln!(
            out,
            "{:<40} {:>10} bytes  {:<10} {} entries",
            check.path.display(),
            check.size,
            label,
            check.entries
        );
    }
    out
}

pub fn render_relay_stats(stats: &RelayStats) -> String {
    let pct = |n: usize| {
        if stats.total == 0 {
            0.0
        } else {
            100.0 * n as f64 / stats.total as f64
        }
    };

    let rule = "=".repeat(60);
    let mut out = String::new();
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "GitHub Archive Relay - Statistics");
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "Total commits archived: {}", stats.total);
    let _ = writeln!(out, "Last hour:              {}", stats.last_hour);
    let _ = writeln!(out, "Last 24 hours:          {}", stats.last_24h);
    let _ = writeln!(
        out,
        "IPFS archived:          {} ({:.1}%)",
        stats.ipfs_archived,
        pct(stats.ipfs_archived)
    );
    let _ = writeln!(
        out,
        "Arweave archived:       {} ({:.1}%)",
        stats.arweave_archived,
        pct(stats.arweave_archived)
    );
    if !stats.top_repos.is_empty() {
        let _ = writeln!(out, "\nTop repos:");
        for (repo, count) in &stats.top_repos {
            let _ = writeln!(out, "  {count:>5}  {repo}");
        }
    }
    let _ = writeln!(out, "{rule}");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::feed::{radar_meta, write_feeds};
    use crate::models::repo::RepoRecord;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::initialize_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn stats_lists_ranked_repos() {
        let conn = memory_db();
        let mut r = RepoRecord::new("a/fast");
        r.velocity_score = 88.0;
        db::upsert_repo(&conn, &r).unwrap();
        db::upsert_repo(&conn, &RepoRecord::new("a/slow")).unwrap();

        let out = render_stats(&conn, 20).unwrap();
        let fast = out.find("a/fast").unwrap();
        let slow = out.find("a/slow").unwrap();
        assert!(fast < slow);
        assert!(out.contains("88.0"));
    }

    #[test]
    fn verify_db_flags_common_names_and_bursts() {
        let conn = memory_db();
        let mut atlas = RepoRecord::new("someone/Atlas");
        atlas.commits_7d = 80;
        atlas.contributors_7d = 1;
        db::upsert_repo(&conn, &atlas).unwrap();

        let out = render_verify_db(&conn).unwrap();
        assert!(out.contains("Database contains 1 repos"));
        assert!(out.contains("WARNING: 'Atlas' is a common name"));
        assert!(out.contains("1 contributor): 1"));
    }

    #[test]
    fn verify_feeds_counts_entries_and_flags_strangers() {
        let dir = tempfile::tempdir().unwrap();
        let rss = dir.path().join("radar_feed.xml");
        write_feeds(&radar_meta(&[]), &[], &rss, chrono::Utc::now()).unwrap();
        fs::write(dir.path().join("notes.xml"), "<notes/>").unwrap();

        let mut checks = verify_feeds(dir.path()).unwrap();
        checks.sort_by(|a, b| a.path.cmp(&b.path));
        let kinds: Vec<FeedKind> = checks.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![FeedKind::Unknown, FeedKind::Atom, FeedKind::Rss]);
        assert!(render_feed_checks(&checks).contains("NOT A FEED"));
    }

    #[test]
    fn binary_file_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let rss = dir.path().join("radar_feed.xml");
        write_feeds(&radar_meta(&[]), &[], &rss, chrono::Utc::now()).unwrap();
        fs::write(dir.path().join("corrupt.xml"), [0x3c, 0xff, 0xfe, 0x00, 0x80]).unwrap();

        let checks = verify_feeds(dir.path()).unwrap();
        assert_eq!(checks.len(), 3);
        let corrupt = checks
            .iter()
            .find(|c| c.path.ends_with("corrupt.xml"))
            .unwrap();
        assert_eq!(corrupt.kind, FeedKind::Unknown);
        assert_eq!(corrupt.size, 5);
        assert_eq!(corrupt.entries, 0);
        assert!(checks.iter().any(|c| c.kind == FeedKind::Rss));
    }

    #[test]
    fn relay_stats_render_percentages() {
        let stats = RelayStats {
            total: 4,
            last_hour: 1,
            last_24h: 4,
            ipfs_archived: 4,
            arweave_archived: 1,
            top_repos: vec![("a/b".into(), 3)],
        };
        let out = render_relay_stats(&stats);
        assert!(out.contains("IPFS archived:          4 (100.0%)"));
        assert!(out.contains("Arweave archived:       1 (25.0%)"));
        assert!(out.contains("a/b"));
    }
}
