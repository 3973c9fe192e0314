use crate::analysis::spam::ScoreIndex;
use crate::error::{RadarError, Result as RadarResult};
use crate::models::commit::{CommitRecord, RelayStats};
use crate::models::event::EventRecord;
use crate::models::repo::RepoRecord;
use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use std::path::Path;

const DB_SCHEMA_VERSION: i64 = 3;

const REPO_COLUMNS: &str = "full_name, owner, name, description, created_at, pushed_at, velocity_score, \
     commits_7d, forks_7d, contributors_7d, issues_7d, prs_7d, stars, watchers, \
     ipfs_cid, fed_to_gar, last_seen, last_scored";

/// Typed filters for `count_where`.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Repos of `owner` (case-insensitive) scoring strictly above `min_score`.
    OwnerAbove { owner: String, min_score: f64 },
    /// Repos with `|velocity_score - score| < tolerance`, optionally skipping one key.
    ScoreWithin {
        score: f64,
        tolerance: f64,
        exclude: Option<String>,
    },
    /// Single-contributor repos with more than `min_commits` recent commits.
    SingleDevBurst { min_commits: u64 },
}

pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;",
    )?;

    let mut version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version < 1 {
        apply_migration_1(conn)?;
        version = 1;
        conn.pragma_update(None, "user_version", version)?;
    }

    if version < 2 {
        apply_migration_2(conn)?;
        version = 2;
        conn.pragma_update(None, "user_version", version)?;
    }

    if version < 3 {
        apply_migration_3(conn)?;
        version = 3;
        conn.pragma_update(None, "user_version", version)?;
    }

    if version > DB_SCHEMA_VERSION {
        log::debug!("Database schema version {version} is newer than {DB_SCHEMA_VERSION}");
    }

    Ok(())
}

fn apply_migration_1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS repos (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            full_name TEXT UNIQUE NOT NULL,
            owner TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            created_at TEXT,
            velocity_score REAL NOT NULL DEFAULT 0,
            commits_7d INTEGER NOT NULL DEFAULT 0,
            forks_7d INTEGER NOT NULL DEFAULT 0,
            contributors_7d INTEGER NOT NULL DEFAULT 0,
            issues_7d INTEGER NOT NULL DEFAULT 0,
            prs_7d INTEGER NOT NULL DEFAULT 0,
            stars INTEGER NOT NULL DEFAULT 0,
            watchers INTEGER NOT NULL DEFAULT 0,
            ipfs_cid TEXT,
            last_seen TEXT,
            last_scored TEXT,
            fed_to_gar INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            event_type TEXT NOT NULL,
            repo_name TEXT NOT NULL,
            actor TEXT,
            created_at TEXT,
            processed INTEGER NOT NULL DEFAULT 0
        );
        ",
    )
}

fn apply_migration_2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS commits (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sha TEXT UNIQUE NOT NULL,
            repo TEXT NOT NULL,
            message TEXT,
            author TEXT,
            timestamp TEXT,
            url TEXT,
            tree_sha TEXT,
            ipfs_cid TEXT,
            arweave_tx TEXT,
            created_at TEXT NOT NULL
        );
        ",
    )
}

fn apply_migration_3(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "repos", "pushed_at TEXT")?;
    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_repo_name ON repos(full_name);
        CREATE INDEX IF NOT EXISTS idx_velocity ON repos(velocity_score DESC);
        CREATE INDEX IF NOT EXISTS idx_repo_owner ON repos(owner COLLATE NOCASE);
        CREATE INDEX IF NOT EXISTS idx_event_id ON events(event_id);
        CREATE INDEX IF NOT EXISTS idx_sha ON commits(sha);
        ",
    )
}

fn add_column_if_missing(conn: &Connection, table: &str, column_def: &str) -> Result<()> {
    let column_name = column_def
        .split_whitespace()
        .next()
        .unwrap_or(column_def)
        .to_string();

    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let exists = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .filter_map(|res| res.ok())
        .any(|name| name == column_name);

    if !exists {
        conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {column_def}"), [])?;
    }

    Ok(())
}

/// Open (or create) the state database and bring its schema up to date.
///
/// A path whose parent directory does not exist is a configuration error.
pub fn open_database(db_path: &Path) -> RadarResult<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            return Err(RadarError::config(format!(
                "database directory does not exist: {}",
                parent.display()
            )));
        }
    }

    let conn = Connection::open(db_path).map_err(|e| {
        RadarError::config(format!("cannot open database {}: {e}", db_path.display()))
    })?;
    initialize_schema(&conn)?;
    Ok(conn)
}

pub fn repo_exists(conn: &Connection, full_name: &str) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM repos WHERE full_name = ?1)",
        params![full_name],
        |row| row.get(0),
    )
}

/// Insert or fully replace the row for `repo.full_name`.
///
/// Every column is overwritten except `created_at`, which keeps the first
/// non-null value. The row id (and so tie order in `top_repos`) is stable.
pub fn upsert_repo(conn: &Connection, repo: &RepoRecord) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();

    conn.execute(
        "
        INSERT INTO repos (
            full_name, owner, name, description, created_at, pushed_at, velocity_score,
            commits_7d, forks_7d, contributors_7d, issues_7d, prs_7d, stars, watchers,
            ipfs_cid, fed_to_gar, last_seen, last_scored
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
        ON CONFLICT(full_name) DO UPDATE SET
            owner = excluded.owner,
            name = excluded.name,
            description = excluded.description,
            created_at = COALESCE(repos.created_at, excluded.created_at),
            pushed_at = excluded.pushed_at,
            velocity_score = excluded.velocity_score,
            commits_7d = excluded.commits_7d,
            forks_7d = excluded.forks_7d,
            contributors_7d = excluded.contributors_7d,
            issues_7d = excluded.issues_7d,
            prs_7d = excluded.prs_7d,
            stars = excluded.stars,
            watchers = excluded.watchers,
            ipfs_cid = excluded.ipfs_cid,
            fed_to_gar = excluded.fed_to_gar,
            last_seen = excluded.last_seen,
            last_scored = excluded.last_scored
        ",
        params![
            repo.full_name,
            repo.owner,
            repo.name,
            repo.description,
            repo.created_at,
            repo.pushed_at,
            repo.velocity_score,
            repo.commits_7d as i64,
            repo.forks_7d as i64,
            repo.contributors_7d as i64,
            repo.issues_7d as i64,
            repo.prs_7d as i64,
            repo.stars as i64,
            repo.watchers as i64,
            repo.ipfs_cid,
            repo.fed_to_gar as i32,
            now,
            now,
        ],
    )?;

    Ok(())
}

pub fn load_repo(conn: &Connection, full_name: &str) -> Result<Option<RepoRecord>> {
    conn.query_row(
        &format!("SELECT {REPO_COLUMNS} FROM repos WHERE full_name = ?1"),
        params![full_name],
        repo_from_row,
    )
    .optional()
}

/// Highest velocity first; equal scores keep first-insertion order.
pub fn top_repos(conn: &Connection, limit: usize) -> Result<Vec<RepoRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {REPO_COLUMNS} FROM repos ORDER BY velocity_score DESC, id ASC LIMIT ?1"
    ))?;
    let repos = stmt
        .query_map(params![limit as i64], repo_from_row)?
        .collect::<Result<Vec<_>>>()?;
    Ok(repos)
}

pub fn all_repos(conn: &Connection) -> Result<Vec<RepoRecord>> {
    let mut stmt = conn.prepare(&format!("SELECT {REPO_COLUMNS} FROM repos ORDER BY id ASC"))?;
    let repos = stmt
        .query_map([], repo_from_row)?
        .collect::<Result<Vec<_>>>()?;
    Ok(repos)
}

pub fn count_where(conn: &Connection, predicate: &Predicate) -> Result<u64> {
    let count: i64 = match predicate {
        Predicate::OwnerAbove { owner, min_score } => conn.query_row(
            "SELECT COUNT(*) FROM repos WHERE owner = ?1 COLLATE NOCASE AND velocity_score > ?2",
            params![owner, min_score],
            |row| row.get(0),
        )?,
        Predicate::ScoreWithin {
            score,
            tolerance,
            exclude,
        } => conn.query_row(
            "SELECT COUNT(*) FROM repos
             WHERE ABS(velocity_score - ?1) < ?2
               AND (?3 IS NULL OR full_name != ?3)",
            params![score, tolerance, exclude],
            |row| row.get(0),
        )?,
        Predicate::SingleDevBurst { min_commits } => conn.query_row(
            "SELECT COUNT(*) FROM repos WHERE commits_7d > ?1 AND contributors_7d = 1",
            params![*min_commits as i64],
            |row| row.get(0),
        )?,
    };
    Ok(count.max(0) as u64)
}

impl ScoreIndex for Connection {
    fn count_where(&self, predicate: &Predicate) -> RadarResult<u64> {
        Ok(count_where(self, predicate)?)
    }
}

pub fn set_ipfs_cid(conn: &Connection, full_name: &str, cid: &str) -> Result<()> {
    conn.execute(
        "UPDATE repos SET ipfs_cid = ?2 WHERE full_name = ?1",
        params![full_name, cid],
    )?;
    Ok(())
}

pub fn mark_fed_to_gar(conn: &Connection, full_name: &str) -> Result<()> {
    conn.execute(
        "UPDATE repos SET fed_to_gar = 1 WHERE full_name = ?1",
        params![full_name],
    )?;
    Ok(())
}

fn repo_from_row(row: &Row<'_>) -> Result<RepoRecord> {
    Ok(RepoRecord {
        full_name: row.get(0)?,
        owner: row.get(1)?,
        name: row.get(2)?,
        description: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        created_at: row.get(4)?,
        pushed_at: row.get(5)?,
        velocity_score: row.get(6)?,
        commits_7d: row.get::<_, i64>(7)?.max(0) as u64,
        forks_7d: row.get::<_, i64>(8)?.max(0) as u64,
        contributors_7d: row.get::<_, i64>(9)?.max(0) as u64,
        issues_7d: row.get::<_, i64>(10)?.max(0) as u64,
        prs_7d: row.get::<_, i64>(11)?.max(0) as u64,
        stars: row.get::<_, i64>(12)?.max(0) as u64,
        watchers: row.get::<_, i64>(13)?.max(0) as u64,
        ipfs_cid: row.get(14)?,
        fed_to_gar: row.get::<_, i32>(15)? != 0,
        last_seen: row.get(16)?,
        last_scored: row.get(17)?,
    })
}

/// Append an event unless its id is already logged. Returns whether a row was written.
pub fn record_event(conn: &Connection, event: &EventRecord) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO events (event_id, event_type, repo_name, actor, created_at, processed)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            event.event_id,
            event.event_type,
            event.repo_name,
            event.actor,
            event.created_at,
            event.processed as i32,
        ],
    )?;
    Ok(inserted > 0)
}

pub fn unprocessed_events(conn: &Connection) -> Result<Vec<EventRecord>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, event_type, repo_name, actor, created_at, processed
         FROM events WHERE processed = 0 ORDER BY id ASC",
    )?;
    let events = stmt
        .query_map([], |row| {
            Ok(EventRecord {
                event_id: row.get(0)?,
                event_type: row.get(1)?,
                repo_name: row.get(2)?,
                actor: row.get(3)?,
                created_at: row.get(4)?,
                processed: row.get::<_, i32>(5)? != 0,
            })
        })?
        .collect::<Result<Vec<_>>>()?;
    Ok(events)
}

pub fn mark_events_processed(conn: &Connection, event_ids: &[String]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for id in event_ids {
        tx.execute("UPDATE events SET processed = 1 WHERE event_id = ?1", params![id])?;
    }
    tx.commit()
}

pub fn commit_exists(conn: &Connection, sha: &str) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM commits WHERE sha = ?1)",
        params![sha],
        |row| row.get(0),
    )
}

/// Insert-or-ignore by SHA. Returns whether a row was written.
pub fn store_commit(conn: &Connection, commit: &CommitRecord) -> Result<bool> {
    let archived_at = commit
        .archived_at
        .clone()
        .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO commits
            (sha, repo, message, author, timestamp, url, tree_sha, ipfs_cid, arweave_tx, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            commit.sha,
            commit.repo,
            commit.message,
            commit.author,
            commit.timestamp,
            commit.url,
            commit.tree_sha,
            commit.ipfs_cid,
            commit.arweave_tx,
            archived_at,
        ],
    )?;
    Ok(inserted > 0)
}

/// Most recently archived first.
pub fn recent_commits(conn: &Connection, limit: usize) -> Result<Vec<CommitRecord>> {
    let mut stmt = conn.prepare(
        "SELECT sha, repo, message, author, timestamp, url, tree_sha, ipfs_cid, arweave_tx, created_at
         FROM commits ORDER BY id DESC LIMIT ?1",
    )?;
    let commits = stmt
        .query_map(params![limit as i64], |row| {
            Ok(CommitRecord {
                sha: row.get(0)?,
                repo: row.get(1)?,
                message: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                author: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                timestamp: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                url: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                tree_sha: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                ipfs_cid: row.get(7)?,
                arweave_tx: row.get(8)?,
                archived_at: row.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>>>()?;
    Ok(commits)
}

pub fn relay_stats(conn: &Connection) -> Result<RelayStats> {
    let count = |sql: &str, cutoff: Option<String>| -> Result<usize> {
        let n: i64 = match cutoff {
            Some(cutoff) => conn.query_row(sql, params![cutoff], |r| r.get(0))?,
            None => conn.query_row(sql, [], |r| r.get(0))?,
        };
        Ok(n.max(0) as usize)
    };

    let now = chrono::Utc::now();
    let hour_ago = (now - chrono::Duration::hours(1)).to_rfc3339();
    let day_ago = (now - chrono::Duration::hours(24)).to_rfc3339();

    let mut stmt = conn.prepare(
        "SELECT repo, COUNT(*) AS n FROM commits GROUP BY repo ORDER BY n DESC, repo ASC LIMIT 10",
    )?;
    let top_repos = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?.max(0) as usize)))?
        .collect::<Result<Vec<_>>>()?;

    Ok(RelayStats {
        total: count("SELECT COUNT(*) FROM commits", None)?,
        last_hour: count("SELECT COUNT(*) FROM commits WHERE created_at >= ?1", Some(hour_ago))?,
        last_24h: count("SELECT COUNT(*) FROM commits WHERE created_at >= ?1", Some(day_ago))?,
        ipfs_archived: count("SELECT COUNT(*) FROM commits WHERE ipfs_cid IS NOT NULL", None)?,
        arweave_archived: count("SELECT COUNT(*) FROM commits WHERE arweave_tx IS NOT NULL", None)?,
        top_repos,
    })
}
