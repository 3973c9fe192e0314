//! RSS 2.0 and Atom 1.0 output for the radar and the relay.

use crate::commands::db;
use crate::error::Result;
use crate::models::commit::CommitRecord;
use crate::models::repo::RepoRecord;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

const COMMIT_TITLE_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq)]
pub struct FeedMeta {
    pub id: String,
    pub title: String,
    pub description: String,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub id: String,
    pub title: String,
    pub link: String,
    /// HTML fragment; escaped on output.
    pub content: String,
    pub author: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

pub fn radar_meta(topics: &[String]) -> FeedMeta {
    FeedMeta {
        id: format!("urn:radar:{}", digest_hex(&topics.join(","))),
        title: "Repo Radar - Velocity Discovery".to_string(),
        description: "Discover repos by activity velocity, not star count".to_string(),
        link: "https://github.com".to_string(),
    }
}

pub fn relay_meta(orgs: &[String]) -> FeedMeta {
    FeedMeta {
        id: format!("urn:gar:{}", digest_hex(&orgs.join(","))),
        title: format!("GitHub Archive Relay - {}", orgs.join(", ")),
        description: "Decentralized archive of GitHub commits".to_string(),
        link: "https://github.com".to_string(),
    }
}

fn digest_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    format!("{digest:x}")
}

fn parse_ts(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|r| DateTime::parse_from_rfc3339(r).ok())
        .map(|ts| ts.with_timezone(&Utc))
}

pub fn repo_item(repo: &RepoRecord, built_at: DateTime<Utc>) -> FeedItem {
    let mut content = format!(
        "<p><strong>Velocity Score:</strong> {:.1}</p>\
         <p><strong>Activity (7 days):</strong></p>\
         <ul><li>{} commits</li><li>{} forks</li><li>{} contributors</li><li>{} stars (total)</li></ul>",
        repo.velocity_score, repo.commits_7d, repo.forks_7d, repo.contributors_7d, repo.stars
    );
    if !repo.description.is_empty() {
        let _ = write!(content, "<p>{}</p>", xml_escape(&repo.description));
    }
    if let Some(cid) = &repo.ipfs_cid {
        let _ = write!(
            content,
            "<p><strong>IPFS:</strong> <a href='https://ipfs.io/ipfs/{cid}'>{cid}</a></p>"
        );
    }

    let published = parse_ts(repo.created_at.as_deref());
    FeedItem {
        id: format!("urn:github:repo:{}", repo.full_name),
        title: format!("{} (velocity: {:.1})", repo.full_name, repo.velocity_score),
        link: format!("https://github.com/{}", repo.full_name),
        content,
        author: None,
        updated: published.map(|_| built_at),
        published,
    }
}

pub fn commit_item(commit: &CommitRecord) -> FeedItem {
    let title = if commit.message.chars().count() > COMMIT_TITLE_CHARS {
        let head: String = commit.message.chars().take(COMMIT_TITLE_CHARS).collect();
        format!("[{}] {head}...", commit.repo)
    } else {
        format!("[{}] {}", commit.repo, commit.message)
    };

    let mut content = format!(
        "<p><strong>Commit:</strong> {}</p><p><strong>Author:</strong> {}</p><p><strong>Message:</strong> {}</p>",
        commit.sha,
        xml_escape(&commit.author),
        xml_escape(&commit.message)
    );
    if let Some(cid) = &commit.ipfs_cid {
        let _ = write!(
            content,
            "<p><strong>IPFS:</strong> <a href='https://ipfs.io/ipfs/{cid}'>{cid}</a></p>"
        );
    }
    if let Some(tx) = &commit.arweave_tx {
        let _ = write!(
            content,
            "<p><strong>Arweave:</strong> <a href='https://arweave.net/{tx}'>{tx}</a></p>"
        );
    }

    let ts = parse_ts(Some(commit.timestamp.as_str()));
    FeedItem {
        id: format!("urn:github:commit:{}", commit.sha),
        title,
        link: format!("https://github.com/{}/commit/{}", commit.repo, commit.sha),
        content,
        author: Some(commit.author.clone()).filter(|a| !a.is_empty()),
        published: ts,
        updated: ts,
    }
}

pub fn render_rss(meta: &FeedMeta, items: &[FeedItem], built_at: DateTime<Utc>) -> String {
    let mut out = String::new();
    out.push_str("<?xml version='1.0' encoding='UTF-8'?>\n");
    out.push_str("<rss xmlns:atom=\"http://www.w3.org/2005/Atom\" version=\"2.0\">\n<channel>\n");
    let _ = writeln!(out, "<title>{}</title>", xml_escape(&meta.title));
    let _ = writeln!(out, "<link>{}</link>", xml_escape(&meta.link));
    let _ = writeln!(out, "<description>{}</description>", xml_escape(&meta.description));
    out.push_str("<language>en</language>\n");
    let _ = writeln!(out, "<lastBuildDate>{}</lastBuildDate>", built_at.to_rfc2822());

    for item in items {
        out.push_str("<item>\n");
        let _ = writeln!(out, "<title>{}</title>", xml_escape(&item.title));
        let _ = writeln!(out, "<link>{}</link>", xml_escape(&item.link));
        let _ = writeln!(out, "<description>{}</description>", xml_escape(&item.content));
        if let Some(author) = &item.author {
            let _ = writeln!(out, "<author>{}</author>", xml_escape(author));
        }
        let _ = writeln!(out, "<guid isPermaLink=\"false\">{}</guid>", xml_escape(&item.id));
        if let Some(published) = item.published {
            let _ = writeln!(out, "<pubDate>{}</pubDate>", published.to_rfc2822());
        }
        out.push_str("</item>\n");
    }

    out.push_str("</channel>\n</rss>\n");
    out
}

pub fn render_atom(meta: &FeedMeta, items: &[FeedItem], built_at: DateTime<Utc>) -> String {
    let mut out = String::new();
    out.push_str("<?xml version='1.0' encoding='UTF-8'?>\n");
    out.push_str("<feed xmlns=\"http://www.w3.org/2005/Atom\" xml:lang=\"en\">\n");
    let _ = writeln!(out, "<id>{}</id>", xml_escape(&meta.id));
    let _ = writeln!(out, "<title>{}</title>", xml_escape(&meta.title));
    let _ = writeln!(out, "<updated>{}</updated>", built_at.to_rfc3339());
    let _ = writeln!(out, "<link href=\"{}\" rel=\"alternate\"/>", xml_escape(&meta.link));
    let _ = writeln!(out, "<subtitle>{}</subtitle>", xml_escape(&meta.description));

    for item in items {
        out.push_str("<entry>\n");
        let _ = writeln!(out, "<id>{}</id>", xml_escape(&item.id));
        let _ = writeln!(out, "<title>{}</title>", xml_escape(&item.title));
        let updated = item.updated.unwrap_or(built_at);
        let _ = writeln!(out, "<updated>{}</updated>", updated.to_rfc3339());
        if let Some(author) = &item.author {
            let _ = writeln!(out, "<author><name>{}</name></author>", xml_escape(author));
        }
        let _ = writeln!(out, "<link href=\"{}\" rel=\"alternate\"/>", xml_escape(&item.link));
        let _ = writeln!(out, "<summary type=\"html\">{}</summary>", xml_escape(&item.content));
        if let Some(published) = item.published {
            let _ = writeln!(out, "<published>{}</published>", published.to_rfc3339());
        }
        out.push_str("</entry>\n");
    }

    out.push_str("</feed>\n");
    out
}

/// `feed.xml` pairs with `feed.atom`; any other name gets `.atom` appended.
pub fn atom_path(rss_path: &Path) -> PathBuf {
    match rss_path.extension().and_then(|e| e.to_str()) {
        Some("xml") => rss_path.with_extension("atom"),
        _ => {
            let mut raw = rss_path.as_os_str().to_os_string();
            raw.push(".atom");
            PathBuf::from(raw)
        }
    }
}

pub fn write_feeds(
    meta: &FeedMeta,
    items: &[FeedItem],
    rss_path: &Path,
    built_at: DateTime<Utc>,
) -> Result<PathBuf> {
    let atom = atom_path(rss_path);
    fs::write(rss_path, render_rss(meta, items, built_at))?;
    fs::write(&atom, render_atom(meta, items, built_at))?;
    log::info!("Generated RSS: {} and Atom: {}", rss_path.display(), atom.display());
    Ok(atom)
}

pub fn publish_repo_feed(
    conn: &Connection,
    rss_path: &Path,
    topics: &[String],
    limit: usize,
) -> Result<PathBuf> {
    let built_at = Utc::now();
    let items: Vec<FeedItem> = db::top_repos(conn, limit)?
        .iter()
        .map(|repo| repo_item(repo, built_at))
        .collect();
    write_feeds(&radar_meta(topics), &items, rss_path, built_at)
}

pub fn publish_commit_feed(
    conn: &Connection,
    rss_path: &Path,
    orgs: &[String],
    limit: usize,
) -> Result<PathBuf> {
    let items: Vec<FeedItem> = db::recent_commits(conn, limit)?
        .iter()
        .map(commit_item)
        .collect();
    write_feeds(&relay_meta(orgs), &items, rss_path, Utc::now())
}

pub fn xml_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            // Not representable in XML 1.0.
            c if (c as u32) < 0x20 && !matches!(c, '\t' | '\n' | '\r') => {}
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn built_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn repo(name: &str, score: f64) -> RepoRecord {
        let mut r = RepoRecord::new(name);
        r.velocity_score = score;
        r.commits_7d = 10;
        r
    }

    #[test]
    fn rendering_is_deterministic() {
        let items = vec![repo_item(&repo("a/b", 12.34), built_at())];
        let meta = radar_meta(&["rust".to_string()]);
        assert_eq!(render_rss(&meta, &items, built_at()), render_rss(&meta, &items, built_at()));
        assert_eq!(render_atom(&meta, &items, built_at()), render_atom(&meta, &items, built_at()));
    }

    #[test]
    fn items_keep_input_order() {
        let items: Vec<FeedItem> = [repo("a/first", 90.0), repo("a/second", 10.0)]
            .iter()
            .map(|r| repo_item(r, built_at()))
            .collect();
        let rss = render_rss(&radar_meta(&[]), &items, built_at());
        let first = rss.find("a/first").unwrap();
        let second = rss.find("a/second").unwrap();
        assert!(first < second);
        assert!(rss.contains("a/first (velocity: 90.0)"));
    }

    #[test]
    fn escapes_markup_in_text() {
        let mut r = repo("a/b", 1.0);
        r.description = "<script>alert('x') & more</script>".into();
        let rss = render_rss(&radar_meta(&[]), &[repo_item(&r, built_at())], built_at());
        assert!(!rss.contains("<script>"));
        assert!(rss.contains("&amp;lt;script&amp;gt;"));
        assert_eq!(xml_escape("a\u{0}b<"), "ab&lt;");
    }

    #[test]
    fn long_commit_messages_are_truncated_in_titles() {
        let commit = CommitRecord {
            sha: "abc".into(),
            repo: "a/b".into(),
            message: "m".repeat(100),
            author: "Ada".into(),
            timestamp: "2025-01-01T00:00:00Z".into(),
            arweave_tx: Some("tx1".into()),
            ..CommitRecord::default()
        };
        let item = commit_item(&commit);
        assert_eq!(item.title, format!("[a/b] {}...", "m".repeat(80)));
        assert!(item.content.contains("https://arweave.net/tx1"));
        assert_eq!(item.published, Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn atom_path_swaps_xml_extension() {
        assert_eq!(
            atom_path(Path::new("out/radar_feed.xml")),
            PathBuf::from("out/radar_feed.atom")
        );
        assert_eq!(atom_path(Path::new("feed.rss")), PathBuf::from("feed.rss.atom"));
    }

    #[test]
    fn feed_ids_depend_on_watch_targets() {
        let a = radar_meta(&["rust".to_string()]);
        let b = radar_meta(&["python".to_string()]);
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("urn:radar:"));
    }

    #[test]
    fn publishes_both_files_from_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open_in_memory().unwrap();
        db::initialize_schema(&conn).unwrap();
        db::upsert_repo(&conn, &repo("a/b", 5.0)).unwrap();

        let rss = dir.path().join("radar_feed.xml");
        let atom = publish_repo_feed(&conn, &rss, &["rust".to_string()], 100).unwrap();

        let rss_body = fs::read_to_string(&rss).unwrap();
        let atom_body = fs::read_to_string(&atom).unwrap();
        assert_eq!(rss_body.matches("<item>").count(), 1);
        assert_eq!(atom_body.matches("<entry>").count(), 1);
    }
}
