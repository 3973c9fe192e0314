//! GitHub REST access behind the `GitHubSource` seam.

use crate::error::{FetchError, RadarError, Result};
use crate::models::event::EventRecord;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

pub const GITHUB_API: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("repo-radar/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PAGE_SIZE: usize = 100;
const COMMIT_PAGE_SIZE: usize = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Backoff before retry `n` (0-based) is `backoff_base^n` seconds.
    pub backoff_base: u64,
    /// Longer rate-limit resets fall back to plain backoff.
    pub max_reset_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: 2,
            max_reset_wait: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.backoff_base.saturating_pow(attempt))
    }
}

/// Repository metadata as returned by `GET /repos/{owner}/{repo}`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RepoDetails {
    pub full_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub pushed_at: Option<String>,
    #[serde(default, rename = "stargazers_count")]
    pub stars: u64,
    #[serde(default, rename = "subscribers_count")]
    pub watchers: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteCommit {
    pub sha: String,
    pub message: String,
    pub author: String,
    pub timestamp: String,
    pub url: String,
    pub tree_sha: String,
}

/// Everything the radar and the relay need from the activity source.
#[async_trait]
pub trait GitHubSource: Send + Sync {
    async fn repo_details(&self, full_name: &str) -> Result<RepoDetails, FetchError>;
    async fn commits_since(&self, full_name: &str, since: DateTime<Utc>) -> Result<u64, FetchError>;
    async fn forks_since(&self, full_name: &str, since: DateTime<Utc>) -> Result<u64, FetchError>;
    async fn issues_since(&self, full_name: &str, since: DateTime<Utc>) -> Result<u64, FetchError>;
    async fn prs_since(&self, full_name: &str, since: DateTime<Utc>) -> Result<u64, FetchError>;
    /// Lifetime contributor count.
    async fn contributor_count(&self, full_name: &str) -> Result<u64, FetchError>;
    /// Full names of repos tagged `topic` and pushed since `pushed_since`.
    async fn search_topic(
        &self,
        topic: &str,
        pushed_since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>, FetchError>;
    async fn org_repos(&self, org: &str) -> Result<Vec<String>, FetchError>;
    async fn org_events(&self, org: &str) -> Result<Vec<EventRecord>, FetchError>;
    async fn recent_commits(&self, full_name: &str) -> Result<Vec<RemoteCommit>, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusClass {
    Success,
    NotFound,
    Retry,
    Fail,
}

fn classify_status(status: StatusCode) -> StatusClass {
    match status.as_u16() {
        200..=299 => StatusClass::Success,
        404 | 410 | 451 => StatusClass::NotFound,
        403 | 429 | 500..=599 => StatusClass::Retry,
        _ => StatusClass::Fail,
    }
}

/// Seconds until `X-RateLimit-Reset` when the quota is exhausted.
fn rate_limit_wait(headers: &HeaderMap, now_epoch: i64) -> Option<Duration> {
    fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
        headers.get(name).and_then(|v| v.to_str().ok())
    }

    if header(headers, "x-ratelimit-remaining")? != "0" {
        return None;
    }
    let reset: i64 = header(headers, "x-ratelimit-reset")?.trim().parse().ok()?;
    let wait = (reset - now_epoch).max(0) as u64;
    Some(Duration::from_secs(wait + 1))
}

/// Page number of the `rel="last"` link, GitHub's way of exposing a total.
fn last_page(link: &str, pattern: &Regex) -> Option<u64> {
    pattern
        .captures(link)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn created_since(created_at: Option<&str>, since: DateTime<Utc>) -> bool {
    created_at
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .is_some_and(|ts| ts.with_timezone(&Utc) >= since)
}

#[derive(Debug, Deserialize)]
struct Created {
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct NamedRepo {
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    items: Vec<NamedRepo>,
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: Option<String>,
    repo: Option<WireEventRepo>,
    actor: Option<WireActor>,
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireEventRepo {
    name: String,
}

#[derive(Debug, Deserialize)]
struct WireActor {
    login: String,
}

#[derive(Debug, Deserialize)]
struct WireCommit {
    sha: String,
    #[serde(default)]
    html_url: String,
    commit: WireCommitBody,
}

#[derive(Debug, Deserialize)]
struct WireCommitBody {
    #[serde(default)]
    message: String,
    author: Option<WireSignature>,
    tree: Option<WireTree>,
}

#[derive(Debug, Deserialize)]
struct WireSignature {
    name: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireTree {
    sha: String,
}

impl From<WireCommit> for RemoteCommit {
    fn from(wire: WireCommit) -> Self {
        let (author, timestamp) = match wire.commit.author {
            Some(sig) => (
                sig.name.unwrap_or_else(|| "unknown".to_string()),
                sig.date.unwrap_or_default(),
            ),
            None => ("unknown".to_string(), String::new()),
        };
        Self {
            sha: wire.sha,
            message: wire.commit.message,
            author,
            timestamp,
            url: wire.html_url,
            tree_sha: wire.commit.tree.map(|t| t.sha).unwrap_or_default(),
        }
    }
}

pub struct GitHubClient {
    http: Client,
    base_url: String,
    retry: RetryPolicy,
    last_link: Regex,
}

impl GitHubClient {
    /// Build a client, authenticating with `GITHUB_TOKEN` when it is set.
    pub fn from_env(retry: RetryPolicy) -> Result<Self> {
        let token = std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.trim().is_empty());
        if token.is_none() {
            log::warn!("GITHUB_TOKEN not set; unauthenticated requests are limited to 60/hour");
        }
        Self::new(GITHUB_API, token.as_deref(), retry)
    }

    pub fn new(base_url: &str, token: Option<&str>, retry: RetryPolicy) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github.v3+json"));
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("token {}", token.trim()))
                .map_err(|_| RadarError::config("GITHUB_TOKEN contains invalid characters"))?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RadarError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
            last_link: Regex::new(r#"page=(\d+)>; rel="last""#)?,
        })
    }

    async fn send(&self, resource: &str) -> Result<reqwest::Response, FetchError> {
        let url = format!("{}{}", self.base_url, resource);
        let attempts = self.retry.max_attempts.max(1);
        let mut reason = String::new();

        for attempt in 0..attempts {
            let mut wait = self.retry.backoff(attempt);

            match self.http.get(&url).send().await {
                Ok(resp) => match classify_status(resp.status()) {
                    StatusClass::Success => return Ok(resp),
                    StatusClass::NotFound => return Err(FetchError::not_found(resource)),
                    StatusClass::Fail => {
                        return Err(FetchError::Status {
                            resource: resource.to_string(),
                            status: resp.status().as_u16(),
                        })
                    }
                    StatusClass::Retry => {
                        reason = format!("status {}", resp.status());
                        if let Some(reset) = rate_limit_wait(resp.headers(), Utc::now().timestamp())
                            .filter(|w| *w < self.retry.max_reset_wait)
                        {
                            log::warn!(
                                "Rate limited on {resource}; waiting {}s for reset",
                                reset.as_secs()
                            );
                            wait = reset;
                        }
                    }
                },
                Err(e) => reason = e.to_string(),
            }

            if attempt + 1 < attempts {
                log::warn!(
                    "Request to {resource} failed ({reason}); retrying in {}s (attempt {}/{attempts})",
                    wait.as_secs(),
                    attempt + 1
                );
                tokio::time::sleep(wait).await;
            }
        }

        Err(FetchError::Transient {
            resource: resource.to_string(),
            attempts,
            reason,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, resource: &str) -> Result<T, FetchError> {
        self.send(resource)
            .await?
            .json::<T>()
            .await
            .map_err(|e| FetchError::malformed(resource, e.to_string()))
    }

    async fn count_created_since(
        &self,
        resource: &str,
        since: DateTime<Utc>,
        skip_pull_requests: bool,
    ) -> Result<u64, FetchError> {
        let items: Vec<Created> = self.get_json(resource).await?;
        let count = items
            .iter()
            .filter(|item| !(skip_pull_requests && item.pull_request.is_some()))
            .filter(|item| created_since(item.created_at.as_deref(), since))
            .count();
        Ok(count as u64)
    }

    async fn repos_page(&self, org: &str, page: usize) -> Result<Vec<NamedRepo>, FetchError> {
        let query = format!("?per_page={PAGE_SIZE}&page={page}&type=public");
        match self.get_json(&format!("/orgs/{org}/repos{query}")).await {
            Err(e) if e.is_not_found() => {
                self.get_json(&format!("/users/{org}/repos{query}")).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl GitHubSource for GitHubClient {
    async fn repo_details(&self, full_name: &str) -> Result<RepoDetails, FetchError> {
        self.get_json(&format!("/repos/{full_name}")).await
    }

    async fn commits_since(
        &self,
        full_name: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, FetchError> {
        let resource = format!(
            "/repos/{full_name}/commits?since={}&per_page={PAGE_SIZE}",
            iso(since)
        );
        match self.get_json::<Vec<serde_json::Value>>(&resource).await {
            Ok(commits) => Ok(commits.len() as u64),
            // Empty repository.
            Err(FetchError::Status { status: 409, .. }) => Ok(0),
            Err(e) => Err(e),
        }
    }

    async fn forks_since(&self, full_name: &str, since: DateTime<Utc>) -> Result<u64, FetchError> {
        let resource = format!("/repos/{full_name}/forks?sort=newest&per_page={PAGE_SIZE}");
        self.count_created_since(&resource, since, false).await
    }

    async fn issues_since(&self, full_name: &str, since: DateTime<Utc>) -> Result<u64, FetchError> {
        let resource = format!("/repos/{full_name}/issues?state=all&per_page={PAGE_SIZE}");
        self.count_created_since(&resource, since, true).await
    }

    async fn prs_since(&self, full_name: &str, since: DateTime<Utc>) -> Result<u64, FetchError> {
        let resource = format!("/repos/{full_name}/pulls?state=all&per_page={PAGE_SIZE}");
        self.count_created_since(&resource, since, false).await
    }

    async fn contributor_count(&self, full_name: &str) -> Result<u64, FetchError> {
        let resource = format!("/repos/{full_name}/contributors?per_page=1");
        let resp = self.send(&resource).await?;

        let from_link = resp
            .headers()
            .get(reqwest::header::LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(|link| last_page(link, &self.last_link));
        if let Some(total) = from_link {
            return Ok(total);
        }

        // 204 means no contributors yet.
        if resp.status() == StatusCode::NO_CONTENT {
            return Ok(0);
        }
        let items: Vec<serde_json::Value> = resp
            .json()
            .await
            .map_err(|e| FetchError::malformed(&resource, e.to_string()))?;
        Ok(items.len() as u64)
    }

    async fn search_topic(
        &self,
        topic: &str,
        pushed_since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>, FetchError> {
        let resource = format!(
            "/search/repositories?q=topic:{topic}+pushed:>={}&sort=updated&per_page={limit}",
            pushed_since.format("%Y-%m-%d")
        );
        let page: SearchPage = self.get_json(&resource).await?;
        Ok(page.items.into_iter().map(|r| r.full_name).collect())
    }

    async fn org_repos(&self, org: &str) -> Result<Vec<String>, FetchError> {
        let mut names = Vec::new();
        let mut page = 1;
        loop {
            let batch = self.repos_page(org, page).await?;
            let done = batch.len() < PAGE_SIZE;
            names.extend(batch.into_iter().map(|r| r.full_name));
            if done {
                return Ok(names);
            }
            page += 1;
        }
    }

    async fn org_events(&self, org: &str) -> Result<Vec<EventRecord>, FetchError> {
        let org_events: Result<Vec<WireEvent>, FetchError> =
            self.get_json(&format!("/orgs/{org}/events?per_page=30")).await;
        let events = match org_events {
            Err(e) if e.is_not_found() => {
                self.get_json(&format!("/users/{org}/events/public?per_page=30")).await?
            }
            other => other?,
        };

        Ok(events
            .into_iter()
            .filter_map(|e| {
                let repo = e.repo?;
                Some(EventRecord {
                    event_id: e.id,
                    event_type: e.event_type.unwrap_or_default(),
                    repo_name: repo.name,
                    actor: e.actor.map(|a| a.login),
                    created_at: e.created_at,
                    processed: false,
                })
            })
            .collect())
    }

    async fn recent_commits(&self, full_name: &str) -> Result<Vec<RemoteCommit>, FetchError> {
        let resource = format!("/repos/{full_name}/commits?per_page={COMMIT_PAGE_SIZE}");
        match self.get_json::<Vec<WireCommit>>(&resource).await {
            Ok(commits) => Ok(commits.into_iter().map(RemoteCommit::from).collect()),
            Err(FetchError::Status { status: 409, .. }) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn backoff_grows_exponentially() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
    }

    #[test]
    fn classifies_statuses() {
        assert_eq!(classify_status(StatusCode::OK), StatusClass::Success);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), StatusClass::NotFound);
        assert_eq!(classify_status(StatusCode::GONE), StatusClass::NotFound);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), StatusClass::Retry);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), StatusClass::Retry);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), StatusClass::Retry);
        assert_eq!(classify_status(StatusCode::CONFLICT), StatusClass::Fail);
    }

    #[test]
    fn waits_for_reset_only_when_exhausted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1100"));
        assert_eq!(rate_limit_wait(&headers, 1000), Some(Duration::from_secs(101)));
        assert_eq!(rate_limit_wait(&headers, 2000), Some(Duration::from_secs(1)));

        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("12"));
        assert_eq!(rate_limit_wait(&headers, 1000), None);
    }

    #[test]
    fn parses_last_page_from_link_header() {
        let re = Regex::new(r#"page=(\d+)>; rel="last""#).unwrap();
        let link = r#"<https://api.github.com/repositories/1/contributors?per_page=1&page=2>; rel="next", <https://api.github.com/repositories/1/contributors?per_page=1&page=347>; rel="last""#;
        assert_eq!(last_page(link, &re), Some(347));
        assert_eq!(last_page("", &re), None);
    }

    #[test]
    fn window_filter_parses_timestamps() {
        let since = Utc.with_ymd_and_hms(2025, 1, 8, 0, 0, 0).unwrap();
        assert!(created_since(Some("2025-01-09T10:00:00Z"), since));
        assert!(created_since(Some("2025-01-08T00:00:00+00:00"), since));
        assert!(!created_since(Some("2025-01-07T23:59:59Z"), since));
        assert!(!created_since(Some("yesterday"), since));
        assert!(!created_since(None, since));
    }

    #[test]
    fn wire_commit_maps_to_remote_commit() {
        let raw = serde_json::json!({
            "sha": "abc",
            "html_url": "https://github.com/a/b/commit/abc",
            "commit": {
                "message": "init",
                "author": { "name": "Ada", "date": "2025-01-01T00:00:00Z" },
                "tree": { "sha": "t1" }
            }
        });
        let wire: WireCommit = serde_json::from_value(raw).unwrap();
        let commit = RemoteCommit::from(wire);
        assert_eq!(commit.author, "Ada");
        assert_eq!(commit.tree_sha, "t1");
        assert_eq!(commit.timestamp, "2025-01-01T00:00:00Z");
    }

    #[test]
    fn repo_details_read_github_field_names() {
        let raw = serde_json::json!({
            "full_name": "a/b",
            "description": null,
            "created_at": "2024-01-01T00:00:00Z",
            "stargazers_count": 42,
            "subscribers_count": 7,
            "unrelated": true
        });
        let details: RepoDetails = serde_json::from_value(raw).unwrap();
        assert_eq!(details.stars, 42);
        assert_eq!(details.watchers, 7);
        assert!(details.description.is_none());
    }
}
