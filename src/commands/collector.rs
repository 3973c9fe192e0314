use crate::commands::github::GitHubSource;
use crate::error::FetchError;
use crate::models::repo::{split_full_name, RepoRecord};
use chrono::{DateTime, Duration, Utc};

pub const MAX_DESCRIPTION_CHARS: usize = 500;

/// Gather identity and window counts for one repository.
///
/// Only the details call can fail the collection. A failing count is logged
/// and recorded as zero so one flaky endpoint does not drop the repo.
pub async fn collect_metrics(
    source: &dyn GitHubSource,
    full_name: &str,
    window_days: u32,
    now: DateTime<Utc>,
) -> Result<RepoRecord, FetchError> {
    let details = source.repo_details(full_name).await?;
    let since = now - Duration::days(i64::from(window_days));

    let (owner, name) = split_full_name(full_name);
    let mut record = RepoRecord {
        full_name: full_name.to_string(),
        owner: owner.to_string(),
        name: name.to_string(),
        description: details
            .description
            .as_deref()
            .map(|d| d.chars().take(MAX_DESCRIPTION_CHARS).collect())
            .unwrap_or_default(),
        created_at: details.created_at,
        pushed_at: details.pushed_at,
        stars: details.stars,
        watchers: details.watchers,
        ..RepoRecord::default()
    };

    record.commits_7d = or_zero(full_name, "commits", source.commits_since(full_name, since).await);
    record.forks_7d = or_zero(full_name, "forks", source.forks_since(full_name, since).await);
    record.issues_7d = or_zero(full_name, "issues", source.issues_since(full_name, since).await);
    record.prs_7d = or_zero(full_name, "pull requests", source.prs_since(full_name, since).await);
    record.contributors_7d = or_zero(
        full_name,
        "contributors",
        source.contributor_count(full_name).await,
    );

    Ok(record)
}

fn or_zero(full_name: &str, what: &str, result: Result<u64, FetchError>) -> u64 {
    result.unwrap_or_else(|e| {
        log::warn!("Counting {what} for {full_name} failed: {e}");
        0
    })
}
