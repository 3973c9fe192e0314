use crate::analysis::spam::SpamEvaluator;
use crate::commands::db;
use crate::error::Result;
use crate::models::report::{ReportSummary, SpamReport};
use crate::models::repo::split_full_name;
use crate::models::verdict::{SignalType, SpamVerdict};
use rusqlite::Connection;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

const TOP_OWNERS: usize = 10;
const BORDERLINE_LIMIT: usize = 20;
/// Clean verdicts above this probability are listed as borderline.
const BORDERLINE_PROBABILITY: f64 = 0.3;

/// Evaluate every stored repo. Returns `(clean, spam)` in store order.
pub fn analyze_database(
    conn: &Connection,
    evaluator: &SpamEvaluator,
) -> Result<(Vec<SpamVerdict>, Vec<SpamVerdict>)> {
    let (spam, clean): (Vec<_>, Vec<_>) = db::all_repos(conn)?
        .iter()
        .map(|repo| {
            evaluator.evaluate(&repo.full_name, repo.velocity_score, &repo.description, conn)
        })
        .partition(|verdict| verdict.is_spam);

    log::info!("Analysis complete: {} clean, {} spam", clean.len(), spam.len());
    Ok((clean, spam))
}

pub fn build_report(
    clean: Vec<SpamVerdict>,
    mut spam: Vec<SpamVerdict>,
    generated_at: String,
) -> SpamReport {
    let total = clean.len() + spam.len();
    let spam_percentage = if total == 0 {
        0.0
    } else {
        (1000.0 * spam.len() as f64 / total as f64).round() / 10.0
    };

    let mut signal_frequency: BTreeMap<SignalType, usize> = BTreeMap::new();
    let mut owners: HashMap<String, usize> = HashMap::new();
    for verdict in &spam {
        for signal in &verdict.signals {
            *signal_frequency.entry(signal.signal_type).or_default() += 1;
        }
        let (owner, _) = split_full_name(&verdict.full_name);
        *owners.entry(owner.to_string()).or_default() += 1;
    }

    let mut top_spam_owners: Vec<(String, usize)> = owners.into_iter().collect();
    top_spam_owners.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_spam_owners.truncate(TOP_OWNERS);

    spam.sort_by(|a, b| b.spam_probability.total_cmp(&a.spam_probability));

    let summary = ReportSummary {
        total_repos: total,
        clean_repos: clean.len(),
        spam_repos: spam.len(),
        spam_percentage,
    };

    let borderline_clean = clean
        .into_iter()
        .filter(|v| v.spam_probability > BORDERLINE_PROBABILITY)
        .take(BORDERLINE_LIMIT)
        .collect();

    SpamReport {
        report_id: uuid::Uuid::new_v4().to_string(),
        generated_at,
        summary,
        signal_frequency,
        top_spam_owners,
        spam_repos: spam,
        borderline_clean,
    }
}

pub fn write_report(report: &SpamReport, path: &Path) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(report)?)?;
    log::info!("Report saved to {}", path.display());
    Ok(())
}

/// Human-readable digest for the terminal.
pub fn render_summary(report: &SpamReport, verbose: bool) -> String {
    let mut out = String::new();
    let s = &report.summary;
    let _ = writeln!(out, "Summary:");
    let _ = writeln!(out, "  Total repos:  {}", s.total_repos);
    let _ = writeln!(out, "  Clean:        {}", s.clean_repos);
    let _ = writeln!(out, "  Spam:         {} ({}%)", s.spam_repos, s.spam_percentage);

    let mut frequency: Vec<_> = report.signal_frequency.iter().collect();
    frequency.sort_by(|a, b| b.1.cmp(a.1));
    let _ = writeln!(out, "\nSignal Frequency:");
    for (signal, count) in frequency {
        let _ = writeln!(out, "  {signal}: {count}");
    }

    let _ = writeln!(out, "\nTop Spam Owners:");
    for (owner, count) in report.top_spam_owners.iter().take(5) {
        let _ = writeln!(out, "  {owner}: {count} repos");
    }

    if verbose && !report.spam_repos.is_empty() {
        let _ = writeln!(out, "\nSpam Repos (top 10):");
        for verdict in report.spam_repos.iter().take(10) {
            let _ = writeln!(
                out,
                "  [{:.0}%] {}",
                verdict.spam_probability * 100.0,
                verdict.full_name
            );
            for signal in &verdict.signals {
                let _ = writeln!(out, "       - {}: {}", signal.signal_type, signal.detail);
            }
        }
    }

    out
}
