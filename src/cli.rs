use crate::analysis::spam::SpamEvaluator;
use crate::commands::github::GitHubClient;
use crate::commands::pinning::{ArweaveUploader, Pinner};
use crate::commands::radar::{run_radar_daemon, Radar, RadarOptions};
use crate::commands::relay::{run_relay_daemon, Relay, RelayOptions};
use crate::commands::settings::load_effective_settings;
use crate::commands::shutdown::ctrl_c_listener;
use crate::commands::{audit, db, spam_report};
use crate::error::{RadarError, Result};
use clap::{Args, Parser, Subcommand};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "repo-radar")]
#[command(about = "Discover repositories by velocity, not star count", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging (and detailed spam-report output)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(long, global = true)]
    pub quiet: bool,

    /// JSON settings file (created with defaults when missing)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Discover, score and publish high-velocity repositories
    Scan(ScanArgs),
    /// Show the top repositories by velocity
    Stats(StatsArgs),
    /// Inspect the radar database for identity and burst problems
    #[command(name = "verify-db")]
    VerifyDb(DbArgs),
    /// Check generated RSS/Atom files in a directory
    #[command(name = "verify-feeds")]
    VerifyFeeds(VerifyFeedsArgs),
    /// Run the spam evaluator over every stored repository
    #[command(name = "spam-report")]
    SpamReport(SpamReportArgs),
    /// Archive new commits of watched orgs
    Relay(RelayArgs),
    /// Show archive relay statistics
    #[command(name = "relay-stats")]
    RelayStats(RelayStatsArgs),
}

#[derive(Args)]
pub struct ScanArgs {
    /// Comma-separated topics to watch
    #[arg(long, value_delimiter = ',')]
    pub watch: Vec<String>,

    /// Comma-separated orgs or users to monitor
    #[arg(long, value_delimiter = ',')]
    pub orgs: Vec<String>,

    /// Seconds between cycles
    #[arg(long, default_value_t = 300)]
    pub interval: u64,

    /// Velocity score for pinning and the watch-list hand-off
    #[arg(long)]
    pub threshold: Option<f64>,

    #[arg(long, default_value = "radar_state.db")]
    pub db: PathBuf,

    #[arg(long, default_value = "radar_feed.xml")]
    pub rss: PathBuf,

    /// Owner list handed to the archive relay
    #[arg(long, default_value = "gar_orgs.txt")]
    pub watchlist: PathBuf,

    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,
}

#[derive(Args)]
pub struct StatsArgs {
    #[arg(long, default_value = "radar_state.db")]
    pub db: PathBuf,

    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Args)]
pub struct DbArgs {
    #[arg(long, default_value = "radar_state.db")]
    pub db: PathBuf,
}

#[derive(Args)]
pub struct VerifyFeedsArgs {
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,
}

#[derive(Args)]
pub struct SpamReportArgs {
    #[arg(long, default_value = "radar_state.db")]
    pub db: PathBuf,

    /// Spam probability threshold
    #[arg(long)]
    pub threshold: Option<f64>,

    #[arg(long, default_value = "spam_analysis_report.json")]
    pub report: PathBuf,
}

#[derive(Args)]
pub struct RelayArgs {
    /// Comma-separated orgs or users to archive
    #[arg(long, value_delimiter = ',')]
    pub orgs: Vec<String>,

    /// Watch-list file merged with --orgs every cycle
    #[arg(long, default_value = "gar_orgs.txt")]
    pub orgs_file: PathBuf,

    #[arg(long, default_value_t = 60)]
    pub interval: u64,

    #[arg(long, default_value = "gar_state.db")]
    pub db: PathBuf,

    #[arg(long, default_value = "gar_feed.xml")]
    pub rss: PathBuf,

    #[arg(long)]
    pub once: bool,

    /// Archive commits without scanning messages for credentials
    #[arg(long)]
    pub no_secret_check: bool,
}

#[derive(Args)]
pub struct RelayStatsArgs {
    #[arg(long, default_value = "gar_state.db")]
    pub db: PathBuf,
}

fn clean_list(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Audit commands never create a database as a side effect.
fn open_existing(path: &Path) -> Result<Connection> {
    if !path.is_file() {
        return Err(RadarError::config(format!("database not found: {}", path.display())));
    }
    db::open_database(path)
}

pub async fn run(cli: Cli) -> Result<()> {
    let mut settings = load_effective_settings(cli.config.as_deref())?;

    match cli.command {
        Commands::Scan(args) => {
            if let Some(threshold) = args.threshold {
                settings.archive_threshold = threshold;
            }
            let options = RadarOptions {
                topics: clean_list(&args.watch),
                orgs: clean_list(&args.orgs),
                rss_path: args.rss,
                watchlist_path: args.watchlist,
            };
            let source = GitHubClient::from_env(settings.retry.clone())?;
            let radar = Radar::new(Box::new(source), &settings, options, Pinner::from_env()?)?;
            let conn = db::open_database(&args.db)?;

            if args.once {
                radar.scan_once(&conn).await?;
            } else {
                let interval = Duration::from_secs(args.interval);
                run_radar_daemon(&radar, &conn, interval, ctrl_c_listener()).await?;
            }
        }
        Commands::Stats(args) => {
            let conn = open_existing(&args.db)?;
            print!("{}", audit::render_stats(&conn, args.limit)?);
        }
        Commands::VerifyDb(args) => {
            let conn = open_existing(&args.db)?;
            print!("{}", audit::render_verify_db(&conn)?);
        }
        Commands::VerifyFeeds(args) => {
            let checks = audit::verify_feeds(&args.dir)?;
            print!("{}", audit::render_feed_checks(&checks));
        }
        Commands::SpamReport(args) => {
            if let Some(threshold) = args.threshold {
                settings.spam.threshold = threshold;
            }
            let evaluator = SpamEvaluator::new(settings.spam.clone())?;
            let conn = open_existing(&args.db)?;

            let (clean, spam) = spam_report::analyze_database(&conn, &evaluator)?;
            let report = spam_report::build_report(clean, spam, chrono::Utc::now().to_rfc3339());
            spam_report::write_report(&report, &args.report)?;

            print!("{}", spam_report::render_summary(&report, cli.verbose));
            println!("\nFull report: {}", args.report.display());
        }
        Commands::Relay(args) => {
            let options = RelayOptions {
                orgs: clean_list(&args.orgs),
                orgs_file: Some(args.orgs_file),
                rss_path: args.rss,
                check_secrets: !args.no_secret_check,
                feed_limit: settings.feed_limit,
            };
            let source = GitHubClient::from_env(settings.retry.clone())?;
            let relay = Relay::new(
                Box::new(source),
                options,
                Pinner::from_env()?,
                ArweaveUploader::from_env()?,
            )?;
            let conn = db::open_database(&args.db)?;

            if args.once {
                relay.poll_once(&conn).await?;
            } else {
                let interval = Duration::from_secs(args.interval);
                run_relay_daemon(&relay, &conn, interval, ctrl_c_listener()).await?;
            }
        }
        Commands::RelayStats(args) => {
            let conn = open_existing(&args.db)?;
            print!("{}", audit::render_relay_stats(&db::relay_stats(&conn)?));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_comma_separated_targets() {
        let cli = Cli::parse_from([
            "repo-radar", "scan", "--watch", "ai,rust", "--orgs", "acme", "--once",
        ]);
        let Commands::Scan(args) = cli.command else {
            panic!("expected scan");
        };
        assert_eq!(args.watch, vec!["ai", "rust"]);
        assert_eq!(args.orgs, vec!["acme"]);
        assert_eq!(args.interval, 300);
        assert!(args.once);
    }

    #[test]
    fn global_verbose_reaches_spam_report() {
        let cli = Cli::parse_from(["repo-radar", "spam-report", "-v", "--threshold", "0.8"]);
        assert!(cli.verbose);
        let Commands::SpamReport(args) = cli.command else {
            panic!("expected spam-report");
        };
        assert_eq!(args.threshold, Some(0.8));
        assert_eq!(args.report, PathBuf::from("spam_analysis_report.json"));
    }

    #[test]
    fn relay_defaults_match_the_radar_hand_off() {
        let cli = Cli::parse_from(["repo-radar", "relay", "--orgs", "acme"]);
        let Commands::Relay(args) = cli.command else {
            panic!("expected relay");
        };
        assert_eq!(args.orgs_file, PathBuf::from("gar_orgs.txt"));
        assert_eq!(args.interval, 60);
        assert!(!args.no_secret_check);
    }

    #[test]
    fn audit_commands_refuse_missing_databases() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_existing(&dir.path().join("absent.db")).unwrap_err();
        assert!(matches!(err, RadarError::Config(_)));
        assert!(!dir.path().join("absent.db").exists());
    }
}
