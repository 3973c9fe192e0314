//! Multi-signal spam detection for tracked repositories.
//!
//! Five detectors look only at the name and description. Two more ask the
//! state store how the candidate relates to everything else: how many
//! high-velocity repos the same owner has, and how many repos sit at almost
//! the same velocity. Store failures in those two are logged and ignored.

use crate::analysis::velocity::round_to;
use crate::commands::db::Predicate;
use crate::error::{RadarError, Result};
use crate::models::repo::{short_name, split_full_name};
use crate::models::verdict::{SignalType, SpamSignal, SpamVerdict};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Share of the strongest signal in the combined probability.
pub const MAX_SEVERITY_WEIGHT: f64 = 0.7;
/// Share of the mean signal severity in the combined probability.
pub const MEAN_SEVERITY_WEIGHT: f64 = 0.3;

pub const BLOCKLIST_SEVERITY: f64 = 1.0;
pub const SPAM_NAME_SEVERITY: f64 = 0.85;
pub const SUSPICIOUS_PATTERN_SEVERITY: f64 = 0.6;
pub const SEO_NAME_SEVERITY: f64 = 0.7;
pub const KNOWN_OWNER_SEVERITY: f64 = 0.9;

/// Explicit bad-actor language, matched against description and full name.
pub const DEFAULT_KEYWORD_BLOCKLIST: &[&str] = &[
    // malicious intent
    "bypass", "unauthorized", "tricking", "exploit", "crack", "keygen",
    "hack tool", "brute force", "credential", "phishing",
    // deepfake / identity fraud
    "deepfake", "face swap", "id verification bypass", "2fa bypass",
    "biometric bypass",
    // crypto spam
    "airdrop bot", "airdrop farming", "airdrop automation",
    "arbitrage bot deployer", "flash loan attack",
    "pump and dump", "rug pull",
    // fake wallet SDKs
    "wallet connect sdk", "metamask sdk", "phantom sdk",
    "coinbase wallet api", "trust wallet sdk",
    // crypto spam repo names
    "wallet-connect", "walletconnect",
    "multi-crypto", "multicrypto",
    "web3-ethereum", "web3-solana",
    "crypto-payment", "blockchain-network",
    "passive income", "renda passiva",
    "income generator", "gerador renda",
];

pub const DEFAULT_SPAM_NAME_KEYWORDS: &[&str] = &[
    "airdrop", "wallet-connect", "metamask-wallet", "phantom-wallet",
    "coinbase-wallet", "trust-wallet", "web3-sdk", "web3-api",
    "blockchain-plugin", "crypto-payment", "defi-arbitrage",
    "income-generator", "passive-income",
];

/// Soft phrases, matched case-insensitively against the description.
pub const DEFAULT_SUSPICIOUS_PATTERNS: &[&str] = &[
    r"passive income.*blockchain",
    r"automated.*trading.*bot",
    r"crypto.*payment.*gateway",
    r"wallet.*storage.*multi.*crypto",
    r"testnet.*bot",
    r"faucet.*automation",
    r"token.*generator",
    r"\bbot\b.*\bairdrop\b",
    r"defi.*arbitrage",
];

/// Keyword-stuffed or absurdly long repo names. Case-sensitive.
pub const DEFAULT_SEO_NAME_PATTERNS: &[&str] = &[
    r"-[A-Z][a-z]+-[A-Z][a-z]+-[A-Z][a-z]+-[A-Z][a-z]+",
    r"(Wallet|Crypto|Bot|Api|Sdk|Web3|Blockchain|Defi){3,}",
    r".{60,}",
];

pub const DEFAULT_KNOWN_SPAM_OWNERS: &[&str] = &["frankrichardhall"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpamConfig {
    /// Probability at or above which a repo is spam.
    pub threshold: f64,
    pub owner_concentration_threshold: u64,
    /// Score above which a repo counts toward owner concentration.
    pub high_velocity_floor: f64,
    pub cluster_tolerance: f64,
    pub cluster_min_size: u64,
    pub keyword_blocklist: Vec<String>,
    pub spam_name_keywords: Vec<String>,
    pub suspicious_patterns: Vec<String>,
    pub seo_name_patterns: Vec<String>,
    pub known_spam_owners: Vec<String>,
}

impl Default for SpamConfig {
    fn default() -> Self {
        fn owned(items: &[&str]) -> Vec<String> {
            items.iter().map(|s| s.to_string()).collect()
        }

        Self {
            threshold: 0.7,
            owner_concentration_threshold: 5,
            high_velocity_floor: 500.0,
            cluster_tolerance: 5.0,
            cluster_min_size: 5,
            keyword_blocklist: owned(DEFAULT_KEYWORD_BLOCKLIST),
            spam_name_keywords: owned(DEFAULT_SPAM_NAME_KEYWORDS),
            suspicious_patterns: owned(DEFAULT_SUSPICIOUS_PATTERNS),
            seo_name_patterns: owned(DEFAULT_SEO_NAME_PATTERNS),
            known_spam_owners: owned(DEFAULT_KNOWN_SPAM_OWNERS),
        }
    }
}

/// Read side of the state store used by the cross-entity checks.
pub trait ScoreIndex {
    fn count_where(&self, predicate: &Predicate) -> Result<u64>;
}

#[derive(Debug)]
pub struct SpamEvaluator {
    config: SpamConfig,
    blocklist: Vec<String>,
    name_keywords: Vec<String>,
    suspicious: Vec<(String, Regex)>,
    seo: Vec<Regex>,
    spam_owners: HashSet<String>,
}

impl SpamEvaluator {
    /// Compiles every pattern up front; a bad pattern fails here, not mid-scan.
    pub fn new(config: SpamConfig) -> Result<Self> {
        let suspicious = config
            .suspicious_patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map(|re| (p.clone(), re))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let seo = config
            .seo_name_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if !(0.0..=1.0).contains(&config.threshold) {
            return Err(RadarError::config(format!(
                "spam threshold must be within [0, 1], got {}",
                config.threshold
            )));
        }

        Ok(Self {
            blocklist: lowercase_all(&config.keyword_blocklist),
            name_keywords: lowercase_all(&config.spam_name_keywords),
            spam_owners: lowercase_all(&config.known_spam_owners).into_iter().collect(),
            suspicious,
            seo,
            config,
        })
    }

    /// Run every detector and combine the signals into a verdict.
    pub fn evaluate(
        &self,
        full_name: &str,
        velocity_score: f64,
        description: &str,
        index: &dyn ScoreIndex,
    ) -> SpamVerdict {
        let mut signals = Vec::new();

        signals.extend(self.check_keyword_blocklist(description, full_name));
        signals.extend(self.check_spam_name_keywords(full_name));
        signals.extend(self.check_suspicious_patterns(description));
        signals.extend(self.check_seo_name(full_name));
        signals.extend(self.check_known_spam_owner(full_name));
        signals.extend(self.check_owner_concentration(full_name, index));
        signals.extend(self.check_velocity_clustering(full_name, velocity_score, index));

        let spam_probability = combine_severities(&signals);

        SpamVerdict {
            full_name: full_name.to_string(),
            velocity_score,
            is_spam: spam_probability >= self.config.threshold,
            spam_probability,
            signals,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn check_keyword_blocklist(
        &self,
        description: &str,
        full_name: &str,
    ) -> Option<SpamSignal> {
        let text = format!("{description} {full_name}").to_lowercase();
        self.blocklist.iter().find(|kw| text.contains(kw.as_str())).map(|kw| {
            SpamSignal::new(
                SignalType::KeywordBlocklist,
                BLOCKLIST_SEVERITY,
                format!("Contains blocked keyword: '{kw}'"),
            )
        })
    }

    pub fn check_spam_name_keywords(&self, full_name: &str) -> Option<SpamSignal> {
        let repo_name = short_name(full_name).to_lowercase();
        self.name_keywords
            .iter()
            .find(|kw| repo_name.contains(kw.as_str()))
            .map(|kw| {
                SpamSignal::new(
                    SignalType::SpamNameKeyword,
                    SPAM_NAME_SEVERITY,
                    format!("Repo name contains spam keyword: '{kw}'"),
                )
            })
    }

    /// One signal per matching pattern.
    pub fn check_suspicious_patterns(&self, description: &str) -> Vec<SpamSignal> {
        self.suspicious
            .iter()
            .filter(|(_, re)| re.is_match(description))
            .map(|(pattern, _)| {
                SpamSignal::new(
                    SignalType::SuspiciousPattern,
                    SUSPICIOUS_PATTERN_SEVERITY,
                    format!("Matches suspicious pattern: {pattern}"),
                )
            })
            .collect()
    }

    pub fn check_seo_name(&self, full_name: &str) -> Option<SpamSignal> {
        let repo_name = short_name(full_name);
        self.seo.iter().any(|re| re.is_match(repo_name)).then(|| {
            SpamSignal::new(
                SignalType::SeoName,
                SEO_NAME_SEVERITY,
                format!("Repo name appears SEO-stuffed: {repo_name}"),
            )
        })
    }

    pub fn check_known_spam_owner(&self, full_name: &str) -> Option<SpamSignal> {
        let (owner, _) = split_full_name(full_name);
        if owner.is_empty() || !self.spam_owners.contains(&owner.to_lowercase()) {
            return None;
        }
        Some(SpamSignal::new(
            SignalType::KnownSpamOwner,
            KNOWN_OWNER_SEVERITY,
            format!("Owner '{owner}' is flagged as known spam actor"),
        ))
    }

    pub fn check_owner_concentration(
        &self,
        full_name: &str,
        index: &dyn ScoreIndex,
    ) -> Option<SpamSignal> {
        let (owner, _) = split_full_name(full_name);
        if owner.is_empty() {
            return None;
        }

        let predicate = Predicate::OwnerAbove {
            owner: owner.to_string(),
            min_score: self.config.high_velocity_floor,
        };
        let count = match index.count_where(&predicate) {
            Ok(count) => count,
            Err(e) => {
                log::warn!("Owner concentration check failed for {full_name}: {e}");
                return None;
            }
        };

        let threshold = self.config.owner_concentration_threshold;
        if count < threshold {
            return None;
        }
        let severity = (0.5 + (count - threshold) as f64 * 0.1).min(0.95);
        Some(SpamSignal::new(
            SignalType::OwnerConcentration,
            severity,
            format!("Owner has {count} high-velocity repos (threshold: {threshold})"),
        ))
    }

    pub fn check_velocity_clustering(
        &self,
        full_name: &str,
        velocity_score: f64,
        index: &dyn ScoreIndex,
    ) -> Option<SpamSignal> {
        let tolerance = self.config.cluster_tolerance;
        let predicate = Predicate::ScoreWithin {
            score: velocity_score,
            tolerance,
            exclude: Some(full_name.to_string()),
        };
        let count = match index.count_where(&predicate) {
            Ok(count) => count,
            Err(e) => {
                log::warn!("Velocity clustering check failed for {full_name}: {e}");
                return None;
            }
        };

        if count < self.config.cluster_min_size {
            return None;
        }
        let severity = (0.4 + count as f64 * 0.05).min(0.8);
        Some(SpamSignal::new(
            SignalType::VelocityClustering,
            severity,
            format!("{count} repos have velocity within {tolerance} of {velocity_score}"),
        ))
    }
}

/// `0.7 * max + 0.3 * mean`, rounded to three decimals; zero without signals.
pub fn combine_severities(signals: &[SpamSignal]) -> f64 {
    if signals.is_empty() {
        return 0.0;
    }
    let max = signals.iter().map(|s| s.severity).fold(f64::MIN, f64::max);
    let mean = signals.iter().map(|s| s.severity).sum::<f64>() / signals.len() as f64;
    round_to(MAX_SEVERITY_WEIGHT * max + MEAN_SEVERITY_WEIGHT * mean, 3)
}

fn lowercase_all(items: &[String]) -> Vec<String> {
    items.iter().map(|s| s.to_lowercase()).collect()
}
