//! The owner list the radar hands to the archive relay.
//!
//! One owner per line. Blank lines and `#` comments are ignored on read and
//! left untouched on write; new owners are appended.

use crate::error::Result;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

pub fn read_watchlist(path: &Path) -> Result<BTreeSet<String>> {
    if !path.exists() {
        return Ok(BTreeSet::new());
    }
    Ok(parse_owners(&fs::read_to_string(path)?))
}

fn parse_owners(raw: &str) -> BTreeSet<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Add `owner` unless it is already listed. Returns whether the file changed.
pub fn add_owner(path: &Path, owner: &str) -> Result<bool> {
    let owner = owner.trim();
    if owner.is_empty() {
        return Ok(false);
    }

    let mut body = if path.exists() {
        fs::read_to_string(path)?
    } else {
        String::new()
    };
    if parse_owners(&body).contains(owner) {
        return Ok(false);
    }

    if !body.is_empty() && !body.ends_with('\n') {
        body.push('\n');
    }
    body.push_str(owner);
    body.push('\n');
    fs::write(path, body)?;
    log::info!("Added {owner} to relay watch list ({})", path.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_each_owner_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gar_orgs.txt");

        assert!(add_owner(&path, "zeta").unwrap());
        assert!(add_owner(&path, "alpha").unwrap());
        assert!(!add_owner(&path, "zeta").unwrap());
        assert!(!add_owner(&path, "  ").unwrap());

        assert_eq!(fs::read_to_string(&path).unwrap(), "zeta\nalpha\n");
    }

    #[test]
    fn hand_edits_survive_an_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gar_orgs.txt");
        fs::write(&path, "# curated by ops\nacme\n\n# partners\nbeta").unwrap();

        assert!(add_owner(&path, "gamma").unwrap());
        assert!(!add_owner(&path, "beta").unwrap());

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "# curated by ops\nacme\n\n# partners\nbeta\ngamma\n"
        );
        let owners: Vec<String> = read_watchlist(&path).unwrap().into_iter().collect();
        assert_eq!(owners, vec!["acme", "beta", "gamma"]);
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_watchlist(&dir.path().join("none.txt")).unwrap().is_empty());
    }

    #[test]
    fn skips_blank_lines_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orgs.txt");
        fs::write(&path, "# managed by the radar\n\nacme\n  beta  \n").unwrap();

        let owners: Vec<String> = read_watchlist(&path).unwrap().into_iter().collect();
        assert_eq!(owners, vec!["acme", "beta"]);
    }
}
