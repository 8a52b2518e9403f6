//! Features-file (licence) selection for enterprise deployments.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use time::macros::format_description;
use time::Date;
use tracing::debug;

use crate::types::{Edition, ProductVersion};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeaturesFile {
    pub path: PathBuf,
    pub key_version: String,
    /// `None` when the file carries no parseable expiry
    pub valid_until: Option<Date>,
    pub serial: u64,
}

impl FeaturesFile {
    fn valid_on(&self, today: Date) -> bool {
        self.valid_until.map_or(true, |d| d > today)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeaturesSelection {
    /// The version does not use a features file
    NotRequired,
    Selected(PathBuf),
    /// Nothing valid of the wanted key version was found
    NotFound { wanted: &'static str },
}

/// Parse the header fields of one features file, `None` if it has no key version
pub fn parse_features(path: &Path, content: &str) -> Option<FeaturesFile> {
    let mut key_version = None;
    let mut valid_until = None;
    let mut serial = 0;

    for line in content.lines() {
        let mut words = line.split_whitespace();
        match (words.next(), words.next()) {
            (Some("feature-key-version"), Some(v)) => key_version = Some(v.to_string()),
            (Some("valid-until-date"), Some(v)) => valid_until = parse_date(v),
            (Some("serial-number"), Some(v)) => serial = v.parse().unwrap_or(0),
            _ => {}
        }
    }

    key_version.map(|key_version| FeaturesFile {
        path: path.to_path_buf(),
        key_version,
        valid_until,
        serial,
    })
}

fn parse_date(s: &str) -> Option<Date> {
    Date::parse(s, format_description!("[year]-[month]-[day]")).ok()
}

/// Which key version a product version needs: `Some(required)` or a preference
fn wanted_key(version: &ProductVersion) -> Option<(&'static str, bool)> {
    let (major, minor) = version.major_minor()?;
    match (major, minor) {
        (m, _) if m > 6 => Some(("2", true)),
        (6, n) if n >= 3 => Some(("2", true)),
        (6, _) => Some(("2", false)),
        (5, n) if n >= 5 => Some(("2", false)),
        (5, _) => Some(("1", true)),
        (4, n) if n >= 6 => Some(("1", true)),
        _ => None,
    }
}

/// Pick the features file for `version` from a file or a directory of files.
///
/// 6.3 and later require key version 2, 4.6 to 5.4 require version 1, and
/// 5.5 to 6.2 prefer version 2 but accept 1. Among valid candidates the
/// highest serial wins, with the later expiry breaking ties.
pub async fn select_features_file(
    source: &Path,
    version: &ProductVersion,
    today: Date,
) -> Result<FeaturesSelection> {
    if version.edition == Edition::Community {
        return Ok(FeaturesSelection::NotRequired);
    }
    let Some((wanted, strict)) = wanted_key(version) else {
        return Ok(FeaturesSelection::NotRequired);
    };

    let meta = tokio::fs::metadata(source)
        .await
        .with_context(|| format!("Features file path does not exist: {:?}", source))?;
    let mut paths = Vec::new();
    if meta.is_dir() {
        let mut dir = tokio::fs::read_dir(source)
            .await
            .with_context(|| format!("Failed to read directory {:?}", source))?;
        while let Some(entry) = dir.next_entry().await? {
            if entry.file_type().await?.is_file() {
                paths.push(entry.path());
            }
        }
        paths.sort();
    } else {
        paths.push(source.to_path_buf());
    }

    let mut candidates = Vec::new();
    for path in paths {
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read features file {:?}", path))?;
        if let Some(ff) = parse_features(&path, &String::from_utf8_lossy(&bytes)) {
            debug!(
                "features-file={:?} version={} valid-until={:?} serial={}",
                ff.path, ff.key_version, ff.valid_until, ff.serial
            );
            candidates.push(ff);
        }
    }

    Ok(pick(&candidates, wanted, strict, today)
        .map(|ff| FeaturesSelection::Selected(ff.path.clone()))
        .unwrap_or(FeaturesSelection::NotFound { wanted }))
}

fn pick<'a>(
    candidates: &'a [FeaturesFile],
    wanted: &str,
    strict: bool,
    today: Date,
) -> Option<&'a FeaturesFile> {
    let best_of = |key: &str| {
        candidates
            .iter()
            .filter(|ff| ff.key_version == key && ff.valid_on(today))
            .max_by(|a, b| {
                a.serial
                    .cmp(&b.serial)
                    .then_with(|| a.valid_until.map_or(Date::MAX, |d| d).cmp(&b.valid_until.map_or(Date::MAX, |d| d)))
            })
    };

    match best_of(wanted) {
        Some(ff) => Some(ff),
        None if !strict => best_of(if wanted == "2" { "1" } else { "2" }),
        None => None,
    }
}
