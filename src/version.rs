/*============================================================
  Synavera Project: Syn-Syu
  Module: synsyu_update::version
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Normalise release tags into semantic versions and classify
    the delta between two versions as major, minor, or patch.

  Security / Safety Notes:
    Pure computation; no I/O performed in this module.

  Dependencies:
    semver for ordering, serde for serialised update types.

  Operational Scope:
    Used by the feed client, diff generator, and update
    manager whenever versions are compared or displayed.

  Revision History:
    2026-10-18 COD  Replaced vercmp shell-out with semver.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Clear data contracts between modules
    - Lenient parsing, strict comparison
============================================================*/

use std::cmp::Ordering;
use std::fmt;

use semver::Version;
use serde::{Deserialize, Serialize};

/// Semantic category of the difference between two versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    Major,
    Minor,
    Patch,
}

impl UpdateType {
    /// Classify `from → to` by the most significant differing component.
    /// Returns `None` when major, minor, and patch are all equal.
    pub fn between(from: &str, to: &str) -> Option<Self> {
        let from = parse_version(from)?;
        let to = parse_version(to)?;
        if from.major != to.major {
            Some(UpdateType::Major)
        } else if from.minor != to.minor {
            Some(UpdateType::Minor)
        } else if from.patch != to.patch {
            Some(UpdateType::Patch)
        } else {
            None
        }
    }
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UpdateType::Major => "major",
            UpdateType::Minor => "minor",
            UpdateType::Patch => "patch",
        };
        f.write_str(label)
    }
}

/// Strip a leading tag prefix (`v`, `V`, or the configured prefix).
pub fn strip_tag_prefix<'a>(raw: &'a str, prefix: &str) -> &'a str {
    let raw = raw.trim();
    if !prefix.is_empty() {
        if let Some(rest) = raw.strip_prefix(prefix) {
            return rest;
        }
    }
    raw.strip_prefix('v')
        .or_else(|| raw.strip_prefix('V'))
        .unwrap_or(raw)
}

/// Parse a version string leniently: tag prefixes are dropped and missing
/// minor/patch components are treated as zero.
pub fn parse_version(raw: &str) -> Option<Version> {
    let cleaned = strip_tag_prefix(raw, "");
    if let Ok(version) = Version::parse(cleaned) {
        return Some(version);
    }

    let core = cleaned
        .split(|c| c == '-' || c == '+')
        .next()
        .unwrap_or(cleaned);
    let mut parts = core.split('.');
    let mut next = || -> Option<u64> {
        match parts.next() {
            Some(part) => leading_number(part),
            None => Some(0),
        }
    };
    let major = next()?;
    let minor = next()?;
    let patch = next()?;
    Some(Version::new(major, minor, patch))
}

fn leading_number(part: &str) -> Option<u64> {
    let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Compare two version strings; unparsable inputs yield `None`.
pub fn compare_versions(left: &str, right: &str) -> Option<Ordering> {
    Some(parse_version(left)?.cmp(&parse_version(right)?))
}

/// True when both strings denote the same version, ignoring tag prefixes.
pub fn versions_match(left: &str, right: &str) -> bool {
    match compare_versions(left, right) {
        Some(ordering) => ordering == Ordering::Equal,
        None => strip_tag_prefix(left, "") == strip_tag_prefix(right, ""),
    }
}

/// Pull the first version-looking token out of tool output such as
/// `syn-syu/3.0.0 linux-x64 node-v20` or `v3.0.0`.
pub fn extract_version(output: &str) -> Option<String> {
    output
        .split(|c: char| c.is_whitespace() || c == '/' || c == '@' || c == ',')
        .map(|token| strip_tag_prefix(token, ""))
        .find(|token| {
            token.starts_with(|c: char| c.is_ascii_digit())
                && token.contains('.')
                && parse_version(token).is_some()
        })
        .map(str::to_string)
}
