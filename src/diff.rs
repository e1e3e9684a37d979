/*============================================================
  Synavera Project: Syn-Syu
  Module: synsyu_update::diff
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1
  ------------------------------------------------------------
  Purpose:
    Turn two release identifiers into a categorised changelog
    and a recommended-action verdict.

  Security / Safety Notes:
    Changelog text is treated as untrusted display data; it is
    never interpreted beyond line classification.

  Dependencies:
    crate::feed for release resolution, serde for output.

  Operational Scope:
    Backs `changelog`/`diff` reporting and pre-update prompts.

  Revision History:
    2026-10-18 COD  Authored changelog categorisation.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Pure classification separated from I/O
    - Deterministic ordering of categorised entries
============================================================*/

use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{Result, UpdateError};
use crate::feed::{ReleaseFeedClient, ReleaseInfo};
use crate::version::{strip_tag_prefix, UpdateType};

const SUMMARY_LIMIT: usize = 5;

/// Categorised difference between two releases.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDiff {
    pub from_version: String,
    pub to_version: String,
    pub update_type: Option<UpdateType>,
    pub breaking_changes: Vec<String>,
    pub new_features: Vec<String>,
    pub bug_fixes: Vec<String>,
    pub deprecations: Vec<String>,
    pub security_fixes: Vec<String>,
    pub performance_improvements: Vec<String>,
    pub documentation: Vec<String>,
    pub other: Vec<String>,
    pub full_changelog: String,
    pub release_notes: String,
}

/// How urgently an update should be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendedAction {
    Required,
    Recommended,
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Breaking,
    Features,
    BugFixes,
    Deprecations,
    Security,
    Performance,
    Documentation,
    Other,
}

impl VersionDiff {
    fn bucket(&mut self, category: Category) -> &mut Vec<String> {
        match category {
            Category::Breaking => &mut self.breaking_changes,
            Category::Features => &mut self.new_features,
            Category::BugFixes => &mut self.bug_fixes,
            Category::Deprecations => &mut self.deprecations,
            Category::Security => &mut self.security_fixes,
            Category::Performance => &mut self.performance_improvements,
            Category::Documentation => &mut self.documentation,
            Category::Other => &mut self.other,
        }
    }

    fn push(&mut self, category: Category, entry: &str) {
        let bucket = self.bucket(category);
        if !bucket.iter().any(|existing| existing == entry) {
            bucket.push(entry.to_string());
        }
    }

    /// Merge the entries of `changelog` into this diff.
    fn absorb(&mut self, changelog: &str) {
        let mut section: Option<Category> = None;
        for line in changelog.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(heading) = heading_text(trimmed) {
                section = classify_heading(heading);
                continue;
            }

            let entry = list_entry(trimmed).unwrap_or(trimmed);
            if !entry.chars().any(char::is_alphanumeric) {
                continue;
            }
            let by_prefix = classify_prefix(entry);
            if let Some(category) = section {
                self.push(category, entry);
            }
            if let Some(category) = by_prefix {
                self.push(category, entry);
            }
            if section.is_none() && by_prefix.is_none() {
                self.push(Category::Other, entry);
            }
        }
    }

    fn categories(&self) -> [(&'static str, &Vec<String>); 8] {
        [
            ("Breaking Changes", &self.breaking_changes),
            ("Security Fixes", &self.security_fixes),
            ("New Features", &self.new_features),
            ("Bug Fixes", &self.bug_fixes),
            ("Performance Improvements", &self.performance_improvements),
            ("Deprecations", &self.deprecations),
            ("Documentation", &self.documentation),
            ("Other Changes", &self.other),
        ]
    }
}

/// Categorise a single raw changelog.
pub fn categorize_changelog(changelog: &str) -> VersionDiff {
    let mut diff = VersionDiff::default();
    diff.absorb(changelog);
    diff
}

/// `## Security`, `### Bug Fixes:`, `Breaking Changes:` and `**Features**`
/// are all headings.
fn heading_text(line: &str) -> Option<&str> {
    if line.starts_with('#') {
        return Some(line.trim_start_matches('#').trim().trim_end_matches(':'));
    }
    if line.starts_with("**") && line.ends_with("**") && line.len() > 4 {
        return Some(line.trim_matches('*').trim().trim_end_matches(':'));
    }
    let bare = line.trim_end_matches(':');
    if line.ends_with(':') && !is_list_line(line) && classify_heading(bare).is_some() {
        return Some(bare);
    }
    None
}

fn classify_heading(heading: &str) -> Option<Category> {
    let lower = heading.to_ascii_lowercase();
    if lower.contains("breaking") {
        Some(Category::Breaking)
    } else if lower.contains("security") {
        Some(Category::Security)
    } else if lower.contains("performance") {
        Some(Category::Performance)
    } else if lower.contains("deprecat") {
        Some(Category::Deprecations)
    } else if lower.contains("bug") || lower.contains("fixes") {
        Some(Category::BugFixes)
    } else if lower.contains("feature") {
        Some(Category::Features)
    } else if lower.contains("doc") {
        Some(Category::Documentation)
    } else {
        None
    }
}

fn is_list_line(line: &str) -> bool {
    list_entry(line).is_some()
}

/// Strip a list bullet (`-`, `*`, `+`, `1.`) from `line`.
fn list_entry(line: &str) -> Option<&str> {
    for bullet in ["- ", "* ", "+ "] {
        if let Some(rest) = line.strip_prefix(bullet) {
            let rest = rest.trim();
            return (!rest.is_empty()).then_some(rest);
        }
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        if let Some(rest) = line[digits..].strip_prefix(". ") {
            let rest = rest.trim();
            return (!rest.is_empty()).then_some(rest);
        }
    }
    None
}

/// Conventional-commit prefixes: `feat:`, `fix(scope):`, `perf!:`, ...
fn classify_prefix(entry: &str) -> Option<Category> {
    let lower = entry.to_ascii_lowercase();
    if lower.starts_with("breaking change:") || lower.starts_with("breaking:") {
        return Some(Category::Breaking);
    }
    let (kind, _) = lower.split_once(':')?;
    let kind = kind.trim_end_matches('!');
    let kind = kind.split_once('(').map(|(head, _)| head).unwrap_or(kind);
    match kind {
        "feat" | "feature" => Some(Category::Features),
        "fix" | "bugfix" => Some(Category::BugFixes),
        "perf" => Some(Category::Performance),
        "docs" | "doc" => Some(Category::Documentation),
        _ => None,
    }
}

/// Builds categorised diffs from release feed data.
pub struct ReleaseDiffGenerator {
    feed: Arc<ReleaseFeedClient>,
}

impl ReleaseDiffGenerator {
    pub fn new(feed: Arc<ReleaseFeedClient>) -> Self {
        Self { feed }
    }

    /// Diff between two releases, categorising the target release's changelog.
    pub async fn generate_diff(&self, from: &str, to: &str) -> Result<VersionDiff> {
        let from_release = self.resolve(from).await?;
        let to_release = self.resolve(to).await?;

        let mut diff = categorize_changelog(&to_release.changelog);
        diff.update_type = UpdateType::between(&from_release.version, &to_release.version);
        diff.from_version = from_release.version;
        diff.to_version = to_release.version;
        diff.full_changelog = to_release.changelog;
        diff.release_notes = to_release.release_notes;
        Ok(diff)
    }

    /// Diff aggregated across every release in `(from, to]`.
    pub async fn generate_cumulative_diff(&self, from: &str, to: &str) -> Result<VersionDiff> {
        let releases = self.feed.get_releases_between(from, to).await?;
        let Some(newest) = releases.first() else {
            return Err(UpdateError::NoReleasesFound {
                from: from.to_string(),
                to: to.to_string(),
            });
        };

        let mut diff = VersionDiff {
            from_version: strip_tag_prefix(from, self.feed.tag_prefix()).to_string(),
            to_version: newest.version.clone(),
            release_notes: newest.release_notes.clone(),
            ..VersionDiff::default()
        };
        diff.update_type = UpdateType::between(&diff.from_version, &diff.to_version);

        let mut sections = Vec::with_capacity(releases.len());
        for release in &releases {
            diff.absorb(&release.changelog);
            sections.push(format!("## {}\n\n{}", release.tag_name, release.changelog.trim()));
        }
        diff.full_changelog = sections.join("\n\n");
        Ok(diff)
    }

    async fn resolve(&self, version: &str) -> Result<ReleaseInfo> {
        self.feed
            .get_release_by_version(version)
            .await
            .ok_or_else(|| UpdateError::NotFound(format!("release {version} could not be resolved")))
    }
}

/// Human-readable digest; each category shows at most five entries.
pub fn generate_summary(diff: &VersionDiff) -> String {
    let mut out = String::new();
    let kind = diff
        .update_type
        .map(|kind| format!(" ({kind} update)"))
        .unwrap_or_default();
    let _ = writeln!(out, "Changes from {} to {}{kind}", diff.from_version, diff.to_version);

    let mut empty = true;
    for (title, entries) in diff.categories() {
        if entries.is_empty() {
            continue;
        }
        empty = false;
        let _ = writeln!(out, "\n{title} ({}):", entries.len());
        for entry in entries.iter().take(SUMMARY_LIMIT) {
            let _ = writeln!(out, "  - {entry}");
        }
        if entries.len() > SUMMARY_LIMIT {
            let _ = writeln!(out, "  ...and {} more", entries.len() - SUMMARY_LIMIT);
        }
    }
    if empty {
        let _ = writeln!(out, "\nNo categorised changes.");
    }

    let _ = write!(out, "\nRecommended action: {:?}", get_recommended_action(diff));
    out
}

pub fn requires_user_action(diff: &VersionDiff) -> bool {
    !diff.breaking_changes.is_empty()
}

pub fn has_security_fixes(diff: &VersionDiff) -> bool {
    !diff.security_fixes.is_empty()
}

/// Security fixes outrank breaking changes.
pub fn get_recommended_action(diff: &VersionDiff) -> RecommendedAction {
    if has_security_fixes(diff) {
        RecommendedAction::Required
    } else if requires_user_action(diff) {
        RecommendedAction::Recommended
    } else {
        RecommendedAction::Optional
    }
}
