/*============================================================
  Synavera Project: Syn-Syu
  Module: synsyu_update::feed
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1
  ------------------------------------------------------------
  Purpose:
    Query the hosted release registry for published Syn-Syu
    releases, normalise their metadata, and decide whether an
    update is available for the running installation.

  Security / Safety Notes:
    Performs read-only HTTPS requests to the public release
    API. No credentials are transmitted. Release artifacts are
    not signature-verified.

  Dependencies:
    reqwest for HTTP, serde for response parsing, urlencoding
    for tag paths, semver (via crate::version) for ordering.

  Operational Scope:
    Leaf component: consumed by the diff generator and the
    update manager.

  Revision History:
    2026-10-18 COD  Rebuilt AUR client as release feed client.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Defensive retry logic with exponential backoff
    - Structured response parsing with explicit error paths
    - Fail-safe update checks under upstream outage
============================================================*/

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use urlencoding::encode;

use crate::config::FeedConfig;
use crate::error::{Result, UpdateError};
use crate::version::{compare_versions, strip_tag_prefix, UpdateType};

const ACCEPT_RELEASE_JSON: &str = "application/vnd.github.v3+json";
const LIST_PAGE_SIZE: usize = 100;

/// A downloadable file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseAsset {
    pub name: String,
    pub url: String,
    pub size: u64,
    pub content_type: String,
}

/// A published release, normalised from registry JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseInfo {
    pub version: String,
    pub tag_name: String,
    pub published_at: DateTime<Utc>,
    pub changelog: String,
    pub release_notes: String,
    pub download_url: String,
    pub assets: Vec<ReleaseAsset>,
    pub prerelease: bool,
}

/// Outcome of comparing the running version against the feed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCheckResult {
    pub has_update: bool,
    pub current_version: String,
    pub latest_version: String,
    pub release_info: Option<ReleaseInfo>,
    pub update_type: Option<UpdateType>,
}

/// Raw HTTP answer handed back by a transport.
#[derive(Debug, Clone)]
pub struct FeedResponse {
    pub status: u16,
    pub body: String,
}

/// Seam for issuing registry GET requests.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// GET `url`; connection-level failures are `Upstream` errors, HTTP
    /// statuses are returned as-is.
    async fn get(&self, url: &str) -> Result<FeedResponse>;
}

/// reqwest-backed transport with retry on transient statuses.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    max_retries: usize,
}

impl HttpTransport {
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout.max(1)))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|err| UpdateError::Upstream(format!("Failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            max_retries: config.max_retries.max(1),
        })
    }
}

#[async_trait]
impl FeedTransport for HttpTransport {
    async fn get(&self, url: &str) -> Result<FeedResponse> {
        let mut attempt = 0;
        loop {
            let response = self
                .client
                .get(url)
                .header(ACCEPT, ACCEPT_RELEASE_JSON)
                .send()
                .await
                .map_err(|err| UpdateError::Upstream(format!("Request to {url} failed: {err}")))?;
            let status = response.status();

            attempt += 1;
            if let Some(backoff) = retry_delay(status, attempt, self.max_retries) {
                sleep(backoff).await;
                continue;
            }

            let body = response.text().await.map_err(|err| {
                UpdateError::Upstream(format!("Failed to read response from {url}: {err}"))
            })?;
            return Ok(FeedResponse {
                status: status.as_u16(),
                body,
            });
        }
    }
}

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Backoff before the next attempt, or `None` when `status` is final or
/// `attempt` (1-based) has used up the retry budget.
fn retry_delay(status: StatusCode, attempt: usize, max_retries: usize) -> Option<Duration> {
    if !is_transient(status) || attempt >= max_retries {
        return None;
    }
    let exponent = (attempt as u32).min(8);
    Some(Duration::from_millis(200_u64.saturating_mul(1_u64 << exponent)))
}

/// Client for the hosted release registry.
pub struct ReleaseFeedClient {
    transport: Arc<dyn FeedTransport>,
    releases_url: String,
    tag_prefix: String,
    cache: Mutex<HashMap<String, ReleaseInfo>>,
}

impl ReleaseFeedClient {
    /// Construct a client talking HTTP to the configured registry.
    pub fn new(config: &FeedConfig) -> Result<Self> {
        Ok(Self::with_transport(
            config,
            Arc::new(HttpTransport::new(config)?),
        ))
    }

    pub fn with_transport(config: &FeedConfig, transport: Arc<dyn FeedTransport>) -> Self {
        Self {
            transport,
            releases_url: format!(
                "{}/repos/{}/{}/releases",
                config.api_base.trim_end_matches('/'),
                config.owner,
                config.repo
            ),
            tag_prefix: config.tag_prefix.clone(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn tag_prefix(&self) -> &str {
        &self.tag_prefix
    }

    /// Newest published release. Prereleases are only returned when
    /// `include_prerelease` is set.
    pub async fn get_latest_release(&self, include_prerelease: bool) -> Result<ReleaseInfo> {
        if include_prerelease {
            return self
                .get_all_releases(1)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| UpdateError::NotFound("feed has no releases".into()));
        }

        let url = format!("{}/latest", self.releases_url);
        let release = match self.fetch_release(&url).await? {
            Some(release) => release,
            None => return Err(UpdateError::NotFound("feed has no releases".into())),
        };
        if !release.prerelease {
            return Ok(release);
        }

        self.get_all_releases(LIST_PAGE_SIZE)
            .await?
            .into_iter()
            .find(|candidate| !candidate.prerelease)
            .ok_or_else(|| UpdateError::NotFound("feed has no stable releases".into()))
    }

    /// Release published under exactly `tag`; cached for the process lifetime.
    pub async fn get_release_by_tag(&self, tag: &str) -> Result<ReleaseInfo> {
        if let Some(hit) = self.cached(tag) {
            return Ok(hit);
        }
        let url = format!("{}/tags/{}", self.releases_url, encode(tag));
        self.fetch_release(&url)
            .await?
            .ok_or_else(|| UpdateError::NotFound(format!("no release tagged {tag}")))
    }

    /// Release for `version`, with or without the tag prefix. Never errors.
    pub async fn get_release_by_version(&self, version: &str) -> Option<ReleaseInfo> {
        let bare = strip_tag_prefix(version, &self.tag_prefix);
        let tag = format!("{}{}", self.tag_prefix, bare);
        self.get_release_by_tag(&tag).await.ok()
    }

    /// Up to `limit` non-draft releases, newest first.
    pub async fn get_all_releases(&self, limit: usize) -> Result<Vec<ReleaseInfo>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        // Registry order follows creation, not publication; fetch a full
        // page and order locally before bounding.
        let url = format!("{}?per_page={LIST_PAGE_SIZE}", self.releases_url);
        let response = self.transport.get(&url).await?;
        match response.status {
            200..=299 => {}
            404 => return Ok(Vec::new()),
            status => return Err(upstream_status(&url, status, &response.body)),
        }

        let raw: Vec<RawRelease> = serde_json::from_str(&response.body).map_err(|err| {
            UpdateError::Serialization(format!("Failed to decode release list: {err}"))
        })?;
        let mut releases = Vec::new();
        for entry in raw.into_iter().filter(|entry| !entry.draft) {
            let release = entry.into_release(&self.tag_prefix)?;
            self.remember(&release);
            releases.push(release);
        }
        releases.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        releases.truncate(limit);
        Ok(releases)
    }

    /// Releases with `from < version <= to`, newest first.
    pub async fn get_releases_between(&self, from: &str, to: &str) -> Result<Vec<ReleaseInfo>> {
        let mut releases: Vec<ReleaseInfo> = self
            .get_all_releases(LIST_PAGE_SIZE)
            .await?
            .into_iter()
            .filter(|release| {
                compare_versions(&release.version, from) == Some(Ordering::Greater)
                    && matches!(
                        compare_versions(&release.version, to),
                        Some(Ordering::Less | Ordering::Equal)
                    )
            })
            .collect();
        releases.sort_by(|a, b| {
            compare_versions(&b.version, &a.version).unwrap_or(Ordering::Equal)
        });
        Ok(releases)
    }

    /// Compare `current` with the newest release. Any failure reports
    /// "no update" so an unreachable feed never looks like an update.
    pub async fn check_for_update(
        &self,
        current: &str,
        include_prerelease: bool,
    ) -> UpdateCheckResult {
        let current = strip_tag_prefix(current, &self.tag_prefix).to_string();
        let no_update = |current: String| UpdateCheckResult {
            has_update: false,
            latest_version: current.clone(),
            current_version: current,
            release_info: None,
            update_type: None,
        };

        let latest = match self.get_latest_release(include_prerelease).await {
            Ok(release) => release,
            Err(_) => return no_update(current),
        };

        let newer = compare_versions(&latest.version, &current) == Some(Ordering::Greater);
        if !newer {
            return UpdateCheckResult {
                has_update: false,
                latest_version: latest.version.clone(),
                current_version: current,
                release_info: Some(latest),
                update_type: None,
            };
        }

        UpdateCheckResult {
            has_update: true,
            update_type: UpdateType::between(&current, &latest.version),
            latest_version: latest.version.clone(),
            current_version: current,
            release_info: Some(latest),
        }
    }

    /// Drop every cached release.
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    async fn fetch_release(&self, url: &str) -> Result<Option<ReleaseInfo>> {
        let response = self.transport.get(url).await?;
        match response.status {
            200..=299 => {}
            404 => return Ok(None),
            status => return Err(upstream_status(url, status, &response.body)),
        }
        let raw: RawRelease = serde_json::from_str(&response.body).map_err(|err| {
            UpdateError::Serialization(format!("Failed to decode release from {url}: {err}"))
        })?;
        let release = raw.into_release(&self.tag_prefix)?;
        self.remember(&release);
        Ok(Some(release))
    }

    fn cached(&self, tag: &str) -> Option<ReleaseInfo> {
        self.cache.lock().ok()?.get(tag).cloned()
    }

    fn remember(&self, release: &ReleaseInfo) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(release.tag_name.clone(), release.clone());
        }
    }
}

fn upstream_status(url: &str, status: u16, body: &str) -> UpdateError {
    let excerpt: String = body.chars().take(160).collect();
    UpdateError::Upstream(format!("{url} responded with status {status}: {excerpt}"))
}

#[derive(Debug, Deserialize)]
struct RawRelease {
    tag_name: String,
    #[serde(default)]
    name: Option<String>,
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    tarball_url: Option<String>,
    #[serde(default)]
    assets: Vec<RawAsset>,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    draft: bool,
}

#[derive(Debug, Deserialize)]
struct RawAsset {
    name: String,
    browser_download_url: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    content_type: Option<String>,
}

impl RawRelease {
    fn into_release(self, tag_prefix: &str) -> Result<ReleaseInfo> {
        let published_at = self.published_at.ok_or_else(|| {
            UpdateError::Serialization(format!("release {} has no publish date", self.tag_name))
        })?;
        let body = self.body.unwrap_or_default();
        let release_notes = match self.name.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => format!("{title}\n\n{body}"),
            _ => body.clone(),
        };
        Ok(ReleaseInfo {
            version: strip_tag_prefix(&self.tag_name, tag_prefix).to_string(),
            published_at,
            changelog: body,
            release_notes,
            download_url: self.tarball_url.unwrap_or_default(),
            assets: self
                .assets
                .into_iter()
                .map(|asset| ReleaseAsset {
                    name: asset.name,
                    url: asset.browser_download_url,
                    size: asset.size,
                    content_type: asset
                        .content_type
                        .unwrap_or_else(|| "application/octet-stream".into()),
                })
                .collect(),
            prerelease: self.prerelease,
            tag_name: self.tag_name,
        })
    }
}
