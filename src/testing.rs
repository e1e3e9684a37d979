//! Scripted doubles for the subprocess and HTTP seams.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use crate::config::{FeedConfig, UpdaterConfig};
use crate::error::{Result, UpdateError};
use crate::feed::{FeedResponse, FeedTransport};
use crate::logger::Logger;
use crate::process::{CommandOutput, CommandRunner};

type Handler = dyn Fn(&str, &[String]) -> Result<CommandOutput> + Send + Sync;

/// One recorded subprocess invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

pub struct RecordingRunner {
    handler: Box<Handler>,
    calls: Mutex<Vec<Invocation>>,
}

impl RecordingRunner {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &[String]) -> Result<CommandOutput> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(|_, _| Ok(CommandOutput::default()))
    }

    /// Runner emulating npm, tar, and the installed binary.
    pub fn with_tools(tools: Arc<FakeTools>) -> Self {
        Self::new(move |program, args| tools.handle(program, args))
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Versions passed to `install -g pkg@<version>`, in call order.
    pub fn installs(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.args.first().map(String::as_str) == Some("install"))
            .filter_map(|call| {
                call.args
                    .last()
                    .and_then(|spec| spec.rsplit_once('@'))
                    .map(|(_, version)| version.to_string())
            })
            .collect()
    }

    /// Archives passed to `tar -xzf`, in call order.
    pub fn extractions(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.args.first().map(String::as_str) == Some("-xzf"))
            .filter_map(|call| call.args.get(1).cloned())
            .collect()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        self.calls.lock().expect("calls lock").push(Invocation {
            program: program.to_string(),
            args: args.to_vec(),
        });
        (self.handler)(program, args)
    }
}

/// Mutable state behind the emulated toolchain.
#[derive(Default)]
pub struct FakeTools {
    pub installed: Mutex<String>,
    /// Version reported after any install, regardless of the requested one.
    pub reported_after_install: Mutex<Option<String>>,
    pub fail_compress: AtomicBool,
    pub fail_extract: AtomicBool,
    pub fail_install: AtomicBool,
    pub binary_missing: AtomicBool,
    pub binary_broken: AtomicBool,
}

impl FakeTools {
    pub fn installed(version: &str) -> Arc<Self> {
        let tools = Self::default();
        *tools.installed.lock().expect("installed lock") = version.to_string();
        Arc::new(tools)
    }

    pub fn set(flag: &AtomicBool) {
        flag.store(true, Ordering::SeqCst);
    }

    fn handle(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        match args.first().map(String::as_str) {
            Some("-czf") => {
                if self.fail_compress.load(Ordering::SeqCst) {
                    return Ok(failed("tar: cannot stat install dir"));
                }
                let archive = args.get(1).expect("archive arg");
                std::fs::write(archive, format!("archive of {}", args.join(" ")))?;
                Ok(CommandOutput::default())
            }
            Some("-xzf") => {
                if self.fail_extract.load(Ordering::SeqCst) {
                    return Ok(failed("tar: unexpected end of file"));
                }
                Ok(CommandOutput::default())
            }
            Some("install") => {
                if self.fail_install.load(Ordering::SeqCst) {
                    return Ok(failed("npm ERR! code E404"));
                }
                let version = args
                    .last()
                    .and_then(|spec| spec.rsplit_once('@'))
                    .map(|(_, version)| version.to_string())
                    .unwrap_or_default();
                let reported = self
                    .reported_after_install
                    .lock()
                    .expect("reported lock")
                    .clone()
                    .unwrap_or(version);
                *self.installed.lock().expect("installed lock") = reported;
                Ok(CommandOutput::default())
            }
            Some("--version") => {
                if self.binary_missing.load(Ordering::SeqCst) {
                    return Err(UpdateError::CommandMissing {
                        command: program.to_string(),
                    });
                }
                if self.binary_broken.load(Ordering::SeqCst) {
                    return Ok(failed("segmentation fault"));
                }
                Ok(CommandOutput {
                    status: 0,
                    stdout: format!("v{}", self.installed.lock().expect("installed lock")),
                    stderr: String::new(),
                })
            }
            _ => Ok(CommandOutput::default()),
        }
    }
}

fn failed(stderr: &str) -> CommandOutput {
    CommandOutput {
        status: 2,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

pub const FEED_BASE: &str = "https://feed.test";

pub fn feed_url(suffix: &str) -> String {
    format!("{FEED_BASE}/repos/acme/tool/releases{suffix}")
}

/// HTTP double keyed by exact URL; unknown URLs answer 404.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, FeedResponse>>,
    offline: AtomicBool,
    requests: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, url: impl Into<String>, status: u16, body: impl Into<String>) {
        self.routes.lock().expect("routes lock").insert(
            url.into(),
            FeedResponse {
                status,
                body: body.into(),
            },
        );
    }

    /// Publish `releases` (newest first) on the list, latest, and tag routes.
    pub fn publish(&self, releases: &[serde_json::Value]) {
        self.route(
            feed_url("?per_page=100"),
            200,
            serde_json::Value::Array(releases.to_vec()).to_string(),
        );
        if let Some(latest) = releases
            .iter()
            .find(|release| release["prerelease"] == json!(false))
        {
            self.route(feed_url("/latest"), 200, latest.to_string());
        }
        for release in releases {
            let tag = release["tag_name"].as_str().unwrap_or_default();
            self.route(feed_url(&format!("/tags/{tag}")), 200, release.to_string());
        }
    }

    pub fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl FeedTransport for ScriptedTransport {
    async fn get(&self, url: &str) -> Result<FeedResponse> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(url.to_string());
        if self.offline.load(Ordering::SeqCst) {
            return Err(UpdateError::Upstream(format!("request to {url} failed: offline")));
        }
        Ok(self
            .routes
            .lock()
            .expect("routes lock")
            .get(url)
            .cloned()
            .unwrap_or(FeedResponse {
                status: 404,
                body: r#"{"message":"Not Found"}"#.into(),
            }))
    }
}

/// Registry JSON for one release.
pub fn release_json(tag: &str, prerelease: bool, body: &str, published_at: &str) -> serde_json::Value {
    json!({
        "tag_name": tag,
        "name": format!("Release {tag}"),
        "published_at": published_at,
        "body": body,
        "tarball_url": format!("https://feed.test/tarball/{tag}"),
        "prerelease": prerelease,
        "draft": false,
        "assets": [{
            "name": "syn-syu.tgz",
            "browser_download_url": format!("https://feed.test/download/{tag}/syn-syu.tgz"),
            "size": 2048,
            "content_type": "application/gzip"
        }]
    })
}

pub fn quiet_logger() -> Arc<Logger> {
    Arc::new(Logger::silent())
}

pub fn touch(path: &Path) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent");
    }
    std::fs::write(path, b"").expect("touch");
}

/// Configuration rooted in `root`, with the install directory created and
/// the feed pointed at the scripted registry.
pub fn test_config(root: &Path) -> UpdaterConfig {
    let mut config = UpdaterConfig {
        home_dir: root.join("home"),
        install_dir: root.join("install"),
        feed: FeedConfig {
            api_base: FEED_BASE.into(),
            owner: "acme".into(),
            repo: "tool".into(),
            ..FeedConfig::default()
        },
        ..UpdaterConfig::default()
    };
    config.rollback.config_file = None;
    config.rollback.required_dirs = Vec::new();
    std::fs::create_dir_all(&config.install_dir).expect("install dir");
    config
}
