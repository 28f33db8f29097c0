//! Shared test helpers: a scripted download agent, a recording renamer and
//! a pipeline wired to both over a temporary database.

use crate::agent::{DownloadAgent, TransferInfo};
use crate::config::{Config, RetryConfig};
use crate::error::{AgentError, Error, Result};
use crate::renamer::Renamer;
use crate::types::{NewSubscription, ReleaseItem, Subscription};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

use super::Pipeline;

type ProbeResult = std::result::Result<Option<TransferInfo>, AgentError>;

/// Download agent whose answers are scripted per URL and per identifier
///
/// - `submit` answers `["uid-<url>"]` unless a script was set for the URL
/// - `probe` walks the identifier's script; the last entry repeats forever
///   and an unscripted identifier is "not found"
#[derive(Default)]
pub(crate) struct FakeAgent {
    pub unauthenticated: AtomicBool,
    pub login_fails: AtomicBool,
    pub panic_on_probe: AtomicBool,
    pub login_calls: AtomicUsize,
    pub submit_calls: AtomicUsize,
    submit_scripts: Mutex<HashMap<String, std::result::Result<Vec<String>, AgentError>>>,
    probe_scripts: Mutex<HashMap<String, VecDeque<ProbeResult>>>,
    probe_calls: Mutex<HashMap<String, usize>>,
}

impl FakeAgent {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_submit(&self, url: &str, result: std::result::Result<Vec<String>, AgentError>) {
        self.submit_scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), result);
    }

    pub fn script_probe(&self, uid: &str, results: Vec<ProbeResult>) {
        self.probe_scripts
            .lock()
            .unwrap()
            .insert(uid.to_string(), results.into());
    }

    pub fn probe_calls_total(&self) -> usize {
        self.probe_calls.lock().unwrap().values().sum()
    }

    pub fn probe_count(&self, uid: &str) -> usize {
        self.probe_calls
            .lock()
            .unwrap()
            .get(uid)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl DownloadAgent for FakeAgent {
    async fn submit(
        &self,
        item: &ReleaseItem,
        _subscription: &Subscription,
    ) -> std::result::Result<Vec<String>, AgentError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        self.submit_scripts
            .lock()
            .unwrap()
            .get(&item.url)
            .cloned()
            .unwrap_or_else(|| Ok(vec![format!("uid-{}", item.url)]))
    }

    async fn probe(&self, uid: &str) -> ProbeResult {
        *self
            .probe_calls
            .lock()
            .unwrap()
            .entry(uid.to_string())
            .or_default() += 1;
        if self.panic_on_probe.load(Ordering::SeqCst) {
            panic!("agent client bug");
        }

        let mut scripts = self.probe_scripts.lock().unwrap();
        let Some(script) = scripts.get_mut(uid) else {
            return Ok(None);
        };
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().cloned().unwrap_or(Ok(None))
        }
    }

    async fn is_authenticated(&self) -> bool {
        !self.unauthenticated.load(Ordering::SeqCst)
    }

    async fn login(&self) -> std::result::Result<(), AgentError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if self.login_fails.load(Ordering::SeqCst) {
            return Err(AgentError::Unauthorized);
        }
        self.unauthenticated.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Renamer that records every call and can be told to fail
#[derive(Default)]
pub(crate) struct RecordingRenamer {
    pub calls: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

impl RecordingRenamer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Renamer for RecordingRenamer {
    async fn rename(&self, item: &ReleaseItem, _subscription: &Subscription) -> Result<()> {
        self.calls.lock().unwrap().push(item.url.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Rename("target exists".into()));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Transfer still running with the given ETA
pub(crate) fn in_progress(eta: Option<i64>) -> ProbeResult {
    Ok(Some(TransferInfo {
        eta,
        save_path: PathBuf::from("/downloads/incoming"),
        completed_at: 0,
    }))
}

/// Finished transfer
pub(crate) fn complete() -> ProbeResult {
    Ok(Some(TransferInfo {
        eta: Some(0),
        save_path: PathBuf::from("/downloads/incoming"),
        completed_at: 1_700_000_000,
    }))
}

/// Config with millisecond timings over a database in `dir`
pub(crate) fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.join("test.db");
    config.submission.interval = Duration::from_millis(20);
    config.submission.login_retry_interval = Duration::from_millis(20);
    config.hash_check.grace_period = Duration::from_millis(1);
    config.hash_check.probe_retry = RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 1.0,
        jitter: false,
    };
    config.progress.start_delay = Duration::from_millis(1);
    config.progress.fallback_interval = Duration::from_millis(20);
    // long enough that only the run at start happens during a test
    config.rename.sweep_interval = Duration::from_secs(3600);
    config
}

/// Build a pipeline over a fresh temporary database
pub(crate) async fn create_test_pipeline(
    agent: Arc<FakeAgent>,
    renamer: Arc<RecordingRenamer>,
) -> (Pipeline, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(test_config(temp_dir.path()), agent, renamer)
        .await
        .unwrap();
    (pipeline, temp_dir)
}

/// Store a subscription and read it back
pub(crate) async fn insert_subscription(pipeline: &Pipeline, title: &str) -> Subscription {
    let id = pipeline
        .db
        .insert_subscription(&NewSubscription {
            official_title: title.to_string(),
            title_raw: title.to_string(),
            season: 1,
            rss_link: format!("https://mikan.example/rss/{title}"),
            ..Default::default()
        })
        .await
        .unwrap();
    pipeline.db.get_subscription(id).await.unwrap().unwrap()
}

/// Release item named after `title` with source `url`
pub(crate) fn release(title: &str, url: &str) -> ReleaseItem {
    ReleaseItem::new(format!("[Sub] {title} - 01 [1080p]"), url)
}

/// Poll `condition` every 5 ms until it holds or `timeout` elapses
pub(crate) async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
