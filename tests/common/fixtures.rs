//! In-memory stand-ins for the download agent and the renamer

use async_trait::async_trait;
use bangumi_dl::{
    AgentError, Config, DownloadAgent, NewSubscription, Pipeline, ReleaseItem, Renamer, Result,
    Subscription, TransferInfo,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Agent that tracks every submission under `btih-<n>` and reports each
/// transfer complete after a fixed number of probes
pub struct SimulatedAgent {
    probes_until_complete: usize,
    transfers: Mutex<HashMap<String, usize>>,
    next_hash: Mutex<usize>,
}

impl SimulatedAgent {
    pub fn new(probes_until_complete: usize) -> Arc<Self> {
        Arc::new(Self {
            probes_until_complete,
            transfers: Mutex::new(HashMap::new()),
            next_hash: Mutex::new(0),
        })
    }

    /// Forget a transfer, as if the user removed it in the agent
    pub fn remove(&self, uid: &str) {
        self.transfers.lock().unwrap().remove(uid);
    }
}

#[async_trait]
impl DownloadAgent for SimulatedAgent {
    async fn submit(
        &self,
        _item: &ReleaseItem,
        _subscription: &Subscription,
    ) -> std::result::Result<Vec<String>, AgentError> {
        let mut next = self.next_hash.lock().unwrap();
        *next += 1;
        let uid = format!("btih-{next}");
        self.transfers.lock().unwrap().insert(uid.clone(), 0);
        // the v1 hash is never tracked; only the second candidate resolves
        Ok(vec![format!("v1-{next}"), uid])
    }

    async fn probe(&self, uid: &str) -> std::result::Result<Option<TransferInfo>, AgentError> {
        let mut transfers = self.transfers.lock().unwrap();
        let Some(probes) = transfers.get_mut(uid) else {
            return Ok(None);
        };
        *probes += 1;
        let complete = *probes > self.probes_until_complete;
        Ok(Some(TransferInfo {
            eta: None,
            save_path: PathBuf::from("/downloads"),
            completed_at: if complete { 1_700_000_000 } else { 0 },
        }))
    }

    async fn is_authenticated(&self) -> bool {
        true
    }

    async fn login(&self) -> std::result::Result<(), AgentError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

/// Renamer that records the URLs it was asked to rename
#[derive(Default)]
pub struct RecordingRenamer {
    pub renamed: Mutex<Vec<String>>,
}

#[async_trait]
impl Renamer for RecordingRenamer {
    async fn rename(&self, item: &ReleaseItem, _subscription: &Subscription) -> Result<()> {
        self.renamed.lock().unwrap().push(item.url.clone());
        Ok(())
    }
}

/// Config with millisecond timings over a database in `dir`
pub fn fast_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.join("bangumi-dl.db");
    config.submission.interval = Duration::from_millis(20);
    config.hash_check.grace_period = Duration::from_millis(1);
    config.hash_check.probe_retry.initial_delay = Duration::from_millis(5);
    config.hash_check.probe_retry.max_delay = Duration::from_millis(5);
    config.progress.start_delay = Duration::from_millis(1);
    config.progress.fallback_interval = Duration::from_millis(10);
    config
}

/// Pipeline over a fresh temporary database
pub async fn create_pipeline(
    agent: Arc<SimulatedAgent>,
    renamer: Arc<RecordingRenamer>,
) -> (Pipeline, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(fast_config(temp_dir.path()), agent, renamer)
        .await
        .unwrap();
    (pipeline, temp_dir)
}

/// Store an enabled subscription for `title`
pub async fn add_subscription(pipeline: &Pipeline, title: &str) -> Subscription {
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
