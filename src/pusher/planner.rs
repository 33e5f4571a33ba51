//! Incremental sync: hash what the device holds, upload what the remote lacks

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use super::device::DeviceSource;
use super::remote::{RemoteCatalog, UploadOutcome};
use crate::error::Error;
use crate::ingest::addresser::{self, ContentId};

/// Device filename to content id.
///
/// Filled lazily as files are first seen; entries are never evicted while the
/// pusher runs, so each file is hashed at most once.
#[derive(Debug, Default)]
pub struct IdCache {
    entries: BTreeMap<String, ContentId>,
}

impl IdCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, filename: &str) -> Option<&ContentId> {
        self.entries.get(filename)
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.entries.contains_key(filename)
    }

    pub fn insert(&mut self, filename: String, id: ContentId) {
        self.entries.insert(filename, id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every filename holding each distinct content id, in filename order
    fn by_id(&self) -> HashMap<&ContentId, Vec<&str>> {
        let mut ids: HashMap<&ContentId, Vec<&str>> = HashMap::new();
        for (filename, id) in &self.entries {
            ids.entry(id).or_default().push(filename.as_str());
        }
        ids
    }
}

/// What one cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub device_available: bool,
    pub hashed: usize,
    pub fetch_failures: usize,
    pub candidates: usize,
    pub uploaded: usize,
    pub already_present: usize,
    pub upload_failures: usize,
}

pub struct SyncPlanner<D, R> {
    device: D,
    remote: R,
    cache: IdCache,
}

impl<D: DeviceSource, R: RemoteCatalog> SyncPlanner<D, R> {
    pub fn new(device: D, remote: R) -> Self {
        Self {
            device,
            remote,
            cache: IdCache::new(),
        }
    }

    pub fn cache(&self) -> &IdCache {
        &self.cache
    }

    /// Run one sync cycle. Never fails: every error is logged and counted.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        let filenames = match self.device.list_filenames().await {
            Ok(filenames) => filenames,
            Err(Error::DeviceUnavailable) => {
                tracing::debug!("device unavailable, skipping cycle");
                return report;
            }
            Err(e) => {
                tracing::warn!(error = %e, "unable to list device files, skipping cycle");
                return report;
            }
        };
        report.device_available = true;

        self.refresh_cache(&filenames, &mut report).await;

        let known = match self.remote.list_known_ids().await {
            Ok(known) => known,
            Err(e) => {
                tracing::warn!(error = %e, "unable to list remote photos, skipping uploads");
                return report;
            }
        };

        let candidates: Vec<(ContentId, Vec<String>)> = self
            .cache
            .by_id()
            .into_iter()
            .filter(|(id, _)| !known.contains(*id))
            .map(|(id, filenames)| {
                (id.clone(), filenames.into_iter().map(String::from).collect())
            })
            .collect();
        report.candidates = candidates.len();

        for (id, filenames) in candidates {
            self.push(&id, &filenames, &mut report).await;
        }

        tracing::info!(
            hashed = report.hashed,
            candidates = report.candidates,
            uploaded = report.uploaded,
            already_present = report.already_present,
            failures = report.fetch_failures + report.upload_failures,
            "sync cycle complete"
        );
        report
    }

    /// Hash every listed file not seen before
    async fn refresh_cache(&mut self, filenames: &[String], report: &mut CycleReport) {
        for filename in filenames {
            if self.cache.contains(filename) {
                continue;
            }

            let id = match self.device.fetch(filename).await {
                Ok(bytes) => addresser::digest(&bytes),
                Err(e) => Err(e),
            };

            match id {
                Ok(id) => {
                    tracing::debug!(%filename, %id, "hashed device file");
                    self.cache.insert(filename.clone(), id);
                    report.hashed += 1;
                }
                Err(e) => {
                    tracing::warn!(%filename, error = %e, "unable to hash device file");
                    report.fetch_failures += 1;
                }
            }
        }
    }

    /// Upload one content id, reading it from the first copy that can be read
    async fn push(&self, id: &ContentId, filenames: &[String], report: &mut CycleReport) {
        let mut source = None;
        for filename in filenames {
            match self.device.fetch(filename).await {
                Ok(bytes) => {
                    source = Some((filename, bytes));
                    break;
                }
                Err(e) => {
                    tracing::warn!(%filename, error = %e, "unable to read file for upload");
                }
            }
        }
        let Some((filename, bytes)) = source else {
            report.upload_failures += 1;
            return;
        };

        match self.remote.upload(bytes).await {
            Ok(UploadOutcome::Uploaded { id: remote_id, status }) => {
                if remote_id != *id {
                    tracing::warn!(%filename, local = %id, remote = %remote_id, "remote assigned a different id");
                }
                tracing::info!(%filename, %id, %status, "uploaded photo");
                report.uploaded += 1;
            }
            Ok(UploadOutcome::AlreadyExists) => {
                tracing::debug!(%filename, %id, "remote already has photo");
                report.already_present += 1;
            }
            Err(e) => {
                tracing::warn!(%filename, %id, error = %e, "upload failed");
                report.upload_failures += 1;
            }
        }
    }

    /// Run cycles on a fixed cadence until `shutdown` resolves.
    ///
    /// Cycles run one after another on this task; a tick that comes due while
    /// a cycle is still running is skipped rather than queued.
    pub async fn run(mut self, every: Duration, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        tracing::info!(interval = ?every, "pusher started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
            }
        }
        tracing::info!("pusher stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use mockall::predicate::eq;

    use super::*;
    use crate::error::Result;
    use crate::pusher::device::MockDeviceSource;
    use crate::state::data::Status;

    fn id_set<I: IntoIterator<Item = ContentId>>(ids: I) -> HashSet<ContentId> {
        ids.into_iter().collect()
    }

    /// In-memory remote that behaves like the server's catalog
    #[derive(Default)]
    struct FakeRemote {
        known: Mutex<HashSet<ContentId>>,
        uploads: Mutex<Vec<ContentId>>,
        listing_fails: bool,
        upload_fails: bool,
    }

    impl FakeRemote {
        fn holding(ids: &[ContentId]) -> Self {
            Self {
                known: Mutex::new(id_set(ids.iter().cloned())),
                ..Default::default()
            }
        }

        fn uploads(&self) -> Vec<ContentId> {
            self.uploads.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteCatalog for FakeRemote {
        async fn list_known_ids(&self) -> Result<HashSet<ContentId>> {
            if self.listing_fails {
                return Err(Error::Transport("unexpected status code: 503".into()));
            }
            Ok(self.known.lock().unwrap().clone())
        }

        async fn upload(&self, photo: Vec<u8>) -> Result<UploadOutcome> {
            if self.upload_fails {
                return Err(Error::Transport("unexpected status code: 500".into()));
            }
            let id = ContentId::of(&photo)?;
            self.uploads.lock().unwrap().push(id.clone());
            if !self.known.lock().unwrap().insert(id.clone()) {
                return Ok(UploadOutcome::AlreadyExists);
            }
            Ok(UploadOutcome::Uploaded {
                id,
                status: Status::Processing,
            })
        }
    }

    /// A device whose files are `name -> contents`
    fn device(files: &[(&str, &str)]) -> MockDeviceSource {
        let names: Vec<String> = files.iter().map(|(n, _)| n.to_string()).collect();
        let contents: HashMap<String, Vec<u8>> = files
            .iter()
            .map(|(n, c)| (n.to_string(), c.as_bytes().to_vec()))
            .collect();

        let mut device = MockDeviceSource::new();
        device
            .expect_list_filenames()
            .returning(move || Ok(names.clone()));
        device.expect_fetch().returning(move |name| {
            contents.get(name).cloned().ok_or_else(|| Error::DeviceIo {
                filename: name.to_string(),
                reason: "no such file".into(),
            })
        });
        device
    }

    fn cid(content: &str) -> ContentId {
        ContentId::of(content.as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn test_uploads_only_the_difference() {
        let device = device(&[("a.jpg", "hello"), ("b.jpg", "there"), ("c.jpg", "haha")]);
        let remote = FakeRemote::holding(&[cid("hello"), cid("unrelated")]);
        let mut planner = SyncPlanner::new(device, remote);

        let report = planner.run_cycle().await;

        assert!(report.device_available);
        assert_eq!(report.hashed, 3);
        assert_eq!(report.candidates, 2);
        assert_eq!(report.uploaded, 2);
        let uploads = id_set(planner.remote.uploads());
        assert_eq!(uploads, id_set([cid("there"), cid("haha")]));

        // Second cycle: nothing new anywhere
        let report = planner.run_cycle().await;
        assert_eq!(report.hashed, 0);
        assert_eq!(report.candidates, 0);
        assert_eq!(planner.remote.uploads().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_contents_upload_once() {
        let device = device(&[("a.jpg", "same"), ("copy/a.jpg", "same")]);
        let mut planner = SyncPlanner::new(device, FakeRemote::default());

        let report = planner.run_cycle().await;

        assert_eq!(report.hashed, 2);
        assert_eq!(report.candidates, 1);
        assert_eq!(planner.remote.uploads(), vec![cid("same")]);
    }

    #[tokio::test]
    async fn test_already_exists_is_not_a_failure() {
        let device = device(&[("a.jpg", "hello")]);
        // Listing is stale: the remote has the photo but did not report it
        let remote = FakeRemote::default();
        remote.known.lock().unwrap().insert(cid("hello"));
        let remote = StaleListing(remote);
        let mut planner = SyncPlanner::new(device, remote);

        let report = planner.run_cycle().await;

        assert_eq!(report.candidates, 1);
        assert_eq!(report.uploaded, 0);
        assert_eq!(report.already_present, 1);
        assert_eq!(report.upload_failures, 0);
    }

    /// Reports an empty catalog while still rejecting known uploads
    struct StaleListing(FakeRemote);

    #[async_trait]
    impl RemoteCatalog for StaleListing {
        async fn list_known_ids(&self) -> Result<HashSet<ContentId>> {
            Ok(HashSet::new())
        }

        async fn upload(&self, photo: Vec<u8>) -> Result<UploadOutcome> {
            self.0.upload(photo).await
        }
    }

    #[tokio::test]
    async fn test_unavailable_device_skips_cycle() {
        let mut device = MockDeviceSource::new();
        device
            .expect_list_filenames()
            .returning(|| Err(Error::DeviceUnavailable));
        device.expect_fetch().never();
        let mut planner = SyncPlanner::new(device, FakeRemote::default());

        let report = planner.run_cycle().await;

        assert_eq!(report, CycleReport::default());
        assert!(planner.cache().is_empty());
        assert!(planner.remote.uploads().is_empty());
    }

    #[tokio::test]
    async fn test_failed_fetch_is_retried_next_cycle() {
        let mut device = MockDeviceSource::new();
        device
            .expect_list_filenames()
            .returning(|| Ok(vec!["a.jpg".to_string(), "b.jpg".to_string()]));
        device
            .expect_fetch()
            .with(eq("a.jpg"))
            .returning(|_| Ok(b"hello".to_vec()));
        // b.jpg fails once, then reads fine
        let mut attempts = 0;
        device.expect_fetch().with(eq("b.jpg")).returning(move |name| {
            attempts += 1;
            if attempts == 1 {
                Err(Error::DeviceIo {
                    filename: name.to_string(),
                    reason: "file not transferred".into(),
                })
            } else {
                Ok(b"there".to_vec())
            }
        });
        let mut planner = SyncPlanner::new(device, FakeRemote::default());

        let first = planner.run_cycle().await;
        assert_eq!(first.hashed, 1);
        assert_eq!(first.fetch_failures, 1);
        assert_eq!(first.uploaded, 1);
        assert!(!planner.cache().contains("b.jpg"));

        let second = planner.run_cycle().await;
        assert_eq!(second.hashed, 1);
        assert_eq!(second.fetch_failures, 0);
        assert_eq!(second.uploaded, 1);
        assert_eq!(planner.cache().get("b.jpg"), Some(&cid("there")));
    }

    #[tokio::test]
    async fn test_listing_failure_means_no_uploads() {
        let device = device(&[("a.jpg", "hello")]);
        let remote = FakeRemote {
            listing_fails: true,
            ..Default::default()
        };
        let mut planner = SyncPlanner::new(device, remote);

        let report = planner.run_cycle().await;

        assert_eq!(report.hashed, 1);
        assert_eq!(report.candidates, 0);
        assert!(planner.remote.uploads().is_empty());
        // Hashing work is kept for the next cycle
        assert_eq!(planner.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_upload_failures_are_counted_and_retried() {
        let device = device(&[("a.jpg", "hello"), ("b.jpg", "there")]);
        let remote = FakeRemote {
            upload_fails: true,
            ..Default::default()
        };
        let mut planner = SyncPlanner::new(device, remote);

        let report = planner.run_cycle().await;
        assert_eq!(report.candidates, 2);
        assert_eq!(report.upload_failures, 2);

        let report = planner.run_cycle().await;
        assert_eq!(report.candidates, 2);
    }

    #[tokio::test]
    async fn test_cached_files_are_not_fetched_for_hashing() {
        let mut device = MockDeviceSource::new();
        device
            .expect_list_filenames()
            .returning(|| Ok(vec!["a.jpg".to_string()]));
        // One fetch to hash, one to upload; nothing on the second cycle
        device
            .expect_fetch()
            .times(2)
            .returning(|_| Ok(b"hello".to_vec()));
        let mut planner = SyncPlanner::new(device, FakeRemote::default());

        planner.run_cycle().await;
        let report = planner.run_cycle().await;

        assert_eq!(report.hashed, 0);
        assert_eq!(report.candidates, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let mut device = MockDeviceSource::new();
        device
            .expect_list_filenames()
            .returning(|| Err(Error::DeviceUnavailable));
        let planner = SyncPlanner::new(device, FakeRemote::default());

        let shutdown = tokio::time::sleep(Duration::from_secs(35));
        tokio::time::timeout(
            Duration::from_secs(60),
            planner.run(Duration::from_secs(10), shutdown),
        )
        .await
        .expect("run should return once shutdown resolves");
    }

    #[tokio::test]
    async fn test_unreadable_copy_falls_back_to_another() {
        let mut device = MockDeviceSource::new();
        device
            .expect_list_filenames()
            .returning(|| Ok(vec!["a.jpg".to_string(), "b.jpg".to_string()]));
        // a.jpg reads once for hashing, then disappears before the upload
        let mut reads = 0;
        device.expect_fetch().with(eq("a.jpg")).returning(move |name| {
            reads += 1;
            if reads == 1 {
                Ok(b"same".to_vec())
            } else {
                Err(Error::DeviceIo {
                    filename: name.to_string(),
                    reason: "file not transferred".into(),
                })
            }
        });
        device
            .expect_fetch()
            .with(eq("b.jpg"))
            .returning(|_| Ok(b"same".to_vec()));
        let mut planner = SyncPlanner::new(device, FakeRemote::default());

        let report = planner.run_cycle().await;

        assert_eq!(report.candidates, 1);
        assert_eq!(report.uploaded, 1);
        assert_eq!(report.upload_failures, 0);
        assert_eq!(planner.remote.uploads(), vec![cid("same")]);
    }
}
