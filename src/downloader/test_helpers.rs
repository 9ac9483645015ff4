//! Shared test helpers for creating NovelDownloader instances in tests.

use crate::config::Config;
use crate::downloader::NovelDownloader;
use crate::error::FetchError;
use crate::library::{ChapterInfo, MemoryLibrary, NovelInfo};
use crate::source::SourceProvider;
use crate::types::{ChapterId, DownloadType, NovelId, QueueSnapshot};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{TempDir, tempdir};

/// Novel every test chapter belongs to
pub(crate) const NOVEL: NovelId = NovelId(1);

/// Number of chapters seeded into the test library
pub(crate) const CHAPTERS: i64 = 10;

/// One scripted response of [`ScriptedSource`]
#[derive(Clone, Debug)]
pub(crate) enum Reply {
    /// Return this body
    Body(String),
    /// Return this body after a delay
    Delayed(Duration, String),
    /// Transient network failure
    Network,
    /// Chapter gone at the source
    NotFound,
    /// Never return
    Hang,
}

/// Source provider that replays per-chapter scripts and records call counts
#[derive(Default)]
pub(crate) struct ScriptedSource {
    scripts: Mutex<HashMap<ChapterId, VecDeque<Reply>>>,
    fallback: Mutex<Option<Reply>>,
    calls: Mutex<HashMap<ChapterId, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedSource {
    /// Queue replies for a chapter; once used up the chapter falls back to the default
    pub(crate) fn script(&self, chapter: ChapterId, replies: impl IntoIterator<Item = Reply>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(chapter)
            .or_default()
            .extend(replies);
    }

    /// Reply used when a chapter has no script left (default: a small body)
    pub(crate) fn set_fallback(&self, reply: Reply) {
        *self.fallback.lock().unwrap() = Some(reply);
    }

    /// Fetches made for `chapter`
    pub(crate) fn calls(&self, chapter: ChapterId) -> usize {
        self.calls.lock().unwrap().get(&chapter).copied().unwrap_or(0)
    }

    /// Fetches made in total
    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// Highest number of fetches observed running at once
    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self, chapter: ChapterId) -> Reply {
        *self.calls.lock().unwrap().entry(chapter).or_default() += 1;

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&chapter)
            .and_then(|replies| replies.pop_front());
        scripted
            .or_else(|| self.fallback.lock().unwrap().clone())
            .unwrap_or_else(|| Reply::Body(chapter_body(chapter)))
    }
}

/// Default body served for a chapter
pub(crate) fn chapter_body(chapter: ChapterId) -> String {
    format!("<p>Chapter {} text</p>", chapter)
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SourceProvider for ScriptedSource {
    async fn fetch(
        &self,
        chapter: &ChapterInfo,
        _variant: DownloadType,
    ) -> Result<String, FetchError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        match self.next_reply(chapter.id) {
            Reply::Body(body) => Ok(body),
            Reply::Delayed(delay, body) => {
                tokio::time::sleep(delay).await;
                Ok(body)
            }
            Reply::Network => Err(FetchError::Network("connection reset".to_string())),
            Reply::NotFound => Err(FetchError::NotFound(format!("chapter {}", chapter.id))),
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// A downloader over a scripted source and an in-memory library
pub(crate) struct TestDownloader {
    pub(crate) downloader: NovelDownloader,
    pub(crate) source: Arc<ScriptedSource>,
    pub(crate) library: Arc<MemoryLibrary>,
    pub(crate) config: Config,
    /// Must be kept alive for the duration of the test
    pub(crate) temp_dir: TempDir,
}

impl TestDownloader {
    /// Open a second downloader over the same database, files, source and
    /// library, as a restarted process would
    pub(crate) async fn reopen(&self) -> NovelDownloader {
        NovelDownloader::new(
            self.config.clone(),
            self.source.clone(),
            self.library.clone(),
        )
        .await
        .unwrap()
    }
}

/// Test configuration rooted in `dir`: two slots, fast retries, no disk check
pub(crate) fn test_config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.join("test.db");
    config.download.download_dir = dir.join("downloads");
    config.download.max_concurrent_downloads = 2;
    config.download.fetch_timeout = Duration::from_secs(2);
    config.download.write_chunk_size = 8;
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(50);
    config.retry.jitter = false;
    config.polling.queue_poll_interval = Duration::from_millis(20);
    config.disk_space.enabled = false;
    config
}

/// Seed one novel with chapters `1..=CHAPTERS`
pub(crate) async fn seed_library(library: &MemoryLibrary) {
    library
        .insert_novel(NovelInfo {
            id: NOVEL,
            title: "Test Novel".to_string(),
            source: "Test Source".to_string(),
            source_id: 7,
        })
        .await;
    for id in 1..=CHAPTERS {
        library
            .insert_chapter(ChapterInfo {
                id: ChapterId(id),
                novel: NOVEL,
                name: format!("Chapter {}", id),
                number: id as f64,
                url: format!("https://example.com/novel/1/{}", id),
            })
            .await;
    }
}

/// Helper to create a test NovelDownloader instance with a persistent database.
pub(crate) async fn create_test_downloader() -> TestDownloader {
    create_test_downloader_with(|_| {}).await
}

/// Like [`create_test_downloader`] with a chance to adjust the config first
pub(crate) async fn create_test_downloader_with(
    configure: impl FnOnce(&mut Config),
) -> TestDownloader {
    let temp_dir = tempdir().unwrap();
    let mut config = test_config(temp_dir.path());
    configure(&mut config);

    let source = Arc::new(ScriptedSource::default());
    let library = Arc::new(MemoryLibrary::new());
    seed_library(&library).await;

    let downloader = NovelDownloader::new(config.clone(), source.clone(), library.clone())
        .await
        .unwrap();

    TestDownloader {
        downloader,
        source,
        library,
        config,
        temp_dir,
    }
}

/// Wait until the published queue state satisfies `pred`
pub(crate) async fn wait_for_snapshot<F>(downloader: &NovelDownloader, mut pred: F) -> QueueSnapshot
where
    F: FnMut(&QueueSnapshot) -> bool,
{
    let mut rx = downloader.watch();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            {
                let snapshot = rx.borrow_and_update();
                if pred(&snapshot) {
                    return snapshot.clone();
                }
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("timed out waiting for queue state")
}

/// Wait until the queue holds no QUEUED or DOWNLOADING task
pub(crate) async fn wait_until_idle(downloader: &NovelDownloader) -> QueueSnapshot {
    wait_for_snapshot(downloader, |s| s.pending_count() == 0 && s.active_count() == 0).await
}
