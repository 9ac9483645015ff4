//! End-to-end tests: a real downloader fetching chapters over HTTP
//!
//! The source is a local wiremock server, so these run without network
//! access. They drive the public API only: enqueue, control operations, the
//! status stream and the storage read paths.

mod common;

use common::{
    CHAPTER_HTML, NOVEL, assert_completed, chapter_path, e2e_config, seed_library, serve_chapters,
    wait_for_state, wait_for_terminal,
};
use novel_dl::{
    ChapterId, DownloadFormat, DownloadType, FailureKind, HttpSourceProvider, LibraryStore,
    MemoryLibrary, NovelDownloader, TaskStatus,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WAIT: Duration = Duration::from_secs(10);

async fn create_downloader(dir: &Path, library: Arc<MemoryLibrary>) -> NovelDownloader {
    let config = e2e_config(dir);
    let source = Arc::new(HttpSourceProvider::new(config.download.fetch_timeout).unwrap());
    NovelDownloader::new(config, source, library).await.unwrap()
}

#[tokio::test]
async fn downloads_chapter_in_every_format() {
    let server = MockServer::start().await;
    serve_chapters(&server, 1).await;
    let library = Arc::new(seed_library(&server, 1).await);
    let temp_dir = tempfile::tempdir().unwrap();
    let downloader = create_downloader(temp_dir.path(), library.clone()).await;
    let mut events = downloader.events();
    downloader.start_queue_processor();

    let mut outputs = Vec::new();
    for format in [
        DownloadFormat::Html,
        DownloadFormat::PlainText,
        DownloadFormat::Epub,
        DownloadFormat::Docx,
    ] {
        let id = downloader
            .enqueue(NOVEL, ChapterId(1), DownloadType::Original, format)
            .await
            .unwrap();
        let path = assert_completed(wait_for_terminal(&mut events, id, WAIT).await);
        assert_eq!(
            path.extension().and_then(|ext| ext.to_str()),
            Some(format.extension())
        );
        outputs.push((format, tokio::fs::read(&path).await.unwrap()));
    }

    for (format, bytes) in outputs {
        match format {
            DownloadFormat::Html => assert_eq!(bytes, CHAPTER_HTML.as_bytes()),
            DownloadFormat::PlainText => {
                let text = String::from_utf8(bytes).unwrap();
                assert!(!text.contains('<'));
                assert!(text.contains("The rain had not stopped for three days."));
                assert!(text.contains("\n\nNobody opened the gate."));
            }
            // Both are zip containers
            DownloadFormat::Epub | DownloadFormat::Docx => assert!(bytes.starts_with(b"PK")),
        }
    }

    // Four formats of one chapter still count as one downloaded chapter
    assert_eq!(downloader.get_download_count(NOVEL).await.unwrap(), 1);
    assert_eq!(library.download_stats(NOVEL).await.unwrap().count, 1);
    assert!(downloader.is_chapter_downloaded(ChapterId(1)).await.unwrap());
}

#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(chapter_path(1)))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    serve_chapters(&server, 1).await;
    let library = Arc::new(seed_library(&server, 1).await);
    let temp_dir = tempfile::tempdir().unwrap();
    let downloader = create_downloader(temp_dir.path(), library).await;
    let mut events = downloader.events();
    downloader.start_queue_processor();

    let id = downloader
        .enqueue(NOVEL, ChapterId(1), DownloadType::Original, DownloadFormat::Html)
        .await
        .unwrap();
    assert_completed(wait_for_terminal(&mut events, id, WAIT).await);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
}

#[tokio::test]
async fn missing_chapter_fails_without_retrying() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(chapter_path(1)))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let library = Arc::new(seed_library(&server, 1).await);
    let temp_dir = tempfile::tempdir().unwrap();
    let downloader = create_downloader(temp_dir.path(), library).await;
    let mut events = downloader.events();
    downloader.start_queue_processor();

    let id = downloader
        .enqueue(NOVEL, ChapterId(1), DownloadType::Original, DownloadFormat::Html)
        .await
        .unwrap();

    match wait_for_terminal(&mut events, id, WAIT).await {
        common::WaitResult::Failed { kind, attempt, error } => {
            assert_eq!(kind, FailureKind::Fatal);
            assert_eq!(attempt, 0);
            assert!(error.contains("404"), "error was {}", error);
        }
        other => panic!("expected failure, got {:?}", other),
    }

    let task = downloader.get_task(id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Error);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn transformed_content_is_not_served_over_plain_http() {
    let server = MockServer::start().await;
    serve_chapters(&server, 1).await;
    let library = Arc::new(seed_library(&server, 1).await);
    let temp_dir = tempfile::tempdir().unwrap();
    let downloader = create_downloader(temp_dir.path(), library).await;
    let mut events = downloader.events();
    downloader.start_queue_processor();

    let id = downloader
        .enqueue(NOVEL, ChapterId(1), DownloadType::Transformed, DownloadFormat::Html)
        .await
        .unwrap();

    assert!(matches!(
        wait_for_terminal(&mut events, id, WAIT).await,
        common::WaitResult::Failed {
            kind: FailureKind::Fatal,
            ..
        }
    ));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn paused_queue_resumes_after_restart() {
    let server = MockServer::start().await;
    serve_chapters(&server, 5).await;
    let library = Arc::new(seed_library(&server, 5).await);
    let temp_dir = tempfile::tempdir().unwrap();

    {
        let downloader = create_downloader(temp_dir.path(), library.clone()).await;
        downloader.pause().await.unwrap();
        downloader.start_queue_processor();
        let chapters: Vec<ChapterId> = (1..=5).map(ChapterId).collect();
        downloader
            .enqueue_many(NOVEL, &chapters, DownloadType::Original, DownloadFormat::Epub)
            .await
            .unwrap();
        downloader.shutdown().await.unwrap();
    }
    assert!(server.received_requests().await.unwrap().is_empty());

    let downloader = create_downloader(temp_dir.path(), library.clone()).await;
    assert!(!downloader.is_running());
    assert_eq!(downloader.snapshot().pending_count(), 5);

    downloader.start_queue_processor();
    downloader.resume().await.unwrap();
    wait_for_state(&downloader, WAIT, |s| s.tasks.is_empty())
        .await
        .unwrap();

    assert_eq!(server.received_requests().await.unwrap().len(), 5);
    assert_eq!(downloader.get_download_count(NOVEL).await.unwrap(), 5);
    assert_eq!(
        downloader.downloaded_chapter_ids(NOVEL).await.unwrap().len(),
        5
    );
    assert_eq!(library.download_stats(NOVEL).await.unwrap().count, 5);

    let removed = downloader.delete_novel(NOVEL).await.unwrap();
    assert!(removed > 0);
    assert_eq!(downloader.get_total_download_size().await.unwrap(), 0);
    downloader.shutdown().await.unwrap();
}
