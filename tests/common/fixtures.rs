//! Library fixtures and chapter pages served by a mock source

use novel_dl::{ChapterId, ChapterInfo, Config, MemoryLibrary, NovelId, NovelInfo};
use std::path::Path;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Novel every fixture chapter belongs to
pub const NOVEL: NovelId = NovelId(100);

/// A chapter page with two paragraphs and inline markup
pub const CHAPTER_HTML: &str =
    "<h1>The Gate</h1><p>The rain had not stopped for <em>three</em> days.</p><p>Nobody opened the gate.</p>";

/// URL path a chapter is served under
pub fn chapter_path(chapter: i64) -> String {
    format!("/novel/{}/chapter/{}", NOVEL, chapter)
}

/// Configuration rooted in `dir` with fast retries and no disk-space reserve
pub fn e2e_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.join("e2e.db");
    config.download.download_dir = dir.join("downloads");
    config.download.max_concurrent_downloads = 2;
    config.download.fetch_timeout = Duration::from_secs(5);
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(50);
    config.retry.jitter = false;
    config.polling.queue_poll_interval = Duration::from_millis(20);
    config.disk_space.enabled = false;
    config
}

/// Library holding [`NOVEL`] with `chapters` chapters hosted on `server`
pub async fn seed_library(server: &MockServer, chapters: i64) -> MemoryLibrary {
    let library = MemoryLibrary::new();
    library
        .insert_novel(NovelInfo {
            id: NOVEL,
            title: "Rain: A Story?".to_string(),
            source: "Mock Source".to_string(),
            source_id: 1,
        })
        .await;
    for id in 1..=chapters {
        library
            .insert_chapter(ChapterInfo {
                id: ChapterId(id),
                novel: NOVEL,
                name: format!("Chapter {}", id),
                number: id as f64,
                url: format!("{}{}", server.uri(), chapter_path(id)),
            })
            .await;
    }
    library
}

/// Serve [`CHAPTER_HTML`] for every chapter in `1..=chapters`
pub async fn serve_chapters(server: &MockServer, chapters: i64) {
    for id in 1..=chapters {
        Mock::given(method("GET"))
            .and(path(chapter_path(id)))
            .respond_with(ResponseTemplate::new(200).set_body_string(CHAPTER_HTML))
            .mount(server)
            .await;
    }
}
