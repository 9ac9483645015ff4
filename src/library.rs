//! Library store collaborator
//!
//! The library owns novel and chapter metadata and the per-chapter
//! "downloaded" flag. The queue only holds references to these entities and
//! updates the flag and the novel-level counters after an output is published.

use crate::types::{ChapterId, NovelId};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Novel metadata used to build output paths
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NovelInfo {
    /// Library id
    pub id: NovelId,
    /// Display title; blank titles fall back to the id on disk
    pub title: String,
    /// Source display name; blank names fall back to `source_id`
    pub source: String,
    /// Numeric source id
    pub source_id: i64,
}

/// Chapter metadata handed to the source provider
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChapterInfo {
    /// Library id
    pub id: ChapterId,
    /// Owning novel
    pub novel: NovelId,
    /// Display name
    pub name: String,
    /// Chapter number as reported by the source (may be fractional)
    pub number: f64,
    /// Source-specific location of the chapter
    pub url: String,
}

/// Novel-level download counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadStats {
    /// Chapters with published output
    pub count: i64,
    /// Total bytes of published output
    pub bytes: i64,
}

/// Library metadata and download bookkeeping
#[async_trait]
pub trait LibraryStore: Send + Sync {
    /// Look up a novel
    async fn novel(&self, id: NovelId) -> Result<Option<NovelInfo>>;

    /// Look up a chapter
    async fn chapter(&self, id: ChapterId) -> Result<Option<ChapterInfo>>;

    /// Set the chapter's downloaded flag. Returns true if it was not set before.
    async fn mark_downloaded(&self, chapter: ChapterId) -> Result<bool>;

    /// Clear the chapter's downloaded flag. Returns true if it was set before.
    async fn unmark_downloaded(&self, chapter: ChapterId) -> Result<bool>;

    /// Whether the chapter's downloaded flag is set
    async fn is_downloaded(&self, chapter: ChapterId) -> Result<bool>;

    /// Add deltas to the novel's counters
    async fn increment_download_stats(&self, novel: NovelId, count: i64, bytes: i64) -> Result<()>;

    /// Current counters for a novel
    async fn download_stats(&self, novel: NovelId) -> Result<DownloadStats>;
}

/// In-memory [`LibraryStore`], for embedding without a database and for tests
#[derive(Default)]
pub struct MemoryLibrary {
    novels: RwLock<HashMap<NovelId, NovelInfo>>,
    chapters: RwLock<HashMap<ChapterId, ChapterInfo>>,
    downloaded: RwLock<HashSet<ChapterId>>,
    stats: RwLock<HashMap<NovelId, DownloadStats>>,
}

impl MemoryLibrary {
    /// Create an empty library
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a novel
    pub async fn insert_novel(&self, novel: NovelInfo) {
        self.novels.write().await.insert(novel.id, novel);
    }

    /// Add or replace a chapter
    pub async fn insert_chapter(&self, chapter: ChapterInfo) {
        self.chapters.write().await.insert(chapter.id, chapter);
    }
}

#[async_trait]
impl LibraryStore for MemoryLibrary {
    async fn novel(&self, id: NovelId) -> Result<Option<NovelInfo>> {
        Ok(self.novels.read().await.get(&id).cloned())
    }

    async fn chapter(&self, id: ChapterId) -> Result<Option<ChapterInfo>> {
        Ok(self.chapters.read().await.get(&id).cloned())
    }

    async fn mark_downloaded(&self, chapter: ChapterId) -> Result<bool> {
        Ok(self.downloaded.write().await.insert(chapter))
    }

    async fn unmark_downloaded(&self, chapter: ChapterId) -> Result<bool> {
        Ok(self.downloaded.write().await.remove(&chapter))
    }

    async fn is_downloaded(&self, chapter: ChapterId) -> Result<bool> {
        Ok(self.downloaded.read().await.contains(&chapter))
    }

    async fn increment_download_stats(&self, novel: NovelId, count: i64, bytes: i64) -> Result<()> {
        let mut stats = self.stats.write().await;
        let entry = stats.entry(novel).or_default();
        entry.count = (entry.count + count).max(0);
        entry.bytes = (entry.bytes + bytes).max(0);
        Ok(())
    }

    async fn download_stats(&self, novel: NovelId) -> Result<DownloadStats> {
        Ok(self.stats.read().await.get(&novel).copied().unwrap_or_default())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mark_downloaded_reports_first_mark_only() {
        let library = MemoryLibrary::new();
        assert!(library.mark_downloaded(ChapterId(1)).await.unwrap());
        assert!(!library.mark_downloaded(ChapterId(1)).await.unwrap());
        assert!(library.is_downloaded(ChapterId(1)).await.unwrap());

        assert!(library.unmark_downloaded(ChapterId(1)).await.unwrap());
        assert!(!library.unmark_downloaded(ChapterId(1)).await.unwrap());
    }

    #[tokio::test]
    async fn stats_accumulate_and_never_go_negative() {
        let library = MemoryLibrary::new();
        library
            .increment_download_stats(NovelId(1), 1, 100)
            .await
            .unwrap();
        library
            .increment_download_stats(NovelId(1), 1, 50)
            .await
            .unwrap();
        assert_eq!(
            library.download_stats(NovelId(1)).await.unwrap(),
            DownloadStats {
                count: 2,
                bytes: 150
            }
        );

        library
            .increment_download_stats(NovelId(1), -5, -500)
            .await
            .unwrap();
        assert_eq!(
            library.download_stats(NovelId(1)).await.unwrap(),
            DownloadStats::default()
        );
    }
}
