//! Storage accounting and deletion addressed by library ids.

use crate::error::{Error, Result};
use crate::library::{ChapterInfo, NovelInfo};
use crate::types::{ChapterId, DownloadFormat, DownloadType, NovelId};
use std::collections::BTreeSet;

use super::NovelDownloader;

impl NovelDownloader {
    async fn novel_info(&self, novel: NovelId) -> Result<NovelInfo> {
        self.library
            .novel(novel)
            .await?
            .ok_or_else(|| Error::NotFound(format!("novel {}", novel)))
    }

    async fn chapter_info(&self, chapter: ChapterId) -> Result<ChapterInfo> {
        self.library
            .chapter(chapter)
            .await?
            .ok_or_else(|| Error::NotFound(format!("chapter {}", chapter)))
    }

    /// Number of chapters of `novel` with output on disk
    pub async fn get_download_count(&self, novel: NovelId) -> Result<usize> {
        let novel = self.novel_info(novel).await?;
        self.storage.get_download_count(&novel).await
    }

    /// Bytes of output on disk for `novel`
    pub async fn get_download_size(&self, novel: NovelId) -> Result<u64> {
        let novel = self.novel_info(novel).await?;
        self.storage.get_download_size(&novel).await
    }

    /// Chapters across every novel with output on disk
    pub async fn get_total_download_count(&self) -> Result<usize> {
        self.storage.get_total_download_count().await
    }

    /// Bytes of output on disk across every novel
    pub async fn get_total_download_size(&self) -> Result<u64> {
        self.storage.get_total_download_size().await
    }

    /// Whether `chapter` has original output on disk
    pub async fn is_chapter_downloaded(&self, chapter: ChapterId) -> Result<bool> {
        let chapter = self.chapter_info(chapter).await?;
        let novel = self.novel_info(chapter.novel).await?;
        self.storage.is_chapter_downloaded(&novel, chapter.id).await
    }

    /// Chapters of `novel` with original output on disk
    pub async fn downloaded_chapter_ids(&self, novel: NovelId) -> Result<BTreeSet<ChapterId>> {
        let novel = self.novel_info(novel).await?;
        self.storage.downloaded_chapter_ids(&novel).await
    }

    /// Read a chapter's published output
    pub async fn read_chapter(
        &self,
        chapter: ChapterId,
        download_type: DownloadType,
        format: DownloadFormat,
    ) -> Result<Option<Vec<u8>>> {
        let chapter = self.chapter_info(chapter).await?;
        let novel = self.novel_info(chapter.novel).await?;
        self.storage
            .read_chapter(download_type, format, &novel, &chapter)
            .await
    }

    /// Delete every output of a chapter and undo its accounting
    pub async fn delete_chapter(&self, chapter: ChapterId) -> Result<u64> {
        let chapter = self.chapter_info(chapter).await?;
        let novel = self.novel_info(chapter.novel).await?;
        self.storage.delete_chapter(&novel, &chapter).await
    }

    /// Delete every output of a novel and undo its accounting
    pub async fn delete_novel(&self, novel: NovelId) -> Result<u64> {
        let novel = self.novel_info(novel).await?;
        self.storage.delete_novel(&novel).await
    }
}
