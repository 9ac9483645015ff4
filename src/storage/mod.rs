//! Storage Writer
//!
//! Converts fetched chapter content into the task's output format and publishes
//! it atomically: bytes go to `<final>.part`, are synced, then renamed into
//! place. The library's downloaded flag and novel counters are updated only
//! after the rename succeeds, under a per-novel lock so concurrent completions
//! of the same novel never lose an update.
//!
//! Layout under the download root:
//!
//! ```text
//! novels/<source>/<novel title>/<chapter id>.<ext>
//! novels_translated/<source>/<novel title>/<number> - <chapter name>.<ext>
//! ```

mod formats;

use crate::config::DiskSpaceConfig;
use crate::error::{Error, Result, StorageError};
use crate::library::{ChapterInfo, LibraryStore, NovelInfo};
use crate::types::{ChapterId, DownloadFormat, DownloadTask, DownloadType, NovelId};
use crate::utils::{get_available_space, sanitize_filename};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

const ORIGINAL_DIR: &str = "novels";
const TRANSFORMED_DIR: &str = "novels_translated";
const PART_SUFFIX: &str = ".part";

/// Outcome of a successful publish
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteResult {
    /// Final location of the output
    pub path: PathBuf,
    /// Size of the output in bytes
    pub bytes: u64,
}

/// Writes chapter outputs and keeps the library's download accounting in step
pub struct StorageWriter {
    root: PathBuf,
    chunk_size: usize,
    disk_space: DiskSpaceConfig,
    library: Arc<dyn LibraryStore>,
    novel_locks: Mutex<HashMap<NovelId, Arc<Mutex<()>>>>,
}

impl StorageWriter {
    /// Create a writer rooted at `root`
    pub fn new(
        root: impl Into<PathBuf>,
        chunk_size: usize,
        disk_space: DiskSpaceConfig,
        library: Arc<dyn LibraryStore>,
    ) -> Self {
        Self {
            root: root.into(),
            chunk_size: chunk_size.max(1),
            disk_space,
            library,
            novel_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Download root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a novel's outputs of the given type
    pub fn novel_dir(&self, download_type: DownloadType, novel: &NovelInfo) -> PathBuf {
        let base = match download_type {
            DownloadType::Original => ORIGINAL_DIR,
            DownloadType::Transformed => TRANSFORMED_DIR,
        };
        self.root
            .join(base)
            .join(source_dir_name(novel))
            .join(novel_dir_name(novel))
    }

    /// Final path of a chapter's output
    pub fn output_path(
        &self,
        download_type: DownloadType,
        format: DownloadFormat,
        novel: &NovelInfo,
        chapter: &ChapterInfo,
    ) -> PathBuf {
        let ext = format.extension();
        let file_name = match download_type {
            DownloadType::Original => format!("{}.{}", chapter.id, ext),
            DownloadType::Transformed => {
                let name = if chapter.name.trim().is_empty() {
                    chapter.id.to_string()
                } else {
                    chapter.name.clone()
                };
                sanitize_filename(&format!(
                    "{} - {}.{}",
                    format_chapter_number(chapter.number),
                    name,
                    ext
                ))
            }
        };
        self.novel_dir(download_type, novel).join(file_name)
    }

    /// Path a task publishes to
    pub fn task_path(
        &self,
        task: &DownloadTask,
        novel: &NovelInfo,
        chapter: &ChapterInfo,
    ) -> PathBuf {
        self.output_path(task.download_type, task.format, novel, chapter)
    }

    /// Convert fetched content to the task's format
    pub fn render(
        &self,
        task: &DownloadTask,
        novel: &NovelInfo,
        chapter: &ChapterInfo,
        content: &str,
    ) -> Result<Vec<u8>> {
        let ctx = formats::RenderContext {
            novel_title: &novel.title,
            chapter_title: &chapter.name,
        };
        Ok(formats::render(task.format, content, &ctx)?)
    }

    /// Render and publish in one step
    pub async fn write(
        &self,
        task: &DownloadTask,
        novel: &NovelInfo,
        chapter: &ChapterInfo,
        content: &str,
        cancel: &CancellationToken,
    ) -> Result<WriteResult> {
        let bytes = self.render(task, novel, chapter, content)?;
        let path = self.task_path(task, novel, chapter);
        self.publish(novel, chapter, task.download_type, &path, &bytes, cancel, |_| {})
            .await
    }

    /// Atomically publish `bytes` at `path`
    ///
    /// Only ORIGINAL output marks the chapter downloaded and counts toward the
    /// novel's chapter total; TRANSFORMED output adds bytes only.
    ///
    /// `on_chunk` is called with the running byte count after each chunk
    /// lands in the temporary file. The token is checked before the temporary
    /// file is opened, between chunks and once more before the rename; a
    /// cancelled publish removes the temporary file and leaves `path` as it was.
    pub async fn publish<F>(
        &self,
        novel: &NovelInfo,
        chapter: &ChapterInfo,
        download_type: DownloadType,
        path: &Path,
        bytes: &[u8],
        cancel: &CancellationToken,
        mut on_chunk: F,
    ) -> Result<WriteResult>
    where
        F: FnMut(u64) + Send,
    {
        let dir = path
            .parent()
            .ok_or_else(|| Error::Other(format!("output path {} has no parent", path.display())))?;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| StorageError::io("create directory", dir, e))?;

        self.check_disk_space(dir, bytes.len() as u64)?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let part = part_path(path);
        if let Err(e) = self.write_part(&part, bytes, cancel, &mut on_chunk).await {
            remove_part(&part).await;
            return Err(e);
        }

        let lock = self.novel_lock(novel.id).await;
        let _guard = lock.lock().await;

        if cancel.is_cancelled() {
            remove_part(&part).await;
            return Err(Error::Cancelled);
        }

        let previous_len = existing_output(path).await.unwrap_or(0);
        if let Err(e) = tokio::fs::rename(&part, path).await {
            remove_part(&part).await;
            return Err(StorageError::io("rename", path, e).into());
        }

        let len = bytes.len() as u64;
        let newly = match download_type {
            DownloadType::Original => self.library.mark_downloaded(chapter.id).await?,
            DownloadType::Transformed => false,
        };
        let (count_delta, bytes_delta) = if newly {
            (1, len as i64)
        } else {
            (0, len as i64 - previous_len as i64)
        };
        if count_delta != 0 || bytes_delta != 0 {
            self.library
                .increment_download_stats(novel.id, count_delta, bytes_delta)
                .await?;
        }

        tracing::debug!(
            chapter_id = chapter.id.0,
            path = %path.display(),
            bytes = len,
            "Published chapter output"
        );

        Ok(WriteResult {
            path: path.to_path_buf(),
            bytes: len,
        })
    }

    /// Accept output that a previous run already published
    ///
    /// Marks the chapter downloaded and counts it only if the flag was not set,
    /// so adopting the same file twice never double-counts. TRANSFORMED output
    /// has no flag to key on and is taken as already accounted.
    pub async fn adopt_existing(
        &self,
        novel: &NovelInfo,
        chapter: &ChapterInfo,
        download_type: DownloadType,
        path: &Path,
        bytes: u64,
    ) -> Result<WriteResult> {
        let lock = self.novel_lock(novel.id).await;
        let _guard = lock.lock().await;

        if download_type == DownloadType::Original
            && self.library.mark_downloaded(chapter.id).await?
        {
            self.library
                .increment_download_stats(novel.id, 1, bytes as i64)
                .await?;
        }

        Ok(WriteResult {
            path: path.to_path_buf(),
            bytes,
        })
    }

    async fn write_part<F>(
        &self,
        part: &Path,
        bytes: &[u8],
        cancel: &CancellationToken,
        on_chunk: &mut F,
    ) -> Result<()>
    where
        F: FnMut(u64) + Send,
    {
        if tokio::fs::try_exists(part).await.unwrap_or(false) {
            tracing::warn!(path = %part.display(), "Overwriting stale temporary file");
        }

        let mut file = tokio::fs::File::create(part)
            .await
            .map_err(|e| StorageError::io("create", part, e))?;

        let mut written = 0u64;
        for chunk in bytes.chunks(self.chunk_size) {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            file.write_all(chunk)
                .await
                .map_err(|e| StorageError::io("write", part, e))?;
            written += chunk.len() as u64;
            on_chunk(written);
        }

        file.sync_all()
            .await
            .map_err(|e| StorageError::io("sync", part, e))?;
        Ok(())
    }

    fn check_disk_space(&self, dir: &Path, len: u64) -> Result<()> {
        if !self.disk_space.enabled {
            return Ok(());
        }

        let required = len.saturating_add(self.disk_space.min_free_space);
        let available =
            get_available_space(dir).map_err(|e| StorageError::io("check disk space", dir, e))?;

        if available < required {
            return Err(StorageError::InsufficientSpace {
                required,
                available,
            }
            .into());
        }
        Ok(())
    }

    async fn novel_lock(&self, novel: NovelId) -> Arc<Mutex<()>> {
        let mut locks = self.novel_locks.lock().await;
        Arc::clone(locks.entry(novel).or_default())
    }

    /// Whether an original output of any format exists for the chapter
    pub async fn is_chapter_downloaded(
        &self,
        novel: &NovelInfo,
        chapter: ChapterId,
    ) -> Result<bool> {
        Ok(self.downloaded_chapter_ids(novel).await?.contains(&chapter))
    }

    /// Chapters with at least one original output on disk
    pub async fn downloaded_chapter_ids(&self, novel: &NovelInfo) -> Result<BTreeSet<ChapterId>> {
        let files = list_outputs(&self.novel_dir(DownloadType::Original, novel)).await?;
        Ok(files
            .iter()
            .filter_map(|(path, _)| chapter_id_from_path(path))
            .collect())
    }

    /// Number of chapters of `novel` with original output on disk
    pub async fn get_download_count(&self, novel: &NovelInfo) -> Result<usize> {
        Ok(self.downloaded_chapter_ids(novel).await?.len())
    }

    /// Bytes of published output for `novel`, both roots
    pub async fn get_download_size(&self, novel: &NovelInfo) -> Result<u64> {
        let mut total = 0;
        for download_type in [DownloadType::Original, DownloadType::Transformed] {
            total += list_outputs(&self.novel_dir(download_type, novel))
                .await?
                .iter()
                .map(|(_, len)| len)
                .sum::<u64>();
        }
        Ok(total)
    }

    /// Chapters with original output across every novel
    pub async fn get_total_download_count(&self) -> Result<usize> {
        let mut total = 0;
        for dir in novel_dirs(&self.root.join(ORIGINAL_DIR)).await? {
            let ids: BTreeSet<ChapterId> = list_outputs(&dir)
                .await?
                .iter()
                .filter_map(|(path, _)| chapter_id_from_path(path))
                .collect();
            total += ids.len();
        }
        Ok(total)
    }

    /// Bytes of published output across every novel, both roots
    pub async fn get_total_download_size(&self) -> Result<u64> {
        let mut total = 0;
        for base in [ORIGINAL_DIR, TRANSFORMED_DIR] {
            for dir in novel_dirs(&self.root.join(base)).await? {
                total += list_outputs(&dir)
                    .await?
                    .iter()
                    .map(|(_, len)| len)
                    .sum::<u64>();
            }
        }
        Ok(total)
    }

    /// Read a published output, `None` if it does not exist
    pub async fn read_chapter(
        &self,
        download_type: DownloadType,
        format: DownloadFormat,
        novel: &NovelInfo,
        chapter: &ChapterInfo,
    ) -> Result<Option<Vec<u8>>> {
        let path = self.output_path(download_type, format, novel, chapter);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io("read", path, e).into()),
        }
    }

    /// Remove every output of a chapter and undo its accounting
    ///
    /// Returns the number of bytes removed.
    pub async fn delete_chapter(&self, novel: &NovelInfo, chapter: &ChapterInfo) -> Result<u64> {
        let lock = self.novel_lock(novel.id).await;
        let _guard = lock.lock().await;

        let mut removed = 0u64;
        let mut dirs = Vec::new();
        for download_type in [DownloadType::Original, DownloadType::Transformed] {
            for format in DownloadFormat::ALL {
                let path = self.output_path(download_type, format, novel, chapter);
                let Some(len) = existing_output(&path).await else {
                    continue;
                };
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|e| StorageError::io("remove", &path, e))?;
                removed += len;
            }
            dirs.push(self.novel_dir(download_type, novel));
        }

        let was_marked = self.library.unmark_downloaded(chapter.id).await?;
        let count_delta = if was_marked { -1 } else { 0 };
        if count_delta != 0 || removed > 0 {
            self.library
                .increment_download_stats(novel.id, count_delta, -(removed as i64))
                .await?;
        }

        for dir in dirs {
            self.prune_empty_dirs(&dir).await;
        }

        tracing::info!(
            novel_id = novel.id.0,
            chapter_id = chapter.id.0,
            bytes = removed,
            "Deleted chapter output"
        );
        Ok(removed)
    }

    /// Remove every output of a novel and undo its accounting
    ///
    /// Returns the number of bytes removed.
    pub async fn delete_novel(&self, novel: &NovelInfo) -> Result<u64> {
        let lock = self.novel_lock(novel.id).await;
        let _guard = lock.lock().await;

        let mut removed = 0u64;
        let mut chapters = BTreeSet::new();
        for download_type in [DownloadType::Original, DownloadType::Transformed] {
            let dir = self.novel_dir(download_type, novel);
            let files = list_outputs(&dir).await?;
            if download_type == DownloadType::Original {
                chapters.extend(files.iter().filter_map(|(path, _)| chapter_id_from_path(path)));
            }
            removed += files.iter().map(|(_, len)| len).sum::<u64>();

            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::io("remove directory", dir, e).into()),
            }
            if let Some(parent) = dir.parent() {
                self.prune_empty_dirs(parent).await;
            }
        }

        let mut unmarked = 0i64;
        for chapter in &chapters {
            if self.library.unmark_downloaded(*chapter).await? {
                unmarked += 1;
            }
        }
        if unmarked != 0 || removed > 0 {
            self.library
                .increment_download_stats(novel.id, -unmarked, -(removed as i64))
                .await?;
        }

        tracing::info!(
            novel_id = novel.id.0,
            chapters = chapters.len(),
            bytes = removed,
            "Deleted novel output"
        );
        Ok(removed)
    }

    /// Remove `dir` and its ancestors while they are empty, stopping at the
    /// type roots
    async fn prune_empty_dirs(&self, dir: &Path) {
        let stops = [self.root.join(ORIGINAL_DIR), self.root.join(TRANSFORMED_DIR)];
        let mut current = dir.to_path_buf();
        while current.starts_with(&self.root) && !stops.contains(&current) && current != self.root {
            // remove_dir fails on non-empty directories, which ends the walk
            if tokio::fs::remove_dir(&current).await.is_err() {
                break;
            }
            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => break,
            }
        }
    }
}

fn source_dir_name(novel: &NovelInfo) -> String {
    if novel.source.trim().is_empty() {
        novel.source_id.to_string()
    } else {
        sanitize_filename(&novel.source)
    }
}

fn novel_dir_name(novel: &NovelInfo) -> String {
    if novel.title.trim().is_empty() {
        novel.id.to_string()
    } else {
        sanitize_filename(&novel.title)
    }
}

/// Whole chapter numbers print without a fractional part
fn format_chapter_number(number: f64) -> String {
    if number.is_finite() && number.fract() == 0.0 {
        format!("{}", number as i64)
    } else {
        number.to_string()
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

fn is_part_file(path: &Path) -> bool {
    path.to_string_lossy().ends_with(PART_SUFFIX)
}

fn chapter_id_from_path(path: &Path) -> Option<ChapterId> {
    path.file_stem()?.to_str()?.parse().ok()
}

/// Size of an existing regular file
pub(crate) async fn existing_output(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .filter(|meta| meta.is_file())
        .map(|meta| meta.len())
}

async fn remove_part(part: &Path) {
    match tokio::fs::remove_file(part).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %part.display(), error = %e, "Failed to remove temporary file");
        }
    }
}

/// Published files directly under `dir`, temporary files excluded
async fn list_outputs(dir: &Path) -> Result<Vec<(PathBuf, u64)>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::io("read directory", dir, e).into()),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StorageError::io("read directory", dir, e))?
    {
        let path = entry.path();
        if is_part_file(&path) {
            continue;
        }
        let meta = entry
            .metadata()
            .await
            .map_err(|e| StorageError::io("stat", &path, e))?;
        if meta.is_file() {
            files.push((path, meta.len()));
        }
    }
    Ok(files)
}

/// `<base>/<source>/<novel>` directories
async fn novel_dirs(base: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for source in subdirs(base).await? {
        dirs.extend(subdirs(&source).await?);
    }
    Ok(dirs)
}

async fn subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::io("read directory", dir, e).into()),
    };

    let mut dirs = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StorageError::io("read directory", dir, e))?
    {
        let is_dir = entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);
        if is_dir {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}
