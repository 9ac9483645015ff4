use crate::downloader::test_helpers::{
    NOVEL, TestDownloader, chapter_body, create_test_downloader, wait_for_snapshot,
};
use crate::error::Error;
use crate::library::LibraryStore;
use crate::types::{ChapterId, DownloadFormat, DownloadType, NovelId};
use std::collections::BTreeSet;

async fn download(t: &TestDownloader, chapters: &[i64], download_type: DownloadType) {
    let chapters: Vec<ChapterId> = chapters.iter().copied().map(ChapterId).collect();
    t.downloader
        .enqueue_many(NOVEL, &chapters, download_type, DownloadFormat::Html)
        .await
        .unwrap();
    wait_for_snapshot(&t.downloader, |s| s.tasks.is_empty()).await;
}

#[tokio::test]
async fn counts_and_sizes_follow_downloads() {
    let t = create_test_downloader().await;
    t.downloader.start_queue_processor();
    assert_eq!(t.downloader.get_download_count(NOVEL).await.unwrap(), 0);
    assert_eq!(t.downloader.get_total_download_size().await.unwrap(), 0);

    download(&t, &[1, 2, 3], DownloadType::Original).await;

    let expected: u64 = [1, 2, 3]
        .iter()
        .map(|id| chapter_body(ChapterId(*id)).len() as u64)
        .sum();
    assert_eq!(t.downloader.get_download_count(NOVEL).await.unwrap(), 3);
    assert_eq!(t.downloader.get_total_download_count().await.unwrap(), 3);
    assert_eq!(t.downloader.get_download_size(NOVEL).await.unwrap(), expected);
    assert_eq!(t.downloader.get_total_download_size().await.unwrap(), expected);
    assert_eq!(
        t.downloader.downloaded_chapter_ids(NOVEL).await.unwrap(),
        BTreeSet::from([ChapterId(1), ChapterId(2), ChapterId(3)])
    );

    // Translated output adds bytes but not chapters
    download(&t, &[1], DownloadType::Transformed).await;
    assert_eq!(t.downloader.get_download_count(NOVEL).await.unwrap(), 3);
    assert!(t.downloader.get_download_size(NOVEL).await.unwrap() > expected);
}

#[tokio::test]
async fn chapter_reads_and_flags() {
    let t = create_test_downloader().await;
    t.downloader.start_queue_processor();
    download(&t, &[4], DownloadType::Original).await;

    assert!(t.downloader.is_chapter_downloaded(ChapterId(4)).await.unwrap());
    assert!(!t.downloader.is_chapter_downloaded(ChapterId(5)).await.unwrap());

    let body = t
        .downloader
        .read_chapter(ChapterId(4), DownloadType::Original, DownloadFormat::Html)
        .await
        .unwrap();
    assert_eq!(body, Some(chapter_body(ChapterId(4)).into_bytes()));

    let missing = t
        .downloader
        .read_chapter(ChapterId(4), DownloadType::Original, DownloadFormat::Epub)
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let t = create_test_downloader().await;

    let err = t.downloader.get_download_count(NovelId(404)).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "got {:?}", err);
    let err = t.downloader.is_chapter_downloaded(ChapterId(404)).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "got {:?}", err);
    let err = t.downloader.delete_chapter(ChapterId(404)).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "got {:?}", err);
}

#[tokio::test]
async fn delete_chapter_undoes_accounting() {
    let t = create_test_downloader().await;
    t.downloader.start_queue_processor();
    download(&t, &[1, 2], DownloadType::Original).await;

    let removed = t.downloader.delete_chapter(ChapterId(1)).await.unwrap();
    assert_eq!(removed, chapter_body(ChapterId(1)).len() as u64);

    assert!(!t.downloader.is_chapter_downloaded(ChapterId(1)).await.unwrap());
    assert!(!t.library.is_downloaded(ChapterId(1)).await.unwrap());
    assert_eq!(t.downloader.get_download_count(NOVEL).await.unwrap(), 1);
    let stats = t.library.download_stats(NOVEL).await.unwrap();
    assert_eq!(stats.count, 1);
    assert_eq!(stats.bytes, chapter_body(ChapterId(2)).len() as i64);

    // Deleting again is a no-op
    assert_eq!(t.downloader.delete_chapter(ChapterId(1)).await.unwrap(), 0);
}

#[tokio::test]
async fn delete_novel_removes_everything() {
    let t = create_test_downloader().await;
    t.downloader.start_queue_processor();
    download(&t, &[1, 2, 3], DownloadType::Original).await;
    download(&t, &[1], DownloadType::Transformed).await;

    let size = t.downloader.get_download_size(NOVEL).await.unwrap();
    let removed = t.downloader.delete_novel(NOVEL).await.unwrap();
    assert_eq!(removed, size);

    assert_eq!(t.downloader.get_download_count(NOVEL).await.unwrap(), 0);
    assert_eq!(t.downloader.get_total_download_size().await.unwrap(), 0);
    assert_eq!(t.library.download_stats(NOVEL).await.unwrap().count, 0);
    for id in 1..=3 {
        assert!(!t.library.is_downloaded(ChapterId(id)).await.unwrap());
    }
}
