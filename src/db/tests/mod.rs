use crate::db::*;
use crate::types::{ChapterId, DownloadFormat, DownloadType, NovelId};

mod migrations;
mod state;

fn new_task(novel: i64, chapter: i64, format: DownloadFormat) -> NewTask {
    NewTask {
        novel: NovelId(novel),
        chapter: ChapterId(chapter),
        download_type: DownloadType::Original,
        format,
        novel_title: Some(format!("Novel {}", novel)),
        chapter_name: Some(format!("Chapter {}", chapter)),
    }
}
