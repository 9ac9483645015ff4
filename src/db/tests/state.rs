use crate::db::*;
use tempfile::NamedTempFile;

#[tokio::test]
async fn test_shutdown_state_initial() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    // Nothing recorded yet counts as unclean
    assert!(db.was_unclean_shutdown().await.unwrap());

    db.close().await;
}

#[tokio::test]
async fn test_shutdown_state_clean_lifecycle() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    db.set_clean_start().await.unwrap();
    assert!(
        db.was_unclean_shutdown().await.unwrap(),
        "After clean start, should still indicate unclean (not yet shut down)"
    );

    db.set_clean_shutdown().await.unwrap();
    assert!(!db.was_unclean_shutdown().await.unwrap());

    // Next session starts
    db.set_clean_start().await.unwrap();
    assert!(db.was_unclean_shutdown().await.unwrap());

    db.close().await;
}

#[tokio::test]
async fn test_queue_running_switch_persists() {
    let temp_file = NamedTempFile::new().unwrap();

    let db = Database::new(temp_file.path()).await.unwrap();
    assert_eq!(db.queue_running().await.unwrap(), None);

    db.set_queue_running(false).await.unwrap();
    db.close().await;

    let db = Database::new(temp_file.path()).await.unwrap();
    assert_eq!(db.queue_running().await.unwrap(), Some(false));

    db.set_queue_running(true).await.unwrap();
    assert_eq!(db.queue_running().await.unwrap(), Some(true));

    db.close().await;
}
