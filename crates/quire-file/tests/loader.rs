//! FileLoader and FileLoaderMapping behaviour.

use std::sync::Arc;
use std::time::Duration;

use quire_file::{
    ContentsManager, FileError, FileEvent, FileIndex, FileLoader, FileLoaderMapping, FileModel,
    FsContentsManager, MemoryContentsManager,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

fn setup(content: &str) -> (Arc<FileIndex>, Arc<MemoryContentsManager>) {
    let index = Arc::new(FileIndex::new());
    index.register("f1", "a.txt");
    let contents = Arc::new(MemoryContentsManager::new());
    contents.write_external("a.txt", content);
    (index, contents)
}

#[tokio::test]
async fn test_load_then_save() {
    let (index, contents) = setup("test");
    let loader = FileLoader::new("f1", index, Arc::clone(&contents), None);

    let model = loader.load_content("text", "file").await.unwrap();
    assert_eq!(model.content.as_deref(), Some("test"));

    let update = FileModel::with_content("text", "file", "test2", model.last_modified);
    let saved = loader.save_content(&update).await.unwrap();
    assert!(saved.last_modified > model.last_modified);
    assert_eq!(contents.content("a.txt").as_deref(), Some("test2"));
    assert_eq!(contents.save_count(), 1);
}

#[tokio::test]
async fn test_save_refuses_out_of_band_changes() {
    let (index, contents) = setup("test");
    let loader = FileLoader::new("f1", index, Arc::clone(&contents), None);
    let model = loader.load_content("text", "file").await.unwrap();

    contents.write_external("a.txt", "external");

    let stale = FileModel::with_content("text", "file", "mine", model.last_modified);
    assert!(matches!(
        loader.save_content(&stale).await,
        Err(FileError::OutOfBandChanges)
    ));
    assert_eq!(contents.content("a.txt").as_deref(), Some("external"));
    assert_eq!(contents.save_count(), 0);

    loader.overwrite_content(&stale).await.unwrap();
    assert_eq!(contents.content("a.txt").as_deref(), Some("mine"));
}

#[tokio::test]
async fn test_unknown_file_id() {
    let (index, contents) = setup("x");
    let loader = FileLoader::new("nope", index, contents, None);
    assert!(matches!(
        loader.load_content("text", "file").await,
        Err(FileError::UnknownFileId(_))
    ));
}

#[tokio::test]
async fn test_notify_only_on_advance() {
    let (index, contents) = setup("test");
    let loader = FileLoader::new("f1", index, Arc::clone(&contents), None);
    let (tx, mut rx) = mpsc::unbounded_channel();
    loader.observe("text:file:f1", tx);

    // Nothing observed yet: the first poll only records the time.
    assert!(!loader.notify().await.unwrap());
    assert!(!loader.notify().await.unwrap());

    let t = contents.write_external("a.txt", "external");
    assert!(loader.notify().await.unwrap());
    assert_eq!(
        rx.try_recv().unwrap(),
        FileEvent::Modified { last_modified: t }
    );
    assert!(!loader.notify().await.unwrap());
}

#[tokio::test]
async fn test_notify_drops_closed_subscribers() {
    let (index, contents) = setup("test");
    let loader = FileLoader::new("f1", index, Arc::clone(&contents), None);
    loader.load_content("text", "file").await.unwrap();

    let (tx, rx) = mpsc::unbounded_channel();
    loader.observe("gone", tx);
    drop(rx);
    assert_eq!(loader.subscription_count(), 1);

    contents.write_external("a.txt", "external");
    assert!(loader.notify().await.unwrap());
    assert_eq!(loader.subscription_count(), 0);
}

#[tokio::test]
async fn test_poll_task_notifies_subscribers() {
    let (index, contents) = setup("test");
    let loader = FileLoader::new(
        "f1",
        index,
        Arc::clone(&contents),
        Some(Duration::from_millis(10)),
    );
    loader.load_content("text", "file").await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    loader.observe("room", tx);

    contents.write_external("a.txt", "external");
    let event = timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("poll should notify")
        .unwrap();
    assert!(matches!(event, FileEvent::Modified { .. }));

    loader.clean();
    loader.unobserve("room");
    assert_eq!(loader.subscription_count(), 0);
}

#[tokio::test]
async fn test_mapping_shares_and_releases_loaders() {
    let (index, contents) = setup("test");
    let mapping = FileLoaderMapping::new(index, contents, None);

    let a = mapping.get_or_create("f1");
    let b = mapping.get_or_create("f1");
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(mapping.len(), 1);

    let (tx, _rx) = mpsc::unbounded_channel();
    a.observe("text:file:f1", tx);
    assert!(!mapping.release("f1"), "subscribed loader must survive");
    assert!(mapping.contains("f1"));

    a.unobserve("text:file:f1");
    assert!(mapping.release("f1"));
    assert!(!mapping.contains("f1"));
    assert!(!mapping.release("f1"));

    mapping.get_or_create("f1");
    mapping.get_or_create("f2");
    assert_eq!(mapping.len(), 2);
    assert!(mapping.remove("f2").is_some());
    mapping.clear();
    assert!(mapping.is_empty());
}

#[tokio::test]
async fn test_fs_contents_manager_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "on disk").unwrap();
    let cm = FsContentsManager::new(dir.path());

    let model = cm.get("a.txt", "text", "file", true).await.unwrap();
    assert_eq!(model.content.as_deref(), Some("on disk"));

    let update = FileModel::with_content("text", "file", "rewritten", model.last_modified);
    let saved = cm.save(&update, "a.txt").await.unwrap();
    assert_eq!(saved.content, None);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
        "rewritten"
    );
    // No temporary file is left behind.
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

    assert!(matches!(
        cm.get("missing.txt", "text", "file", true).await,
        Err(FileError::NotFound(_))
    ));
    assert!(matches!(
        cm.get("../a.txt", "text", "file", true).await,
        Err(FileError::InvalidPath(_))
    ));
}

#[tokio::test]
async fn test_fs_loader_detects_external_edit() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "test").unwrap();
    let index = Arc::new(FileIndex::new());
    index.index_dir(dir.path()).await.unwrap();
    let file_id = index.get_id("a.txt").unwrap();
    let loader = FileLoader::new(
        file_id,
        index,
        Arc::new(FsContentsManager::new(dir.path())),
        None,
    );

    let model = loader.load_content("text", "file").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    std::fs::write(dir.path().join("a.txt"), "external").unwrap();

    let stale = FileModel::with_content("text", "file", "mine", model.last_modified);
    assert!(matches!(
        loader.save_content(&stale).await,
        Err(FileError::OutOfBandChanges)
    ));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
        "external"
    );
}
