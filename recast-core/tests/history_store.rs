use std::path::Path;

use tempfile::TempDir;

use recast_core::{DownloadHistory, HistoryRecord};

fn temp_store(dir: &Path) -> DownloadHistory {
    let store = DownloadHistory::builder()
        .path(dir.join("history.sqlite"))
        .build()
        .expect("create store");
    store.initialize().expect("initialize store");
    store
}

fn record(id: &str) -> HistoryRecord {
    HistoryRecord {
        video_id: id.to_string(),
        source_url: format!("https://www.youtube.com/watch?v={id}"),
        title: Some(format!("clip {id}")),
        channel_url: Some("https://www.youtube.com/@somechannel".to_string()),
        sha256: None,
    }
}

#[test]
fn marking_twice_counts_once() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());

    assert!(!store.is_downloaded("abc123").unwrap());
    assert!(store.mark_downloaded(&record("abc123")).unwrap());
    assert!(store.is_downloaded("abc123").unwrap());
    assert!(!store.mark_downloaded(&record("abc123")).unwrap());
    assert_eq!(store.count().unwrap(), 1);
}

#[test]
fn marks_survive_reopening_the_store() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("history.sqlite");
    {
        let store = DownloadHistory::builder().path(&path).build().unwrap();
        store.initialize().unwrap();
        store.mark_downloaded(&record("persist-1")).unwrap();
    }

    let reopened = DownloadHistory::new(&path).unwrap();
    assert!(reopened.is_downloaded("persist-1").unwrap());
    assert!(!reopened.mark_downloaded(&record("persist-1")).unwrap());
    assert_eq!(reopened.count().unwrap(), 1);
}

#[test]
fn recent_caps_the_listing() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    for id in ["one", "two", "three"] {
        store.mark_downloaded(&record(id)).unwrap();
    }

    let entries = store.recent(2).unwrap();
    assert_eq!(entries.len(), 2);
    let all = store.recent(10).unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.iter().all(|entry| entry.recorded_at.is_some()));
}

#[test]
fn forget_makes_an_id_eligible_again() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    store.mark_downloaded(&record("redo-me")).unwrap();

    assert!(store.forget("redo-me").unwrap());
    assert!(!store.forget("redo-me").unwrap());
    assert!(!store.is_downloaded("redo-me").unwrap());
    assert!(store.mark_downloaded(&record("redo-me")).unwrap());
}

#[test]
fn backup_copy_is_a_usable_store() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    store.mark_downloaded(&record("kept")).unwrap();

    let backup_path = dir.path().join("backups/history.sqlite");
    store.backup_to(&backup_path).unwrap();

    let restored = DownloadHistory::new(&backup_path).unwrap();
    assert!(restored.is_downloaded("kept").unwrap());
}

#[test]
fn export_backup_writes_replayable_sql() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    store.mark_downloaded(&record("dumped")).unwrap();

    let dump_path = dir.path().join("history.sql.gz");
    store.export_backup(&dump_path).unwrap();

    let bytes = std::fs::read(&dump_path).unwrap();
    assert!(!bytes.is_empty());
    // Gzip magic; the CLI restores these with plain zcat | sqlite3.
    assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
}
