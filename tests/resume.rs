mod common;

use std::{path::Path, time::Duration};

use tokio::io::AsyncWriteExt;

use common::{config, coordinator, photo_share, MemoryStore};
use share_transfer::{
    Checkpoint, CheckpointKey, CheckpointStore, ErrorKind, TransferDirection, TransferError,
    TransferOutcome, TransferProgress, TransferRequest, TransferState,
};

const PHOTOS: [&str; 5] = ["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg"];

fn photos_request() -> TransferRequest {
    TransferRequest::directory(TransferDirection::ToLocal, "/share/photos", "/local/photos")
}

fn local_writes(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| format!("/local/photos/{}", n)).collect()
}

fn assert_all_photos(remote: &MemoryStore, local: &MemoryStore) {
    for n in PHOTOS {
        assert_eq!(
            local.file(&format!("/local/photos/{}", n)),
            remote.file(&format!("/share/photos/{}", n)),
            "{} differs",
            n
        );
    }
}

async fn seed_checkpoint(
    dir: &Path,
    done: &[&str],
    total: u64,
    age: chrono::Duration,
) -> anyhow::Result<()> {
    let store = CheckpointStore::new(dir, Duration::from_secs(86_400));
    let mut checkpoint = Checkpoint::new(&CheckpointKey::from(&photos_request()), total);
    for item in done {
        checkpoint.mark_complete(item, 10);
    }
    checkpoint.timestamp = chrono::Utc::now() - age;
    store.save(&checkpoint).await?;
    Ok(())
}

async fn resumable(c: &share_transfer::TransferCoordinator) -> Option<Checkpoint> {
    c.get_resumable_checkpoint("/share/photos", "/local/photos", TransferDirection::ToLocal)
        .await
}

#[tokio::test]
async fn failed_folder_resumes_where_it_stopped() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let remote = photo_share();
    remote.fail_read("/share/photos/d.jpg");
    let local = MemoryStore::new();
    let c = coordinator(&remote, &local, config(dir.path()));
    let mut transitions = c.transitions();

    match c.start_transfer(photos_request()).await?.wait().await {
        TransferOutcome::Failed(TransferError::PartialFailure {
            item_path,
            completed_count,
            total_items,
            ..
        }) => {
            assert_eq!(item_path, "d.jpg");
            assert_eq!(completed_count, 3);
            assert_eq!(total_items, 5);
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let mut events = vec![];
    while let Ok(s) = transitions.try_recv() {
        events.push(s);
    }
    let n = events.len();
    assert!(matches!(
        &events[n - 2],
        TransferState::Failed(info) if info.kind == ErrorKind::PartialFailure
    ));
    assert_eq!(events[n - 1], TransferState::Idle);

    let checkpoint = resumable(&c).await.expect("checkpoint kept after failure");
    assert_eq!(
        checkpoint.completed_items.iter().collect::<Vec<_>>(),
        vec!["a.jpg", "b.jpg", "c.jpg"]
    );
    assert_eq!(checkpoint.total_items, 5);
    assert_eq!(checkpoint.bytes_transferred, 10 + 11 + 12);

    remote.clear_faults();
    local.clear_writes();

    match c.start_transfer(photos_request()).await?.wait().await {
        TransferOutcome::Completed(s) => {
            assert_eq!(s.item_count, 5);
            assert_eq!(s.total_bytes, 13 + 14);
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    assert_eq!(local.writes(), local_writes(&["d.jpg", "e.jpg"]));
    assert!(resumable(&c).await.is_none());
    assert_all_photos(&remote, &local);

    Ok(())
}

#[tokio::test]
async fn completed_items_in_checkpoint_are_skipped() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    seed_checkpoint(dir.path(), &["a.jpg", "b.jpg", "c.jpg"], 5, chrono::Duration::minutes(5))
        .await?;

    let remote = photo_share();
    let local = MemoryStore::new();
    let c = coordinator(&remote, &local, config(dir.path()));

    assert!(c.start_transfer(photos_request()).await?.wait().await.is_completed());

    assert_eq!(local.writes(), local_writes(&["d.jpg", "e.jpg"]));
    assert!(resumable(&c).await.is_none());
    assert!(c.checkpoints().list().await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn immediate_cancel_leaves_nothing_behind() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let remote = photo_share();
    let local = MemoryStore::new();
    let c = coordinator(&remote, &local, config(dir.path()));

    let handle = c.start_transfer(photos_request()).await?;
    assert!(c.cancel_active_transfer().await);

    assert!(matches!(handle.wait().await, TransferOutcome::Cancelled));
    assert_eq!(c.state(), TransferState::Cancelled);
    assert!(local.writes().is_empty());
    assert!(!local.has_dir("/local/photos"));
    assert!(resumable(&c).await.is_none());

    assert!(c.reset().await);
    assert_eq!(c.state(), TransferState::Idle);

    Ok(())
}

#[tokio::test]
async fn cancel_mid_folder_keeps_checkpoint_and_stops_writing() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let remote = photo_share();
    remote.hold_read("/share/photos/c.jpg");
    let local = MemoryStore::new();
    let c = coordinator(&remote, &local, config(dir.path()));

    let handle = c.start_transfer(photos_request()).await?;
    let mut feed = remote.take_held("/share/photos/c.jpg").await;

    handle.cancel();
    feed.write_all(&[9u8; 4]).await?;
    assert!(matches!(handle.wait().await, TransferOutcome::Cancelled));

    // c.jpg was opened but never written to; nothing after it was touched.
    assert_eq!(local.writes(), local_writes(&["a.jpg", "b.jpg", "c.jpg"]));
    assert_eq!(local.file("/local/photos/c.jpg"), Some(Vec::new()));

    let checkpoint = resumable(&c).await.expect("checkpoint kept after cancel");
    assert_eq!(
        checkpoint.completed_items.iter().collect::<Vec<_>>(),
        vec!["a.jpg", "b.jpg"]
    );

    remote.clear_faults();
    local.clear_writes();
    assert!(c.start_transfer(photos_request()).await?.wait().await.is_completed());

    assert_eq!(local.writes(), local_writes(&["c.jpg", "d.jpg", "e.jpg"]));
    assert_all_photos(&remote, &local);
    assert!(resumable(&c).await.is_none());

    Ok(())
}

#[tokio::test]
async fn expired_checkpoint_is_discarded() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let remote = photo_share();
    let local = MemoryStore::new();
    let c = coordinator(&remote, &local, config(dir.path()));

    seed_checkpoint(dir.path(), &["a.jpg", "b.jpg", "c.jpg"], 5, chrono::Duration::hours(25))
        .await?;
    assert!(resumable(&c).await.is_none());
    assert!(c.checkpoints().list().await?.is_empty());

    seed_checkpoint(dir.path(), &["a.jpg", "b.jpg", "c.jpg"], 5, chrono::Duration::hours(25))
        .await?;
    assert!(c.start_transfer(photos_request()).await?.wait().await.is_completed());
    assert_eq!(local.writes(), local_writes(&PHOTOS));

    Ok(())
}

#[tokio::test]
async fn purge_removes_only_expired_checkpoints() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let remote = photo_share();
    let local = MemoryStore::new();
    let c = coordinator(&remote, &local, config(dir.path()));

    seed_checkpoint(dir.path(), &["a.jpg"], 5, chrono::Duration::hours(30)).await?;
    assert_eq!(c.purge_expired_checkpoints().await?, 1);

    seed_checkpoint(dir.path(), &["a.jpg"], 5, chrono::Duration::hours(1)).await?;
    assert_eq!(c.purge_expired_checkpoints().await?, 0);
    assert!(resumable(&c).await.is_some());

    Ok(())
}

#[tokio::test]
async fn unreadable_checkpoint_starts_fresh() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let key = CheckpointKey::from(&photos_request());
    std::fs::write(dir.path().join(key.file_name()), b"{ not json")?;

    let remote = photo_share();
    let local = MemoryStore::new();
    let c = coordinator(&remote, &local, config(dir.path()));

    assert!(c.start_transfer(photos_request()).await?.wait().await.is_completed());
    assert_eq!(local.writes(), local_writes(&PHOTOS));
    assert!(!dir.path().join(key.file_name()).exists());

    Ok(())
}

#[tokio::test]
async fn write_failure_reports_partial_progress() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let remote = photo_share();
    let local = MemoryStore::new();
    local.fail_write("/local/photos/b.jpg");
    let c = coordinator(&remote, &local, config(dir.path()));

    match c.start_transfer(photos_request()).await?.wait().await {
        TransferOutcome::Failed(e @ TransferError::PartialFailure { .. }) => {
            let msg = e.to_string();
            assert!(msg.contains("b.jpg"));
            assert!(msg.contains("1 of 5"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    assert_eq!(c.state(), TransferState::Idle);
    assert_eq!(resumable(&c).await.map(|cp| cp.completed_count()), Some(1));

    Ok(())
}

#[tokio::test]
async fn vanished_items_are_dropped_on_resume() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    seed_checkpoint(dir.path(), &["a.jpg", "b.jpg"], 5, chrono::Duration::minutes(1)).await?;

    let remote = photo_share();
    remote.remove_file("/share/photos/a.jpg");
    let local = MemoryStore::new();
    let c = coordinator(&remote, &local, config(dir.path()));

    match c.start_transfer(photos_request()).await?.wait().await {
        TransferOutcome::Completed(s) => assert_eq!(s.item_count, 4),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(local.writes(), local_writes(&["c.jpg", "d.jpg", "e.jpg"]));

    Ok(())
}

#[tokio::test]
async fn changed_source_declines_checkpoint_when_strict() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    seed_checkpoint(dir.path(), &["a.jpg", "b.jpg"], 5, chrono::Duration::minutes(1)).await?;

    let remote = photo_share();
    remote.remove_file("/share/photos/a.jpg");
    let local = MemoryStore::new();
    let mut cfg = config(dir.path());
    cfg.drop_missing_on_resume = false;
    let c = coordinator(&remote, &local, cfg);

    assert!(c.start_transfer(photos_request()).await?.wait().await.is_completed());
    assert_eq!(
        local.writes(),
        local_writes(&["b.jpg", "c.jpg", "d.jpg", "e.jpg"])
    );

    Ok(())
}

fn directory_progress(
    rx: &mut tokio::sync::broadcast::Receiver<TransferState>,
) -> Vec<(u64, u64, u64)> {
    let mut seen = vec![];
    while let Ok(s) = rx.try_recv() {
        if let TransferState::Running(TransferProgress::Directory {
            completed_items,
            total_items,
            bytes_sent,
            ..
        }) = s
        {
            seen.push((completed_items, total_items, bytes_sent));
        }
    }
    seen
}

fn assert_monotonic(seen: &[(u64, u64, u64)]) {
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|(done, total, _)| done <= total));
    assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0 && w[0].2 <= w[1].2));
}

#[tokio::test]
async fn completed_count_only_grows() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let remote = photo_share();
    let local = MemoryStore::new();
    let c = coordinator(&remote, &local, config(dir.path()));

    let mut transitions = c.transitions();
    assert!(c.start_transfer(photos_request()).await?.wait().await.is_completed());

    let seen = directory_progress(&mut transitions);
    assert_monotonic(&seen);
    assert_eq!(seen.first().map(|s| s.0), Some(0));
    assert_eq!(seen.last().copied(), Some((5, 5, 10 + 11 + 12 + 13 + 14)));

    Ok(())
}

#[tokio::test]
async fn resumed_progress_starts_from_checkpoint() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    seed_checkpoint(dir.path(), &["a.jpg", "b.jpg", "c.jpg"], 5, chrono::Duration::minutes(1))
        .await?;

    let remote = photo_share();
    let local = MemoryStore::new();
    let c = coordinator(&remote, &local, config(dir.path()));

    let mut transitions = c.transitions();
    match c.start_transfer(photos_request()).await?.wait().await {
        TransferOutcome::Completed(s) => assert_eq!(s.total_bytes, 13 + 14),
        other => panic!("unexpected outcome {:?}", other),
    }

    let seen = directory_progress(&mut transitions);
    assert_monotonic(&seen);
    assert_eq!(seen.first().map(|s| (s.0, s.1)), Some((3, 5)));
    // Seeded items carried 10 bytes each; every new item is counted exactly once.
    assert_eq!(seen.last().copied(), Some((5, 5, 30 + 13 + 14)));

    Ok(())
}
