//! Registry Integration Tests
//!
//! Concurrent claims, restart recovery and failure bookkeeping against an
//! on-disk database.

use meetvault::domain::{
    BackendKind, Fingerprint, ItemFailure, ItemIdentity, StageKind, StorageLocation, WorkItem,
    WorkItemState,
};
use meetvault::registry::{Registry, RegistryError};
use tempfile::TempDir;

fn item(id: &str) -> WorkItem {
    WorkItem::discovered(
        ItemIdentity::new(format!("local:{}", id)),
        Fingerprint::sha256(id),
        StorageLocation::new(BackendKind::Local, format!("/in/{}.mp4", id)),
        format!("{}.mp4", id),
        1024,
    )
}

#[tokio::test]
async fn test_concurrent_claims_have_one_winner() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("registry.sqlite");
    let registry = Registry::open(&path).unwrap();
    let contested = item("contested");
    registry.mark_queued(&contested).await.unwrap();

    // Separate connections, as two processes would have
    let mut handles = Vec::new();
    for _ in 0..8 {
        let registry = Registry::open(&path).unwrap();
        let identity = contested.identity.clone();
        handles.push(tokio::spawn(async move {
            registry.mark_processing(&identity).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(claimed) => {
                winners += 1;
                assert_eq!(claimed.attempt_count, 1);
            }
            Err(RegistryError::AlreadyProcessing(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(winners, 1);

    let record = registry.get(&contested.identity).await.unwrap().unwrap();
    assert_eq!(record.item.state, WorkItemState::Processing);
}

#[tokio::test]
async fn test_restart_requeues_only_in_flight_items() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("registry.sqlite");
    let (done, busy, waiting) = (item("done"), item("busy"), item("waiting"));

    {
        let registry = Registry::open(&path).unwrap();
        for i in [&done, &busy, &waiting] {
            registry.mark_queued(i).await.unwrap();
        }
        registry.mark_processing(&done.identity).await.unwrap();
        registry.mark_completed(&done.identity).await.unwrap();
        registry.mark_processing(&busy.identity).await.unwrap();
        // Process dies here
    }

    let registry = Registry::open(&path).unwrap();
    let recovered = registry.recover_in_flight().await.unwrap();
    assert_eq!(recovered, vec![busy.identity.clone()]);

    let queued: Vec<ItemIdentity> = registry
        .list(Some(WorkItemState::Queued))
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.item.identity)
        .collect();
    assert_eq!(queued.len(), 2);
    assert!(queued.contains(&busy.identity));
    assert!(queued.contains(&waiting.identity));

    let status = registry.status().await.unwrap();
    assert_eq!(status.completed, 1);
    assert_eq!(status.processing, 0);
}

#[tokio::test]
async fn test_failure_is_recorded_with_stage_and_history() {
    let temp = TempDir::new().unwrap();
    let registry = Registry::open(&temp.path().join("registry.sqlite")).unwrap();
    let broken = item("broken");
    registry.mark_queued(&broken).await.unwrap();
    registry.mark_processing(&broken.identity).await.unwrap();

    let failure = ItemFailure::Stage {
        stage: StageKind::Transcription,
        cause: "whisper exited with status 1".to_string(),
    };
    registry.mark_failed(&broken.identity, &failure).await.unwrap();

    let record = registry.get(&broken.identity).await.unwrap().unwrap();
    assert_eq!(record.item.state, WorkItemState::Failed);
    assert_eq!(record.failed_stage.as_deref(), Some("transcription"));
    assert!(record
        .item
        .last_error
        .as_deref()
        .unwrap()
        .contains("whisper exited"));

    // Manual retry, then a second claim counts as a new attempt
    registry.retry(&broken.identity, "manual retry").await.unwrap();
    let second = registry.mark_processing(&broken.identity).await.unwrap();
    assert_eq!(second.attempt_count, 2);

    let history: Vec<WorkItemState> = registry
        .history(&broken.identity)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.to)
        .collect();
    assert_eq!(
        history,
        vec![
            WorkItemState::Queued,
            WorkItemState::Processing,
            WorkItemState::Failed,
            WorkItemState::Queued,
            WorkItemState::Processing,
        ]
    );
}

#[tokio::test]
async fn test_completed_item_cannot_be_claimed_again() {
    let temp = TempDir::new().unwrap();
    let registry = Registry::open(&temp.path().join("registry.sqlite")).unwrap();
    let a = item("a");
    registry.mark_queued(&a).await.unwrap();
    registry.mark_processing(&a.identity).await.unwrap();
    registry.mark_completed(&a.identity).await.unwrap();

    assert!(matches!(
        registry.mark_processing(&a.identity).await,
        Err(RegistryError::InvalidTransition {
            from: WorkItemState::Completed,
            ..
        })
    ));
}

#[tokio::test]
async fn test_concurrent_writers_from_separate_connections() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("registry.sqlite");
    let registry = Registry::open(&path).unwrap();
    let shared = item("shared");

    // Every connection registers its own item and races on a shared one
    let mut handles = Vec::new();
    for n in 0..8 {
        let registry = Registry::open(&path).unwrap();
        let own = item(&format!("own-{}", n));
        let shared = shared.clone();
        handles.push(tokio::spawn(async move {
            registry.mark_queued(&own).await?;
            registry.mark_queued(&shared).await
        }));
    }

    let mut queued = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().is_new() {
            queued += 1;
        }
    }
    assert_eq!(queued, 1);

    let status = registry.status().await.unwrap();
    assert_eq!(status.queued, 9);
}
