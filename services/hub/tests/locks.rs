//! Resource lock actor integration tests: mutual exclusion, TTL expiry,
//! forced release, and the release log.

mod harness;

use harness::{hub, millis, minutes, t0};

use waggle_events::ReleaseKind;
use waggle_hub::actors::{arm_expiry, ActorError, LOCK_HISTORY_CAP};
use waggle_hub::fanout::Fanout;
use waggle_hub::registry::ActorKind;

#[tokio::test]
async fn second_owner_conflicts_until_expiry() {
    let hub = hub().await;
    let lock = hub.lock("db-migration").await;

    lock.lock("agentA", "schema change", "migration", millis(1000), t0())
        .await
        .unwrap();

    // Before expiry: B gets Conflict with the standing grant.
    let err = lock
        .lock("agentB", "also migrating", "migration", millis(1000), t0() + millis(500))
        .await
        .unwrap_err();
    match err {
        ActorError::Conflict { current, .. } => assert_eq!(current["locked_by"], "agentA"),
        other => panic!("expected Conflict, got {other:?}"),
    }

    // After expiry: check reports unlocked and B can take it.
    assert!(lock.check(t0() + millis(1100)).await.unwrap().is_none());
    let granted = lock
        .lock("agentB", "my turn", "migration", millis(1000), t0() + millis(1200))
        .await
        .unwrap();
    assert_eq!(granted.locked_by, "agentB");

    // The lapse is on the record.
    let history = lock.history().await.unwrap();
    assert_eq!(history[0].release, ReleaseKind::Expired);
    assert_eq!(history[0].locked_by, "agentA");
}

#[tokio::test]
async fn lock_call_itself_enforces_expiry() {
    let hub = hub().await;
    let lock = hub.lock("index").await;

    lock.lock("agentA", "", "file", millis(100), t0()).await.unwrap();

    // No check() in between: the expired grant must not block B.
    let granted = lock
        .lock("agentB", "", "file", millis(100), t0() + millis(200))
        .await
        .unwrap();
    assert_eq!(granted.locked_by, "agentB");
}

#[tokio::test]
async fn owner_renewal_extends_the_grant() {
    let hub = hub().await;
    let lock = hub.lock("build").await;

    lock.lock("agentA", "compiling", "job", minutes(1), t0())
        .await
        .unwrap();
    let renewed = lock
        .lock("agentA", "still compiling", "job", minutes(5), t0() + millis(30_000))
        .await
        .unwrap();

    assert_eq!(renewed.expires_at, t0() + millis(30_000) + minutes(5));
    let current = lock.check(t0() + minutes(4)).await.unwrap().unwrap();
    assert_eq!(current.locked_by, "agentA");
}

#[tokio::test]
async fn unlock_owner_force_and_missing() {
    let hub = hub().await;
    let lock = hub.lock("deploy").await;

    lock.lock("agentA", "deploying", "job", minutes(10), t0())
        .await
        .unwrap();

    let err = lock.unlock("agentB", false, t0()).await.unwrap_err();
    assert!(matches!(err, ActorError::Forbidden(_)));

    let kind = lock.unlock("agentB", true, t0() + millis(1)).await.unwrap();
    assert_eq!(kind, ReleaseKind::Stolen);

    let err = lock.unlock("agentA", false, t0() + millis(2)).await.unwrap_err();
    assert!(matches!(err, ActorError::NotFound(_)));

    lock.lock("agentA", "again", "job", minutes(10), t0() + millis(3))
        .await
        .unwrap();
    let kind = lock.unlock("agentA", false, t0() + millis(4)).await.unwrap();
    assert_eq!(kind, ReleaseKind::Manual);

    let history = lock.history().await.unwrap();
    // Newest first: manual release, then the steal.
    assert_eq!(history[0].release, ReleaseKind::Manual);
    assert_eq!(history[1].release, ReleaseKind::Stolen);
}

#[tokio::test]
async fn history_is_capped() {
    let hub = hub().await;
    let lock = hub.lock("hot-resource").await;

    for i in 0..(LOCK_HISTORY_CAP + 5) {
        let now = t0() + millis(i * 10);
        lock.lock("agentA", &format!("cycle {i}"), "file", millis(5), now)
            .await
            .unwrap();
        lock.unlock("agentA", false, now + millis(1)).await.unwrap();
    }

    let history = lock.history().await.unwrap();
    assert_eq!(history.len(), LOCK_HISTORY_CAP as usize);
    // The newest cycle survived the cap.
    assert_eq!(history[0].reason, format!("cycle {}", LOCK_HISTORY_CAP + 4));
}

#[tokio::test]
async fn expiry_alarm_releases_and_notifies() {
    let hub = hub().await;
    let cell = hub
        .registry
        .cell(ActorKind::Lock, "timed-resource")
        .await
        .unwrap();
    let lock = hub.lock("timed-resource").await;

    let fanout = Fanout::new();
    let (_conn, mut rx) = fanout.subscribe(ActorKind::Lock, "timed-resource", None);

    let now = chrono::Utc::now();
    let granted = lock
        .lock("agentA", "short lease", "file", millis(50), now)
        .await
        .unwrap();
    arm_expiry(cell, fanout.clone(), granted.expires_at);

    tokio::time::sleep(std::time::Duration::from_millis(150)).await;

    let push = rx.try_recv().expect("expiry should have been pushed");
    assert_eq!(push.kind, "lock-update");
    assert!(push.data["lock"].is_null());
    assert!(lock.check(chrono::Utc::now()).await.unwrap().is_none());
}
