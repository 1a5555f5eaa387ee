//! Soul/body lifecycle integration tests: burn-rate accounting, binding,
//! transfers, bundles, and the dashboard.

mod harness;

use harness::{hub, minutes, t0};

use waggle_events::{BodyStatus, BudgetLevel, MemoryImportance, TransferStatus};
use waggle_hub::actors::ActorError;
use waggle_hub::lifecycle::{
    CreateSoul, InitiateTransfer, Lifecycle, NewSoulMemory, SoulCheckpoint,
};
use waggle_id::SoulId;

fn soul_req(name: &str) -> CreateSoul {
    CreateSoul {
        name: name.to_string(),
        identity: "a careful refactoring specialist".to_string(),
    }
}

async fn bound_soul(lifecycle: &Lifecycle) -> (SoulId, waggle_id::BodyId) {
    let soul = lifecycle.create_soul(soul_req("mnemosyne"), t0()).await.unwrap();
    let body = lifecycle.spawn_body(t0()).await.unwrap();
    lifecycle.bind(soul.soul_id, body.body_id, t0()).await.unwrap();
    (soul.soul_id, body.body_id)
}

// -----------------------------------------------------------------------------
// Token accounting
// -----------------------------------------------------------------------------

#[tokio::test]
async fn burn_rate_is_ema_over_samples() {
    let hub = hub().await;
    let lifecycle = hub.lifecycle().await;
    let body = lifecycle.spawn_body(t0()).await.unwrap();

    // First sample stands alone: 6000 tokens in one minute.
    let report = lifecycle
        .update_tokens(body.body_id, 6000, t0() + minutes(1))
        .await
        .unwrap();
    assert!((report.body.burn_rate - 6000.0).abs() < 1e-9);

    // Second sample folds in at 0.7/0.3.
    let report = lifecycle
        .update_tokens(body.body_id, 9000, t0() + minutes(2))
        .await
        .unwrap();
    let expected = 0.7 * 6000.0 + 0.3 * 3000.0;
    assert!((report.body.burn_rate - expected).abs() < 1e-9);
    assert_eq!(report.body.peak_tokens, 9000);
}

#[tokio::test]
async fn budget_levels_follow_thresholds() {
    let hub = hub().await;
    let lifecycle = hub.lifecycle().await;
    let body = lifecycle.spawn_body(t0()).await.unwrap();

    // 0 → 160k in 5 minutes: warning territory, finite runway.
    let report = lifecycle
        .update_tokens(body.body_id, 160_000, t0() + minutes(5))
        .await
        .unwrap();
    assert_eq!(report.level, BudgetLevel::Warning);
    let eta = report.estimated_minutes_to_limit.unwrap();
    assert!(eta > 0);

    let report = lifecycle
        .update_tokens(body.body_id, 185_000, t0() + minutes(6))
        .await
        .unwrap();
    assert_eq!(report.level, BudgetLevel::Danger);
    assert!(report.estimated_minutes_to_limit.unwrap() >= 0);

    let report = lifecycle
        .update_tokens(body.body_id, 196_000, t0() + minutes(7))
        .await
        .unwrap();
    assert_eq!(report.level, BudgetLevel::Critical);
}

// -----------------------------------------------------------------------------
// Binding
// -----------------------------------------------------------------------------

#[tokio::test]
async fn bind_requires_free_soul_and_free_body() {
    let hub = hub().await;
    let lifecycle = hub.lifecycle().await;
    let (soul_id, body_id) = bound_soul(&lifecycle).await;

    // Soul already bound.
    let spare = lifecycle.spawn_body(t0()).await.unwrap();
    let err = lifecycle.bind(soul_id, spare.body_id, t0()).await.unwrap_err();
    assert!(matches!(err, ActorError::Conflict { .. }));

    // Body already hosting.
    let other = lifecycle.create_soul(soul_req("echo"), t0()).await.unwrap();
    let err = lifecycle.bind(other.soul_id, body_id, t0()).await.unwrap_err();
    assert!(matches!(err, ActorError::Conflict { .. }));

    let bound = lifecycle.get_body(body_id).await.unwrap();
    assert_eq!(bound.status, BodyStatus::Active);
    assert_eq!(bound.soul_id, Some(soul_id));
}

// -----------------------------------------------------------------------------
// Transfers
// -----------------------------------------------------------------------------

#[tokio::test]
async fn complete_transfer_moves_the_binding_exactly_once() {
    let hub = hub().await;
    let lifecycle = hub.lifecycle().await;
    let (soul_id, old_body_id) = bound_soul(&lifecycle).await;

    lifecycle
        .update_tokens(old_body_id, 190_000, t0() + minutes(10))
        .await
        .unwrap();

    let transfer = lifecycle
        .initiate_transfer(
            soul_id,
            InitiateTransfer {
                reason: "token budget critical".to_string(),
                to_body_id: None,
            },
            t0() + minutes(11),
        )
        .await
        .unwrap();
    assert_eq!(transfer.status, TransferStatus::Initiated);
    assert_eq!(transfer.tokens_saved, 190_000);

    let old = lifecycle.get_body(old_body_id).await.unwrap();
    assert_eq!(old.status, BodyStatus::Transferring);

    let completed = lifecycle
        .complete_transfer(transfer.transfer_id, t0() + minutes(12))
        .await
        .unwrap();
    assert_eq!(completed.status, TransferStatus::Completed);

    // Old body: terminated and unbound.
    let old = lifecycle.get_body(old_body_id).await.unwrap();
    assert_eq!(old.status, BodyStatus::Terminated);
    assert!(old.soul_id.is_none());

    // New body: active and bound; soul points at it.
    let soul = lifecycle.get_soul(soul_id).await.unwrap();
    assert_eq!(soul.current_body_id, Some(transfer.to_body_id));
    let new = lifecycle.get_body(transfer.to_body_id).await.unwrap();
    assert_eq!(new.status, BodyStatus::Active);
    assert_eq!(new.soul_id, Some(soul_id));

    // Exactly one non-terminated body is bound.
    let bodies = lifecycle.list_bodies(None).await.unwrap();
    let bound: Vec<_> = bodies.iter().filter(|b| b.soul_id == Some(soul_id)).collect();
    assert_eq!(bound.len(), 1);
    assert_eq!(bound[0].body_id, transfer.to_body_id);

    // Metrics and history advanced.
    assert_eq!(soul.metrics.transfer_count, 1);
    assert_eq!(soul.metrics.total_tokens_processed, 190_000);
    assert_eq!(soul.body_history.len(), 1);
    assert_eq!(soul.body_history[0].body_id, old_body_id);
    assert_eq!(soul.body_history[0].tokens_used, 190_000);

    // Terminal transfers refuse to run again.
    let err = lifecycle
        .complete_transfer(transfer.transfer_id, t0() + minutes(13))
        .await
        .unwrap_err();
    assert!(matches!(err, ActorError::Conflict { .. }));
}

#[tokio::test]
async fn initiate_requires_binding_and_no_inflight_transfer() {
    let hub = hub().await;
    let lifecycle = hub.lifecycle().await;

    let unbound = lifecycle.create_soul(soul_req("drift"), t0()).await.unwrap();
    let err = lifecycle
        .initiate_transfer(
            unbound.soul_id,
            InitiateTransfer {
                reason: "premature".to_string(),
                to_body_id: None,
            },
            t0(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ActorError::Conflict { .. }));

    let (soul_id, _) = bound_soul(&lifecycle).await;
    lifecycle
        .initiate_transfer(
            soul_id,
            InitiateTransfer {
                reason: "first".to_string(),
                to_body_id: None,
            },
            t0() + minutes(1),
        )
        .await
        .unwrap();

    let err = lifecycle
        .initiate_transfer(
            soul_id,
            InitiateTransfer {
                reason: "second".to_string(),
                to_body_id: None,
            },
            t0() + minutes(2),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ActorError::Conflict { .. }));
}

#[tokio::test]
async fn rollback_returns_the_old_body_to_duty() {
    let hub = hub().await;
    let lifecycle = hub.lifecycle().await;
    let (soul_id, old_body_id) = bound_soul(&lifecycle).await;

    let transfer = lifecycle
        .initiate_transfer(
            soul_id,
            InitiateTransfer {
                reason: "abort me".to_string(),
                to_body_id: None,
            },
            t0() + minutes(1),
        )
        .await
        .unwrap();

    let rolled = lifecycle
        .rollback_transfer(transfer.transfer_id, t0() + minutes(2))
        .await
        .unwrap();
    assert_eq!(rolled.status, TransferStatus::RolledBack);

    // Binding untouched; old body back to active.
    let soul = lifecycle.get_soul(soul_id).await.unwrap();
    assert_eq!(soul.current_body_id, Some(old_body_id));
    let old = lifecycle.get_body(old_body_id).await.unwrap();
    assert_eq!(old.status, BodyStatus::Active);

    // A new transfer can start now.
    lifecycle
        .initiate_transfer(
            soul_id,
            InitiateTransfer {
                reason: "retry".to_string(),
                to_body_id: None,
            },
            t0() + minutes(3),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn failed_transfer_records_the_error() {
    let hub = hub().await;
    let lifecycle = hub.lifecycle().await;
    let (soul_id, _) = bound_soul(&lifecycle).await;

    let transfer = lifecycle
        .initiate_transfer(
            soul_id,
            InitiateTransfer {
                reason: "doomed".to_string(),
                to_body_id: None,
            },
            t0() + minutes(1),
        )
        .await
        .unwrap();

    let failed = lifecycle
        .fail_transfer(transfer.transfer_id, "target never came up", t0() + minutes(2))
        .await
        .unwrap();
    assert_eq!(failed.status, TransferStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("target never came up"));
}

#[tokio::test]
async fn stuck_transfers_surface_on_the_dashboard() {
    let hub = hub().await;
    let lifecycle = hub.lifecycle().await;
    let (soul_id, body_id) = bound_soul(&lifecycle).await;

    lifecycle
        .update_tokens(body_id, 185_000, t0() + minutes(5))
        .await
        .unwrap();

    let transfer = lifecycle
        .initiate_transfer(
            soul_id,
            InitiateTransfer {
                reason: "danger".to_string(),
                to_body_id: None,
            },
            t0() + minutes(6),
        )
        .await
        .unwrap();

    let dashboard = lifecycle.dashboard().await.unwrap();
    assert_eq!(dashboard.active_transfers.len(), 1);
    assert_eq!(dashboard.active_transfers[0].transfer_id, transfer.transfer_id);
    assert_eq!(dashboard.souls.len(), 1);
    assert_eq!(dashboard.souls[0].level, Some(BudgetLevel::Danger));

    // Completing clears it.
    lifecycle
        .complete_transfer(transfer.transfer_id, t0() + minutes(7))
        .await
        .unwrap();
    let dashboard = lifecycle.dashboard().await.unwrap();
    assert!(dashboard.active_transfers.is_empty());
}

// -----------------------------------------------------------------------------
// Checkpoints and bundles
// -----------------------------------------------------------------------------

#[tokio::test]
async fn checkpoint_merges_and_bundle_trims() {
    let hub = hub().await;
    let lifecycle = hub.lifecycle().await;
    let soul = lifecycle.create_soul(soul_req("archive"), t0()).await.unwrap();

    let checkpoint = SoulCheckpoint {
        current_task: Some("migrating the schema".to_string()),
        blockers: Some(vec!["waiting on review".to_string()]),
        add_patterns: (0..25).map(|i| format!("pattern-{i}")).collect(),
        add_anti_patterns: (0..12).map(|i| format!("anti-{i}")).collect(),
        add_memories: (0..35)
            .map(|i| NewSoulMemory {
                content: format!("important-{i}"),
                importance: MemoryImportance::High,
            })
            .chain((0..10).map(|i| NewSoulMemory {
                content: format!("trivia-{i}"),
                importance: MemoryImportance::Low,
            }))
            .collect(),
        expertise: [("rust".to_string(), 0.9)].into_iter().collect(),
        tokens_processed: Some(42_000),
        ..Default::default()
    };
    let soul = lifecycle
        .checkpoint_soul(soul.soul_id, checkpoint, t0() + minutes(1))
        .await
        .unwrap();
    assert_eq!(soul.metrics.total_tokens_processed, 42_000);
    assert_eq!(soul.focus.current_task.as_deref(), Some("migrating the schema"));
    assert_eq!(soul.knowledge.expertise["rust"], 0.9);

    let bundle = lifecycle.bundle(soul.soul_id).await.unwrap();
    assert_eq!(bundle.patterns.len(), 20);
    // The tail of the pattern list survives.
    assert_eq!(bundle.patterns.last().unwrap(), "pattern-24");
    assert_eq!(bundle.anti_patterns.len(), 10);
    assert_eq!(bundle.memories.len(), 30);
    assert!(bundle
        .memories
        .iter()
        .all(|m| m.importance >= MemoryImportance::High));
}

#[tokio::test]
async fn checkpoint_accumulates_tokens_across_calls() {
    let hub = hub().await;
    let lifecycle = hub.lifecycle().await;
    let soul = lifecycle.create_soul(soul_req("tally"), t0()).await.unwrap();

    for delta in [1000, 2500] {
        lifecycle
            .checkpoint_soul(
                soul.soul_id,
                SoulCheckpoint {
                    tokens_processed: Some(delta),
                    ..Default::default()
                },
                t0() + minutes(1),
            )
            .await
            .unwrap();
    }

    let soul = lifecycle.get_soul(soul.soul_id).await.unwrap();
    assert_eq!(soul.metrics.total_tokens_processed, 3500);
}
