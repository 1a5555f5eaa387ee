//! Coordinator actor integration tests: claims, zones, handoffs, agents,
//! chat, and the work bundle.

mod harness;

use harness::{hub, millis, minutes, t0};

use waggle_hub::actors::{
    ActorError, AgentUpsert, CreateHandoff, CreateTask, TaskPatch, CHAT_WINDOW,
};
use waggle_events::{AgentStatus, AuthorType, HandoffStatus, TaskStatus};

// -----------------------------------------------------------------------------
// Claims
// -----------------------------------------------------------------------------

#[tokio::test]
async fn foreign_claim_conflicts_until_stale() {
    let hub = hub().await;
    let coordinator = hub.coordinator().await;

    coordinator
        .claim("file.ts", "agentA", "editing", t0())
        .await
        .unwrap();

    // Within 30 minutes a different owner gets Conflict carrying the record.
    let err = coordinator
        .claim("file.ts", "agentB", "also editing", t0() + minutes(10))
        .await
        .unwrap_err();
    match err {
        ActorError::Conflict { current, .. } => {
            assert_eq!(current["claimed_by"], "agentA");
        }
        other => panic!("expected Conflict, got {other:?}"),
    }

    // Past the stale threshold the claim is silently reclaimable.
    let claim = coordinator
        .claim("file.ts", "agentB", "taking over", t0() + minutes(31))
        .await
        .unwrap();
    assert_eq!(claim.claimed_by, "agentB");

    let claims = coordinator.list_claims(t0() + minutes(31)).await.unwrap();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].claimed_by, "agentB");
}

#[tokio::test]
async fn same_owner_reclaim_refreshes() {
    let hub = hub().await;
    let coordinator = hub.coordinator().await;

    coordinator.claim("api", "agentA", "", t0()).await.unwrap();
    let refreshed = coordinator
        .claim("api", "agentA", "still on it", t0() + minutes(20))
        .await
        .unwrap();
    assert_eq!(refreshed.since, t0() + minutes(20));
}

#[tokio::test]
async fn stale_claims_are_flagged_not_removed() {
    let hub = hub().await;
    let coordinator = hub.coordinator().await;

    coordinator.claim("db", "agentA", "", t0()).await.unwrap();

    let fresh = coordinator.list_claims(t0() + minutes(29)).await.unwrap();
    assert!(!fresh[0].stale);

    let later = coordinator.list_claims(t0() + minutes(31)).await.unwrap();
    assert_eq!(later.len(), 1);
    assert!(later[0].stale);
}

#[tokio::test]
async fn release_claim_requires_owner() {
    let hub = hub().await;
    let coordinator = hub.coordinator().await;

    coordinator.claim("cfg", "agentA", "", t0()).await.unwrap();

    let err = coordinator.release_claim("cfg", "agentB").await.unwrap_err();
    assert!(matches!(err, ActorError::Forbidden(_)));

    coordinator.release_claim("cfg", "agentA").await.unwrap();

    let err = coordinator.release_claim("cfg", "agentA").await.unwrap_err();
    assert!(matches!(err, ActorError::NotFound(_)));
}

// -----------------------------------------------------------------------------
// Zones
// -----------------------------------------------------------------------------

#[tokio::test]
async fn zone_prefix_match_and_release() {
    let hub = hub().await;
    let coordinator = hub.coordinator().await;

    coordinator
        .claim_zone("frontend", "src/ui", "agentA", "ui work", t0())
        .await
        .unwrap();

    let hit = coordinator.check_zone("src/ui/button.rs").await.unwrap();
    assert_eq!(hit.unwrap().zone_id, "frontend");

    let miss = coordinator.check_zone("src/api/mod.rs").await.unwrap();
    assert!(miss.is_none());

    let err = coordinator
        .release_zone("frontend", "agentB")
        .await
        .unwrap_err();
    assert!(matches!(err, ActorError::Forbidden(_)));

    coordinator.release_zone("frontend", "agentA").await.unwrap();
    assert!(coordinator.check_zone("src/ui/button.rs").await.unwrap().is_none());
}

#[tokio::test]
async fn overlapping_zones_oldest_claim_wins() {
    let hub = hub().await;
    let coordinator = hub.coordinator().await;

    coordinator
        .claim_zone("broad", "src", "agentA", "", t0())
        .await
        .unwrap();
    coordinator
        .claim_zone("narrow", "src/ui", "agentB", "", t0() + millis(5))
        .await
        .unwrap();

    let hit = coordinator.check_zone("src/ui/button.rs").await.unwrap();
    assert_eq!(hit.unwrap().zone_id, "broad");
}

// -----------------------------------------------------------------------------
// Handoffs
// -----------------------------------------------------------------------------

fn handoff(from: &str, to: Option<&str>) -> CreateHandoff {
    CreateHandoff {
        from_agent: from.to_string(),
        to_agent: to.map(str::to_string),
        title: "finish the parser".to_string(),
        context: "half-done".to_string(),
        code: None,
        file_path: Some("src/parser.rs".to_string()),
        next_steps: vec!["wire error recovery".to_string()],
        priority: None,
    }
}

#[tokio::test]
async fn handoff_advances_pending_claimed_completed() {
    let hub = hub().await;
    let coordinator = hub.coordinator().await;

    let created = coordinator
        .create_handoff(handoff("agentA", None), t0())
        .await
        .unwrap();
    assert_eq!(created.status, HandoffStatus::Pending);

    let claimed = coordinator
        .claim_handoff(created.handoff_id, "agentB", t0() + minutes(1))
        .await
        .unwrap();
    assert_eq!(claimed.status, HandoffStatus::Claimed);
    assert_eq!(claimed.claimed_by.as_deref(), Some("agentB"));

    // A third agent loses the race once the claim landed.
    let err = coordinator
        .claim_handoff(created.handoff_id, "agentC", t0() + minutes(2))
        .await
        .unwrap_err();
    assert!(matches!(err, ActorError::Conflict { .. }));

    // Only the claimer may complete.
    let err = coordinator
        .complete_handoff(created.handoff_id, "agentC", t0() + minutes(3))
        .await
        .unwrap_err();
    assert!(matches!(err, ActorError::Forbidden(_)));

    let completed = coordinator
        .complete_handoff(created.handoff_id, "agentB", t0() + minutes(4))
        .await
        .unwrap();
    assert_eq!(completed.status, HandoffStatus::Completed);
    assert!(completed.completed_at.is_some());
}

#[tokio::test]
async fn handoff_complete_before_claim_fails() {
    let hub = hub().await;
    let coordinator = hub.coordinator().await;

    let created = coordinator
        .create_handoff(handoff("agentA", None), t0())
        .await
        .unwrap();

    let err = coordinator
        .complete_handoff(created.handoff_id, "agentB", t0())
        .await
        .unwrap_err();
    assert!(matches!(err, ActorError::Conflict { .. }));
}

#[tokio::test]
async fn pinned_handoff_rejects_other_agents() {
    let hub = hub().await;
    let coordinator = hub.coordinator().await;

    let created = coordinator
        .create_handoff(handoff("agentA", Some("agentB")), t0())
        .await
        .unwrap();

    let err = coordinator
        .claim_handoff(created.handoff_id, "agentC", t0())
        .await
        .unwrap_err();
    assert!(matches!(err, ActorError::Forbidden(_)));

    let claimed = coordinator
        .claim_handoff(created.handoff_id, "agentB", t0())
        .await
        .unwrap();
    assert_eq!(claimed.status, HandoffStatus::Claimed);
}

// -----------------------------------------------------------------------------
// Agents
// -----------------------------------------------------------------------------

#[tokio::test]
async fn heartbeat_merges_and_advances_last_seen() {
    let hub = hub().await;
    let coordinator = hub.coordinator().await;

    coordinator
        .upsert_agent(
            AgentUpsert {
                agent_id: "alpha".to_string(),
                status: Some(AgentStatus::Active),
                current_task: Some("parser".to_string()),
                capabilities: Some(vec!["rust".to_string()]),
                ..Default::default()
            },
            t0(),
        )
        .await
        .unwrap();

    // A bare heartbeat keeps everything but the timestamp.
    let merged = coordinator
        .upsert_agent(
            AgentUpsert {
                agent_id: "alpha".to_string(),
                ..Default::default()
            },
            t0() + minutes(5),
        )
        .await
        .unwrap();
    assert_eq!(merged.status, AgentStatus::Active);
    assert_eq!(merged.current_task.as_deref(), Some("parser"));
    assert_eq!(merged.capabilities, vec!["rust".to_string()]);
    assert_eq!(merged.last_seen, t0() + minutes(5));
}

#[tokio::test]
async fn active_agents_list_most_recent_first() {
    let hub = hub().await;
    let coordinator = hub.coordinator().await;

    for (agent_id, offset) in [("alpha", 0), ("beta", 2), ("gamma", 1)] {
        coordinator
            .upsert_agent(
                AgentUpsert {
                    agent_id: agent_id.to_string(),
                    status: Some(AgentStatus::Active),
                    ..Default::default()
                },
                t0() + minutes(offset),
            )
            .await
            .unwrap();
    }
    coordinator
        .upsert_agent(
            AgentUpsert {
                agent_id: "idle".to_string(),
                status: Some(AgentStatus::Offline),
                ..Default::default()
            },
            t0() + minutes(9),
        )
        .await
        .unwrap();

    let active = coordinator
        .list_agents(Some(AgentStatus::Active))
        .await
        .unwrap();
    let names: Vec<&str> = active.iter().map(|a| a.agent_id.as_str()).collect();
    assert_eq!(names, vec!["beta", "gamma", "alpha"]);
}

#[tokio::test]
async fn disconnect_flips_offline() {
    let hub = hub().await;
    let coordinator = hub.coordinator().await;

    coordinator
        .upsert_agent(
            AgentUpsert {
                agent_id: "alpha".to_string(),
                ..Default::default()
            },
            t0(),
        )
        .await
        .unwrap();

    let agent = coordinator
        .agent_disconnected("alpha", t0() + minutes(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(agent.status, AgentStatus::Offline);

    // Unknown agents are a no-op, not an error.
    assert!(coordinator
        .agent_disconnected("ghost", t0())
        .await
        .unwrap()
        .is_none());
}

// -----------------------------------------------------------------------------
// Chat
// -----------------------------------------------------------------------------

#[tokio::test]
async fn chat_window_trims_oldest() {
    let hub = hub().await;
    let coordinator = hub.coordinator().await;

    let first = coordinator
        .append_chat("alpha", AuthorType::Agent, "message zero", t0())
        .await
        .unwrap();
    for i in 1..=CHAT_WINDOW {
        coordinator
            .append_chat("alpha", AuthorType::Agent, &format!("message {i}"), t0() + millis(i))
            .await
            .unwrap();
    }

    let messages = coordinator.recent_chat(CHAT_WINDOW).await.unwrap();
    assert_eq!(messages.len(), CHAT_WINDOW as usize);
    assert!(messages.iter().all(|m| m.message_id != first.message_id));
    // Chronological order, newest last.
    assert_eq!(messages.last().unwrap().text, format!("message {CHAT_WINDOW}"));
}

#[tokio::test]
async fn reactions_accumulate_without_duplicates() {
    let hub = hub().await;
    let coordinator = hub.coordinator().await;

    let message = coordinator
        .append_chat("alpha", AuthorType::Agent, "shipped it", t0())
        .await
        .unwrap();

    coordinator.react(message.message_id, "🎉", "beta").await.unwrap();
    coordinator.react(message.message_id, "🎉", "beta").await.unwrap();
    let reacted = coordinator
        .react(message.message_id, "🎉", "gamma")
        .await
        .unwrap();

    assert_eq!(reacted.reactions["🎉"], vec!["beta", "gamma"]);
}

// -----------------------------------------------------------------------------
// Tasks and the work bundle
// -----------------------------------------------------------------------------

#[tokio::test]
async fn work_bundle_collects_the_hot_start_view() {
    let hub = hub().await;
    let coordinator = hub.coordinator().await;

    coordinator
        .upsert_agent(
            AgentUpsert {
                agent_id: "alpha".to_string(),
                status: Some(AgentStatus::Active),
                ..Default::default()
            },
            t0(),
        )
        .await
        .unwrap();

    let todo = coordinator
        .create_task(
            CreateTask {
                title: "triage flaky test".to_string(),
                description: String::new(),
                status: None,
                assignee: None,
                created_by: "alpha".to_string(),
                priority: None,
                tags: vec![],
                files: vec![],
            },
            t0(),
        )
        .await
        .unwrap();
    assert_eq!(todo.status, TaskStatus::Todo);

    let mine = coordinator
        .create_task(
            CreateTask {
                title: "port the codec".to_string(),
                description: String::new(),
                status: Some(TaskStatus::InProgress),
                assignee: Some("beta".to_string()),
                created_by: "alpha".to_string(),
                priority: Some("high".to_string()),
                tags: vec!["codec".to_string()],
                files: vec![],
            },
            t0() + millis(1),
        )
        .await
        .unwrap();

    coordinator
        .append_chat("alpha", AuthorType::Agent, "starting on the codec", t0())
        .await
        .unwrap();

    let bundle = coordinator.work_bundle("beta", t0() + minutes(1)).await.unwrap();
    assert_eq!(bundle.active_agents.len(), 1);
    assert_eq!(bundle.todo_tasks.len(), 1);
    assert_eq!(bundle.todo_tasks[0].task_id, todo.task_id);
    assert_eq!(bundle.my_tasks.len(), 1);
    assert_eq!(bundle.my_tasks[0].task_id, mine.task_id);
    assert_eq!(bundle.recent_chat.len(), 1);
}

#[tokio::test]
async fn task_updates_are_free_form() {
    let hub = hub().await;
    let coordinator = hub.coordinator().await;

    let task = coordinator
        .create_task(
            CreateTask {
                title: "spike".to_string(),
                description: String::new(),
                status: Some(TaskStatus::Done),
                assignee: None,
                created_by: "alpha".to_string(),
                priority: None,
                tags: vec![],
                files: vec![],
            },
            t0(),
        )
        .await
        .unwrap();

    // done → todo is allowed; there is no task state machine.
    let reopened = coordinator
        .update_task(
            task.task_id,
            TaskPatch {
                status: Some(TaskStatus::Todo),
                assignee: Some("beta".to_string()),
                ..Default::default()
            },
            t0() + minutes(1),
        )
        .await
        .unwrap();
    assert_eq!(reopened.status, TaskStatus::Todo);
    assert_eq!(reopened.assignee.as_deref(), Some("beta"));
    assert_eq!(reopened.updated_at, t0() + minutes(1));

    let err = coordinator
        .update_task(waggle_id::TaskId::new(), TaskPatch::default(), t0())
        .await
        .unwrap_err();
    assert!(matches!(err, ActorError::NotFound(_)));
}
