//! Agent state actor integration tests: checkpoint, inbox, memory, and
//! per-agent isolation.

mod harness;

use harness::{hub, millis, minutes, t0};

use waggle_events::AuthorType;
use waggle_hub::actors::SaveCheckpoint;

fn checkpoint(summary: &str) -> SaveCheckpoint {
    SaveCheckpoint {
        conversation_summary: summary.to_string(),
        accomplishments: vec!["ported the lexer".to_string()],
        pending_work: vec!["finish error recovery".to_string()],
        recent_context: "was mid-way through parser.rs".to_string(),
        files_edited: vec!["src/parser.rs".to_string()],
    }
}

#[tokio::test]
async fn checkpoint_is_a_single_replaced_row() {
    let hub = hub().await;
    let agent = hub.agent("alpha").await;

    assert!(agent.checkpoint().await.unwrap().is_none());

    agent.save_checkpoint(checkpoint("first"), t0()).await.unwrap();
    agent
        .save_checkpoint(checkpoint("second"), t0() + minutes(5))
        .await
        .unwrap();

    let current = agent.checkpoint().await.unwrap().unwrap();
    assert_eq!(current.conversation_summary, "second");
    assert_eq!(current.saved_at, t0() + minutes(5));

    let state = agent.state().await.unwrap();
    assert_eq!(
        state.checkpoint.unwrap().conversation_summary,
        "second"
    );
}

#[tokio::test]
async fn inbox_reads_newest_first_and_marks_read() {
    let hub = hub().await;
    let agent = hub.agent("alpha").await;

    let first = agent
        .add_message("beta", AuthorType::Agent, "claim the parser?", t0())
        .await
        .unwrap();
    agent
        .add_message("human", AuthorType::Human, "ship it today", t0() + millis(10))
        .await
        .unwrap();

    let messages = agent.messages(false).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].text, "ship it today");
    assert!(!messages[0].read);

    agent.mark_read(&[first.message_id]).await.unwrap();
    let unread = agent.messages(true).await.unwrap();
    assert_eq!(unread.len(), 1);
    assert_eq!(unread[0].text, "ship it today");

    let state = agent.state().await.unwrap();
    assert_eq!(state.unread_count, 1);
}

#[tokio::test]
async fn inbox_is_bounded() {
    let hub = hub().await;
    let agent = hub.agent("alpha").await;

    for i in 0..110_i64 {
        agent
            .add_message("beta", AuthorType::Agent, &format!("note {i}"), t0() + millis(i))
            .await
            .unwrap();
    }

    let messages = agent.messages(false).await.unwrap();
    assert_eq!(messages.len(), 100);
    // The oldest ten fell off.
    assert!(messages.iter().all(|m| m.text != "note 9"));
    assert_eq!(messages[0].text, "note 109");
}

#[tokio::test]
async fn memory_filters_by_category_and_text() {
    let hub = hub().await;
    let agent = hub.agent("alpha").await;

    agent
        .add_memory(
            "gotcha",
            "the scheduler double-fires on DST changes",
            vec!["scheduler".to_string(), "time".to_string()],
            t0(),
        )
        .await
        .unwrap();
    agent
        .add_memory(
            "gotcha",
            "sqlite busy timeouts under WAL",
            vec!["storage".to_string()],
            t0() + millis(10),
        )
        .await
        .unwrap();
    agent
        .add_memory("preference", "team prefers small PRs", vec![], t0() + millis(20))
        .await
        .unwrap();

    let gotchas = agent.memories(Some("gotcha"), None).await.unwrap();
    assert_eq!(gotchas.len(), 2);

    // Free-text match over content...
    let by_content = agent.memories(None, Some("scheduler")).await.unwrap();
    assert_eq!(by_content.len(), 1);

    // ...and over tags.
    let by_tag = agent.memories(None, Some("storage")).await.unwrap();
    assert_eq!(by_tag.len(), 1);
    assert!(by_tag[0].content.contains("busy timeouts"));

    let none = agent.memories(Some("gotcha"), Some("PRs")).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn memory_queries_cap_at_fifty() {
    let hub = hub().await;
    let agent = hub.agent("alpha").await;

    for i in 0..60_i64 {
        agent
            .add_memory("log", &format!("entry {i}"), vec![], t0() + millis(i))
            .await
            .unwrap();
    }

    let memories = agent.memories(Some("log"), None).await.unwrap();
    assert_eq!(memories.len(), 50);
    assert_eq!(memories[0].content, "entry 59");
}

#[tokio::test]
async fn agents_do_not_see_each_other() {
    let hub = hub().await;
    let alpha = hub.agent("alpha").await;
    let beta = hub.agent("beta").await;

    alpha
        .add_message("gamma", AuthorType::Agent, "for alpha only", t0())
        .await
        .unwrap();
    alpha.save_checkpoint(checkpoint("alpha's"), t0()).await.unwrap();

    assert!(beta.messages(false).await.unwrap().is_empty());
    assert!(beta.checkpoint().await.unwrap().is_none());
}
