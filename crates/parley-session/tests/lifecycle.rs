mod common;

use chrono::{Duration, Utc};
use common::*;
use parley_session::{run_call, CallOutcome, CleanupState, SessionEvent};
use parley_types::{
    format_transcript, ConversationMemory, Direction, ExtractionVariable, PiiMode, Speaker,
    TranscriptEntry,
};
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;

#[tokio::test]
async fn racing_end_signals_settle_once() {
    let mut cfg = config();
    cfg.memory.enabled = true;
    let h = Harness::new(FakeStore::with_tenant(cfg));
    let mut controller = h.controller(Direction::Inbound, Some("rec-1"), Utc::now()).await;
    controller.start().await;
    controller.dispatch(content("assistant", "Hello!")).await;
    controller.dispatch(content("user", "Bye now.")).await;

    controller
        .dispatch(SessionEvent::ParticipantDisconnected {
            identity: CALLER_IDENTITY.to_string(),
        })
        .await;
    controller.dispatch(SessionEvent::RoomDisconnected).await;
    let reply = invoke(&mut controller, "end_call", serde_json::json!({})).await;

    assert_eq!(reply, "The call has already ended.");
    assert_eq!(controller.session().cleanup_state(), CleanupState::Done);
    assert_eq!(h.store.updates.lock().unwrap().len(), 1);
    assert_eq!(h.store.deductions.lock().unwrap().len(), 1);
    assert_eq!(h.store.saved_memories.lock().unwrap().len(), 1);
    assert_eq!(h.engine.stopped.lock().unwrap().len(), 1);
    assert_eq!(h.rooms.deleted.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn end_call_capability_replies_then_settles() {
    let h = Harness::new(FakeStore::with_tenant(config()));
    let mut controller = h.controller(Direction::Inbound, Some("rec-1"), Utc::now()).await;
    controller.start().await;

    let reply = invoke(&mut controller, "end_call", serde_json::json!({})).await;
    assert!(reply.contains("Goodbye"));
    assert_eq!(controller.session().cleanup_state(), CleanupState::Done);

    controller.dispatch(SessionEvent::RoomDisconnected).await;
    assert_eq!(h.store.deductions.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn departure_of_other_participants_does_not_end_call() {
    let h = Harness::new(FakeStore::with_tenant(config()));
    let mut controller = h.controller(Direction::Inbound, Some("rec-1"), Utc::now()).await;
    controller.start().await;
    controller
        .dispatch(SessionEvent::ParticipantDisconnected {
            identity: "transfer-target".to_string(),
        })
        .await;
    assert_eq!(controller.session().cleanup_state(), CleanupState::Pending);
}

#[tokio::test]
async fn bound_call_record_is_never_replaced() {
    let mut store = FakeStore::with_tenant(config());
    store.records.push(SeededRecord {
        id: "rec-recent".into(),
        tenant_id: TENANT.into(),
        service_number: Some(SERVICE_NUMBER.into()),
        provider_call_id: None,
        direction: Direction::Inbound,
        created_at: Utc::now(),
    });
    let h = Harness::new(store);
    let mut controller = h.controller(Direction::Inbound, Some("rec-early"), Utc::now()).await;
    controller.start().await;
    controller.dispatch(SessionEvent::RoomDisconnected).await;

    let updates = h.store.updates.lock().unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, "rec-early");
    assert!(h.store.created.lock().unwrap().is_empty());
    assert_eq!(controller.session().call_record_id(), Some("rec-early"));
}

#[tokio::test]
async fn settlement_resolves_recent_record_or_creates_one() {
    let mut store = FakeStore::with_tenant(config());
    store.records.push(SeededRecord {
        id: "rec-recent".into(),
        tenant_id: TENANT.into(),
        service_number: Some("+15559990000".into()),
        provider_call_id: None,
        direction: Direction::Inbound,
        created_at: Utc::now(),
    });
    let h = Harness::new(store);
    let mut controller = h.controller(Direction::Inbound, None, Utc::now()).await;
    controller.start().await;
    controller.dispatch(SessionEvent::RoomDisconnected).await;
    assert_eq!(h.store.updates.lock().unwrap()[0].0, "rec-recent");

    let h = Harness::new(FakeStore::with_tenant(config()));
    let mut controller = h.controller(Direction::Inbound, None, Utc::now()).await;
    controller.start().await;
    controller.dispatch(SessionEvent::RoomDisconnected).await;
    assert_eq!(h.store.created.lock().unwrap().len(), 1);
    assert_eq!(h.store.updates.lock().unwrap()[0].0, "created-1");
    assert_eq!(
        h.store.deductions.lock().unwrap()[0].reference_id.as_deref(),
        Some("created-1")
    );
}

#[tokio::test]
async fn disabled_pii_writes_metadata_only_and_still_bills() {
    let mut cfg = config();
    cfg.pii_mode = PiiMode::Disabled;
    cfg.memory.enabled = true;
    cfg.extraction_variables.push(ExtractionVariable {
        name: "reason".into(),
        description: "Why they called".into(),
        kind: "string".into(),
    });
    let h = Harness::new(FakeStore::with_tenant(cfg));
    let mut controller = h
        .controller(Direction::Inbound, Some("rec-1"), Utc::now() - Duration::seconds(42))
        .await;
    controller.start().await;
    controller.dispatch(content("assistant", "Hello, how can I help?")).await;
    controller.dispatch(content("user", "My name is Jane Doe.")).await;
    controller.dispatch(SessionEvent::RoomDisconnected).await;

    let updates = h.store.updates.lock().unwrap();
    assert_eq!(updates.len(), 1);
    let update = &updates[0].1;
    assert!(!update.carries_content());
    assert!(update.ended_at.is_some());
    assert_eq!(update.duration_seconds, Some(42));

    let deductions = h.store.deductions.lock().unwrap();
    assert_eq!(deductions.len(), 1);
    assert_eq!(deductions[0].duration_seconds, 42);
    assert_eq!(deductions[0].usage_units, "Hello, how can I help?".len() as u64);

    assert!(h.engine.generation_prompts().is_empty());
    assert!(h.store.partials.lock().unwrap().is_empty());
    assert!(h.store.saved_memories.lock().unwrap().is_empty());
}

#[tokio::test]
async fn redacted_content_never_carries_known_pii() {
    let pii = ["Jane Doe", "555-0142", "jane@example.com"];
    let mut cfg = config();
    cfg.pii_mode = PiiMode::Redacted;
    cfg.memory.enabled = true;
    cfg.extraction_variables.push(ExtractionVariable {
        name: "reason".into(),
        description: "Why they called".into(),
        kind: "string".into(),
    });
    let h = Harness::with_parts(
        FakeStore::with_tenant(cfg),
        FakeEngine::with_pii(&pii),
        FakeIntegrations::default(),
    );
    let mut controller = h.controller(Direction::Inbound, Some("rec-1"), Utc::now()).await;
    controller.start().await;
    controller.dispatch(content("assistant", "Can I get your name?")).await;
    controller.dispatch(content("user", "Jane Doe, call me at 555-0142")).await;
    controller.dispatch(content("user", "or email jane@example.com")).await;
    controller.dispatch(SessionEvent::RoomDisconnected).await;

    let updates = h.store.updates.lock().unwrap();
    let update = &updates[0].1;
    let transcript = update.transcript.as_ref().unwrap();
    assert_eq!(transcript.len(), 3);
    assert_eq!(transcript[1].speaker, Speaker::Caller);
    let persisted = format!(
        "{}\n{}",
        format_transcript(transcript),
        update.summary.as_deref().unwrap()
    );
    for token in pii {
        assert!(!persisted.contains(token), "{token} was persisted");
    }
    assert!(h.store.partials.lock().unwrap().is_empty());

    let prompts = h.engine.generation_prompts();
    assert!(prompts[0].starts_with("Remove all personally identifiable information"));
    for prompt in &prompts[1..] {
        for token in pii {
            assert!(!prompt.contains(token), "{token} reached a downstream prompt");
        }
    }
    let memory = &h.store.saved_memories.lock().unwrap()[0];
    assert!(!memory.summary.as_deref().unwrap().contains("Jane Doe"));
}

#[tokio::test]
async fn failed_redaction_persists_no_content() {
    let mut cfg = config();
    cfg.pii_mode = PiiMode::Redacted;
    let h = Harness::new(FakeStore::with_tenant(cfg));
    h.engine.fail_redaction.store(true, Ordering::SeqCst);
    let mut controller = h.controller(Direction::Inbound, Some("rec-1"), Utc::now()).await;
    controller.start().await;
    controller.dispatch(content("user", "I'm Jane Doe")).await;
    controller.dispatch(SessionEvent::RoomDisconnected).await;

    let update = &h.store.updates.lock().unwrap()[0].1;
    assert!(!update.carries_content());
    assert_eq!(h.store.deductions.lock().unwrap().len(), 1);
    let report = controller.report().unwrap();
    assert_eq!(report.failed_steps, vec!["redact"]);
}

#[tokio::test]
async fn transcript_keeps_event_order_and_speakers() {
    let mut cfg = config();
    cfg.extraction_variables.push(ExtractionVariable {
        name: "reason".into(),
        description: "Why they called".into(),
        kind: "string".into(),
    });
    let h = Harness::new(FakeStore::with_tenant(cfg));
    let mut controller = h.controller(Direction::Inbound, Some("rec-1"), Utc::now()).await;
    controller.start().await;

    let script = [
        ("assistant", "Hi, thanks for calling."),
        ("user", "Hi, I need my order status."),
        ("assistant", "Sure, what's the order number?"),
        ("user", ""),
        ("user", "It's 1182."),
    ];
    for (role, text) in script {
        controller.dispatch(content(role, text)).await;
    }
    controller
        .dispatch(SessionEvent::ContentAdded {
            role: "user".into(),
            text: None,
        })
        .await;
    controller.dispatch(SessionEvent::RoomDisconnected).await;
    controller.dispatch(content("assistant", "late entry")).await;

    let update = &h.store.updates.lock().unwrap()[0].1;
    assert_eq!(
        update.transcript.as_deref().unwrap(),
        &[
            TranscriptEntry::new(Speaker::Agent, "Hi, thanks for calling."),
            TranscriptEntry::new(Speaker::Caller, "Hi, I need my order status."),
            TranscriptEntry::new(Speaker::Agent, "Sure, what's the order number?"),
            TranscriptEntry::new(Speaker::Caller, "It's 1182."),
        ]
    );
    assert!(update.summary.as_deref().unwrap().starts_with("Summary of: Agent: Hi"));
    assert_eq!(
        update.extracted_data,
        Some(serde_json::json!({ "reason": "order status" }))
    );
}

#[tokio::test]
async fn memory_merges_with_previous_calls() {
    let mut cfg = config();
    cfg.memory.enabled = true;
    cfg.semantic_memory.enabled = true;
    let store = FakeStore::with_tenant(cfg);
    store.memories.lock().unwrap().push(ConversationMemory {
        tenant_id: TENANT.into(),
        contact_phone: CALLER.into(),
        config_id: "cfg-1".into(),
        contact_name: Some("Sam".into()),
        summary: Some("Called about a late delivery.".into()),
        topics: vec!["delivery".into(), "refunds".into()],
        interaction_count: 2,
        embedding: None,
        updated_at: Utc::now() - Duration::days(3),
    });
    let h = Harness::new(store);
    let mut controller = h.controller(Direction::Inbound, Some("rec-1"), Utc::now()).await;
    assert!(controller.instructions().contains("CONTACT MEMORY:"));
    assert!(controller.instructions().contains("Previous conversations: 2"));

    controller.start().await;
    controller.dispatch(content("user", "Where is my order?")).await;
    controller.dispatch(SessionEvent::RoomDisconnected).await;

    let saved = h.store.saved_memories.lock().unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].interaction_count, 3);
    assert_eq!(saved[0].summary.as_deref(), Some("Merged summary."));
    assert_eq!(saved[0].topics, vec!["delivery", "refunds", "orders"]);
    assert_eq!(saved[0].contact_name.as_deref(), Some("Sam"));
    assert!(saved[0].embedding.is_some());
}

#[tokio::test]
async fn inbound_calls_are_greeted_and_outbound_calls_wait() {
    let h = Harness::new(FakeStore::with_tenant(config()));
    let mut inbound = h.controller(Direction::Inbound, None, Utc::now()).await;
    inbound.start().await;
    assert_eq!(
        h.rooms.said.lock().unwrap().as_slice(),
        &[("Hello! How can I help you today?".to_string(), true)]
    );
    assert!(h.engine.started.lock().unwrap()[0].auto_reply);

    let h = Harness::new(FakeStore::with_tenant(config()));
    let mut outbound = h.controller(Direction::Outbound, None, Utc::now()).await;
    outbound.start().await;
    assert!(h.rooms.said.lock().unwrap().is_empty());
    assert!(h.engine.started.lock().unwrap()[0]
        .instructions
        .contains("Wait for the other party to speak first"));
}

#[tokio::test]
async fn engine_start_failure_apologises_and_settles() {
    let h = Harness::new(FakeStore::with_tenant(config()));
    h.engine.fail_start.store(true, Ordering::SeqCst);
    let mut controller = h.controller(Direction::Inbound, Some("rec-1"), Utc::now()).await;
    controller.start().await;

    assert_eq!(controller.session().cleanup_state(), CleanupState::Done);
    assert!(h.rooms.said_texts()[0].contains("technical difficulties"));
    assert_eq!(h.rooms.deleted.lock().unwrap().len(), 1);
    assert_eq!(h.store.deductions.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn partial_transcripts_are_throttled() {
    let h = Harness::new(FakeStore::with_tenant(config()));
    h.rooms
        .participants
        .lock()
        .unwrap()
        .push(sip_participant(SERVICE_NUMBER, CALLER, "CA-1"));
    let (tx, rx) = mpsc::channel(16);
    let task = tokio::spawn(run_call(
        h.services(),
        settings(),
        ROOM.to_string(),
        r#"{"call_record_id":"rec-1"}"#,
        rx,
    ));

    tx.send(content("assistant", "Hello!")).await.unwrap();
    tx.send(content("user", "Hi")).await.unwrap();
    tx.send(content("user", "I have a question")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_secs(4)).await;

    {
        let partials = h.store.partials.lock().unwrap();
        assert_eq!(partials.len(), 2);
        assert_eq!(partials[0].1.len(), 1);
        assert_eq!(partials[1].1.len(), 3);
        assert!(partials.iter().all(|(id, _)| id == "rec-1"));
    }

    tx.send(SessionEvent::RoomDisconnected).await.unwrap();
    let outcome = task.await.unwrap();
    let CallOutcome::Settled(report) = outcome else {
        panic!("call was rejected");
    };
    assert_eq!(report.call_record_id.as_deref(), Some("rec-1"));
    assert!(report.content_written);
}

#[tokio::test(start_paused = true)]
async fn closed_event_stream_still_settles() {
    let h = Harness::new(FakeStore::with_tenant(config()));
    h.rooms
        .participants
        .lock()
        .unwrap()
        .push(sip_participant(SERVICE_NUMBER, CALLER, "CA-1"));
    let (tx, rx) = mpsc::channel(4);
    drop(tx);
    let outcome = run_call(h.services(), settings(), ROOM.to_string(), "", rx).await;
    assert!(matches!(outcome, CallOutcome::Settled(_)));
    assert_eq!(h.store.deductions.lock().unwrap().len(), 1);
}
