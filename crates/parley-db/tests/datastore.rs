use chrono::{Duration, Utc};
use parley_db::{
    billing, calls, open_database, tenants, DbRuntimeSettings, SqliteDatastore,
};
use parley_types::{
    BillingRequest, CallRecordUpdate, CallStatus, ConversationMemory, Datastore, Direction,
    NewCallRecord, PiiMode, Speaker, TenantConfig, TranscriptEntry,
};
use tempfile::TempDir;

fn store() -> (TempDir, SqliteDatastore) {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = dir.path().join("parley.db");
    let pool = open_database(path.to_str().expect("utf-8 path"), DbRuntimeSettings::default())
        .expect("database should open");
    (dir, SqliteDatastore::new(pool))
}

fn new_record(provider_call_id: Option<&str>) -> NewCallRecord {
    NewCallRecord {
        tenant_id: "tenant-1".to_string(),
        config_id: Some("cfg-1".to_string()),
        direction: Direction::Inbound,
        room_name: "room-1".to_string(),
        service_number: Some("+15550001000".to_string()),
        counterpart_number: Some("+15550102000".to_string()),
        provider_call_id: provider_call_id.map(str::to_string),
        started_at: Utc::now(),
    }
}

#[tokio::test]
async fn tenant_routing_and_config_through_adapter() {
    let (_dir, store) = store();
    {
        let conn = store.pool().get().unwrap();
        tenants::add_service_number(&conn, "+15550001000", "tenant-1", true).unwrap();
        tenants::add_external_number(&conn, "+15557770000", "tenant-2").unwrap();
        let mut config = TenantConfig::new("cfg-1", "tenant-1");
        config.pii_mode = PiiMode::Disabled;
        tenants::upsert_tenant_config(&conn, &config, true).unwrap();
    }

    assert_eq!(
        store.tenant_for_service_number("+15550001000").await.unwrap().as_deref(),
        Some("tenant-1")
    );
    assert_eq!(
        store.tenant_for_external_number("+15557770000").await.unwrap().as_deref(),
        Some("tenant-2")
    );
    assert_eq!(store.tenant_for_service_number("+1000").await.unwrap(), None);

    let config = store.tenant_config("tenant-1", None).await.unwrap().unwrap();
    assert_eq!(config.pii_mode, PiiMode::Disabled);
}

#[tokio::test]
async fn call_record_lifecycle_across_pooled_connections() {
    let (_dir, store) = store();

    let id = store.create_call_record(&new_record(Some("CA-1"))).await.unwrap();
    let by_provider = store.call_record_by_provider_id("CA-1").await.unwrap().unwrap();
    assert_eq!(by_provider.id, id);

    let since = Utc::now() - Duration::seconds(60);
    let recent = store
        .recent_call_record("tenant-1", Some("+15550001000"), since)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(recent.id, id);

    let partial = vec![TranscriptEntry::new(Speaker::Agent, "Hello")];
    store.save_partial_transcript(&id, &partial).await.unwrap();

    let full = vec![
        TranscriptEntry::new(Speaker::Agent, "Hello"),
        TranscriptEntry::new(Speaker::Caller, "Bye"),
    ];
    let update = CallRecordUpdate {
        transcript: Some(full.clone()),
        ..CallRecordUpdate::completed(Utc::now(), 42)
    };
    store.update_call_record(&id, &update).await.unwrap();

    // A late streaming save must not replace the final transcript.
    store.save_partial_transcript(&id, &partial).await.unwrap();

    let conn = store.pool().get().unwrap();
    let stored = calls::get_call_record(&conn, &id).unwrap();
    assert_eq!(stored.status, CallStatus::Completed);
    assert_eq!(stored.duration_seconds, Some(42));
    assert_eq!(stored.transcript, Some(full));
}

#[tokio::test]
async fn updating_unknown_record_is_a_store_error() {
    let (_dir, store) = store();
    let err = store
        .update_call_record("missing", &CallRecordUpdate::completed(Utc::now(), 1))
        .await
        .unwrap_err();
    assert!(matches!(err, parley_types::PortError::Store(_)));
}

#[tokio::test]
async fn memory_and_similarity_search() {
    let (_dir, store) = store();
    for (phone, embedding) in [
        ("+15550102000", vec![1.0, 0.0]),
        ("+15550103000", vec![0.95, 0.05]),
    ] {
        store
            .save_conversation_memory(&ConversationMemory {
                tenant_id: "tenant-1".to_string(),
                contact_phone: phone.to_string(),
                config_id: "cfg-1".to_string(),
                contact_name: None,
                summary: Some("Asked about hours.".to_string()),
                topics: vec!["hours".to_string()],
                interaction_count: 1,
                embedding: Some(embedding),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    let own = store
        .conversation_memory("tenant-1", "+15550102000", "cfg-1")
        .await
        .unwrap()
        .unwrap();
    let similar = store
        .similar_memories(
            "tenant-1",
            "cfg-1",
            own.embedding.as_deref().unwrap(),
            "+15550102000",
            0.75,
            3,
        )
        .await
        .unwrap();
    assert_eq!(similar.len(), 1);
    assert_eq!(similar[0].contact_phone, "+15550103000");
}

#[tokio::test]
async fn billing_is_charged_once_per_call() {
    let (_dir, store) = store();
    {
        let conn = store.pool().get().unwrap();
        billing::credit(&conn, "tenant-1", 5.0).unwrap();
    }
    let request = BillingRequest {
        tenant_id: "tenant-1".to_string(),
        duration_seconds: 42,
        usage_units: 300,
        voice_id: "openai-alloy".to_string(),
        llm_model: "gpt-4o-mini".to_string(),
        addons: vec!["pii_removal".to_string()],
        direction: Direction::Inbound,
        reference_id: Some("call-1".to_string()),
    };

    let (first, second) = tokio::join!(store.deduct(&request), store.deduct(&request));
    let (first, second) = (first.unwrap(), second.unwrap());
    assert!(first.success && second.success);
    assert_eq!(first.cost, billing::call_cost(&request));
    assert_eq!(first.cost, second.cost);

    let conn = store.pool().get().unwrap();
    let balance = billing::balance(&conn, "tenant-1").unwrap();
    assert!((balance - (5.0 - first.cost)).abs() < 1e-9);
}
