use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::Router;
use parley_types::{
    BookingRequest, ConversationEngine, CustomFunction, IntegrationGateway, PortError,
    TelephonyGateway, TransferRequest, WebhookContext,
};
use parley_voice::{
    agent_token, EngineConfig, HttpIntegrations, IntegrationsConfig, LiveKitConfig,
    PipelineEngine, SignalWireGateway, TelephonyConfig,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct Seen {
    method: Method,
    path: String,
    query: String,
    headers: HeaderMap,
    body: String,
}

type Log = Arc<Mutex<Vec<Seen>>>;

/// Starts a server that records every request and answers by path.
async fn mock_server() -> (String, Log) {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let recorded = log.clone();

    let app = Router::new().fallback(
        move |method: Method, uri: Uri, headers: HeaderMap, body: Bytes| {
            let recorded = recorded.clone();
            async move {
                let path = uri.path().to_string();
                recorded.lock().unwrap().push(Seen {
                    method,
                    path: path.clone(),
                    query: uri.query().unwrap_or_default().to_string(),
                    headers,
                    body: String::from_utf8_lossy(&body).into_owned(),
                });
                respond(&path)
            }
        },
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), log)
}

fn respond(path: &str) -> axum::response::Response {
    let body = if path.ends_with("/chat/completions") {
        json!({ "choices": [{ "message": { "content": "  A short summary. " } }] })
    } else if path.ends_with("/embeddings") {
        json!({ "data": [{ "embedding": [0.1, 0.2, 0.3] }] })
    } else if path.ends_with("/slots/available") {
        json!({ "data": { "slots": { "2026-10-20": [
            { "start": "2026-10-20T16:00:00.000Z" },
            { "start": "2026-10-20T16:30:00.000Z" }
        ] } } })
    } else if path.ends_with("/bookings") {
        json!({ "data": { "id": 4411, "uid": "bk_abc", "startTime": "2026-10-20T16:00:00.000Z" } })
    } else if path.ends_with("/Calls.json") {
        json!({ "sid": "CA-destination" })
    } else if path.ends_with("/broken") {
        return (StatusCode::BAD_GATEWAY, "upstream down").into_response();
    } else if path.starts_with("/sessions/") && path.ends_with("/gone") {
        return StatusCode::NOT_FOUND.into_response();
    } else {
        json!({ "ok": true })
    };
    axum::Json(body).into_response()
}

fn seen(log: &Log) -> Vec<Seen> {
    log.lock().unwrap().clone()
}

fn engine(base: &str) -> PipelineEngine {
    let config = EngineConfig {
        api_base: format!("{base}/v1"),
        api_key: "sk-test".to_string(),
        control_url: base.to_string(),
        ..EngineConfig::default()
    };
    let livekit = LiveKitConfig::new("ws://127.0.0.1:7880", "devkey", "secret");
    PipelineEngine::new(config, livekit).unwrap()
}

#[tokio::test]
async fn engine_generates_text_and_embeddings() {
    let (base, log) = mock_server().await;
    let engine = engine(&base);

    let text = engine.generate_text("Summarise this call").await.unwrap();
    assert_eq!(text, "A short summary.");

    let vector = engine.embed("caller asked about pricing").await.unwrap();
    assert_eq!(vector, vec![0.1, 0.2, 0.3]);

    let requests = seen(&log);
    assert_eq!(requests[0].path, "/v1/chat/completions");
    assert_eq!(
        requests[0].headers.get("authorization").unwrap(),
        "Bearer sk-test"
    );
    let body: Value = serde_json::from_str(&requests[0].body).unwrap();
    assert_eq!(body["messages"][0]["content"], "Summarise this call");
}

#[tokio::test]
async fn engine_session_control_calls_pipeline() {
    let (base, log) = mock_server().await;
    let engine = engine(&base);

    let session = parley_types::EngineSession {
        room_name: "call-123".to_string(),
        instructions: "Be brief.".to_string(),
        capabilities: Vec::new(),
        voice_id: "11labs-Rachel".to_string(),
        llm_model: "gpt-4o-mini".to_string(),
        language: None,
        auto_reply: false,
    };
    engine.start_session(&session).await.unwrap();
    engine.set_auto_reply("call-123", true).await.unwrap();
    engine.stop_session("gone").await.unwrap();

    let requests = seen(&log);
    assert_eq!(requests[0].path, "/sessions");
    let start: Value = serde_json::from_str(&requests[0].body).unwrap();
    assert_eq!(start["room_name"], "call-123");
    assert_eq!(start["livekit_url"], "ws://127.0.0.1:7880");
    assert!(start["token"].as_str().is_some_and(|t| !t.is_empty()));

    assert_eq!(requests[1].path, "/sessions/call-123/auto-reply");
    assert_eq!(requests[2].method, Method::DELETE);
}

#[tokio::test]
async fn vendor_errors_keep_status_and_body() {
    let (base, _log) = mock_server().await;
    let integrations = HttpIntegrations::new(IntegrationsConfig::default()).unwrap();
    let function = CustomFunction {
        name: "check_order".to_string(),
        description: "Looks up an order".to_string(),
        url: format!("{base}/broken"),
        method: "POST".to_string(),
        headers: Vec::new(),
        parameters: json!({ "type": "object" }),
        active: true,
    };

    let err = integrations
        .invoke_webhook(&function, &json!({}), &context())
        .await
        .unwrap_err();
    match err {
        PortError::Vendor(message) => {
            assert!(message.contains("502"), "{message}");
            assert!(message.contains("upstream down"), "{message}");
        }
        other => panic!("expected a vendor error, got {other:?}"),
    }
}

fn context() -> WebhookContext {
    WebhookContext {
        tenant_id: "t-1".to_string(),
        room_name: "call-123".to_string(),
        counterpart_phone: Some("+15550102000".to_string()),
        call_record_id: Some("rec-1".to_string()),
    }
}

#[tokio::test]
async fn webhooks_send_arguments_and_headers() {
    let (base, log) = mock_server().await;
    let integrations = HttpIntegrations::new(IntegrationsConfig::default()).unwrap();

    let mut function = CustomFunction {
        name: "check_order".to_string(),
        description: "Looks up an order".to_string(),
        url: format!("{base}/hooks/order"),
        method: "post".to_string(),
        headers: vec![("X-Api-Key".to_string(), "k-1".to_string())],
        parameters: json!({ "type": "object" }),
        active: true,
    };
    let reply = integrations
        .invoke_webhook(&function, &json!({ "order_id": "A1" }), &context())
        .await
        .unwrap();
    assert_eq!(reply, r#"{"ok":true}"#);

    function.method = "GET".to_string();
    integrations
        .invoke_webhook(&function, &json!({ "order_id": "A1" }), &context())
        .await
        .unwrap();

    let requests = seen(&log);
    assert_eq!(requests[0].headers.get("x-api-key").unwrap(), "k-1");
    let body: Value = serde_json::from_str(&requests[0].body).unwrap();
    assert_eq!(body["order_id"], "A1");
    assert_eq!(body["call"]["call_record_id"], "rec-1");

    assert_eq!(requests[1].method, Method::GET);
    assert_eq!(requests[1].query, "order_id=A1");
}

#[tokio::test]
async fn calendar_lists_slots_and_books() {
    let (base, log) = mock_server().await;
    let integrations = HttpIntegrations::new(IntegrationsConfig {
        calendar_api_base: base.clone(),
        ..IntegrationsConfig::default()
    })
    .unwrap();

    let slots = integrations
        .available_slots("cal-secret", Some(77), "2026-10-20")
        .await
        .unwrap();
    assert_eq!(slots.len(), 2);

    let confirmation = integrations
        .book_appointment(
            "cal-secret",
            &BookingRequest {
                event_type_id: Some(77),
                start_time: "2026-10-20T16:00:00.000Z".to_string(),
                name: "Ann Lee".to_string(),
                email: None,
                phone: Some("+15550102000".to_string()),
                notes: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(confirmation.booking_id, "bk_abc");

    let requests = seen(&log);
    assert_eq!(
        requests[0].headers.get("authorization").unwrap(),
        "Bearer cal-secret"
    );
    assert_eq!(requests[0].headers.get("cal-api-version").unwrap(), "2024-08-13");
    assert!(requests[0].query.contains("eventTypeId=77"));

    let booking: Value = serde_json::from_str(&requests[1].body).unwrap();
    assert_eq!(booking["responses"]["email"], "ann.lee@placeholder.booking");
    assert_eq!(booking["eventTypeId"], 77);
}

#[tokio::test]
async fn calendar_rejects_missing_event_type() {
    let integrations = HttpIntegrations::new(IntegrationsConfig::default()).unwrap();
    let err = integrations
        .available_slots("cal-secret", None, "2026-10-20")
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::Invalid(_)));
}

fn telephony(base: &str) -> SignalWireGateway {
    SignalWireGateway::new(TelephonyConfig {
        space_url: base.to_string(),
        project_id: "proj-1".to_string(),
        api_token: "tok".to_string(),
        sip_domain: "parley.sip.example.com".to_string(),
        ..TelephonyConfig::default()
    })
    .unwrap()
}

fn transfer() -> TransferRequest {
    TransferRequest {
        room_name: "call-123".to_string(),
        participant_identity: Some("sip_caller".to_string()),
        provider_call_id: Some("CA-caller".to_string()),
        target_label: "Sales".to_string(),
        destination: "+1 (555) 010-9999".to_string(),
        caller_id: Some("+15550100000".to_string()),
        service_number: Some("+15550100000".to_string()),
    }
}

#[tokio::test]
async fn blind_transfer_redirects_the_caller() {
    let (base, log) = mock_server().await;
    telephony(&base).transfer_call(&transfer()).await.unwrap();

    let requests = seen(&log);
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].path,
        "/api/laml/2010-04-01/Accounts/proj-1/Calls/CA-caller.json"
    );
    assert!(requests[0].body.contains("Twiml="));
    assert!(requests[0].body.contains("%2B15550109999"));
}

#[tokio::test]
async fn warm_transfer_holds_dials_and_bridges() {
    let (base, log) = mock_server().await;
    let gateway = telephony(&base);

    gateway.start_warm_transfer(&transfer()).await.unwrap();
    gateway.complete_warm_transfer("call-123").await.unwrap();

    let requests = seen(&log);
    let paths: Vec<&str> = requests.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "/api/laml/2010-04-01/Accounts/proj-1/Calls/CA-caller.json",
            "/api/laml/2010-04-01/Accounts/proj-1/Calls.json",
            "/api/laml/2010-04-01/Accounts/proj-1/Calls/CA-caller.json",
            "/api/laml/2010-04-01/Accounts/proj-1/Calls/CA-destination.json",
        ]
    );
    assert!(requests[2].body.contains("Conference"));

    // Legs are consumed by completion.
    let err = gateway.cancel_warm_transfer("call-123").await.unwrap_err();
    assert!(matches!(err, PortError::Invalid(_)));
}

#[tokio::test]
async fn transfer_without_call_id_is_invalid() {
    let gateway = telephony("http://127.0.0.1:9");
    let mut request = transfer();
    request.provider_call_id = None;
    let err = gateway.transfer_call(&request).await.unwrap_err();
    assert!(matches!(err, PortError::Invalid(_)));
}

#[tokio::test]
async fn agent_token_grants_room_access() {
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Claims {
        sub: String,
        video: VideoClaims,
    }

    #[derive(Deserialize)]
    struct VideoClaims {
        room: String,
        #[serde(rename = "roomJoin")]
        room_join: bool,
        #[serde(rename = "canPublishData")]
        can_publish_data: bool,
    }

    let config = LiveKitConfig::new("ws://127.0.0.1:7880", "devkey", "secret");
    let token = agent_token(&config, "call-123").unwrap();

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.set_required_spec_claims::<&str>(&[]);
    let data = decode::<Claims>(
        &token,
        &DecodingKey::from_secret(b"secret"),
        &validation,
    )
    .unwrap();

    assert_eq!(data.claims.sub, "parley-agent");
    assert_eq!(data.claims.video.room, "call-123");
    assert!(data.claims.video.room_join);
    assert!(data.claims.video.can_publish_data);
}
