use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::NaiveDate;
use httpmock::Method::{GET, POST};
use httpmock::MockServer;
use serde_json::json;
use tempfile::tempdir;

use ava_bot::adapters::calendar::GoogleCalendarClient;
use ava_bot::adapters::gmail::GmailClient;
use ava_bot::adapters::groq::GroqClient;
use ava_bot::adapters::search::{FallbackSearch, GoogleSearchClient, TavilySearchClient};
use ava_bot::adapters::together::TogetherImageClient;
use ava_bot::adapters::wompi::{sign, WompiClient};
use ava_bot::credentials::{
    CredentialChain, EnvCredentialProvider, GoogleAuth, GoogleCredentials, DEFAULT_TOKEN_URI,
};
use ava_bot::error::{AvaBotError, Result};
use ava_bot::interfaces::credentials::CredentialProvider;
use ava_bot::interfaces::services::{
    CalendarService, ChatModel, ChatTurn, ImageGenerator, MailService, NewEvent,
    PaymentLinkRequest, PaymentService, ReplyRequest, SearchService,
};

struct StaticToken;

#[async_trait]
impl CredentialProvider for StaticToken {
    fn name(&self) -> &str {
        "static"
    }

    async fn load(&self) -> Result<Option<GoogleCredentials>> {
        Ok(Some(GoogleCredentials {
            token: Some("test-token".to_string()),
            refresh_token: None,
            token_uri: DEFAULT_TOKEN_URI.to_string(),
            client_id: None,
            client_secret: None,
            scopes: Vec::new(),
            expiry: None,
        }))
    }
}

fn google_auth() -> Arc<GoogleAuth> {
    Arc::new(GoogleAuth::new(CredentialChain::new(vec![Arc::new(StaticToken)])).unwrap())
}

#[tokio::test]
async fn gmail_lists_messages_with_metadata() {
    let server = MockServer::start_async().await;
    let listing = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/gmail/v1/users/me/messages")
                .header("authorization", "Bearer test-token")
                .query_param("q", "is:unread")
                .query_param("maxResults", "5");
            then.status(200)
                .json_body(json!({"messages": [{"id": "m1", "threadId": "t1"}]}));
        })
        .await;
    let detail = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/gmail/v1/users/me/messages/m1")
                .query_param("format", "metadata");
            then.status(200).json_body(json!({
                "id": "m1",
                "threadId": "t1",
                "snippet": "Hola, te escribo por",
                "payload": {"headers": [
                    {"name": "From", "value": "Ana <ana@example.com>"},
                    {"name": "Subject", "value": "Cotización"},
                    {"name": "Date", "value": "Mon, 12 Oct 2026 09:00:00 -0500"},
                    {"name": "Message-ID", "value": "<abc@mail>"}
                ]}
            }));
        })
        .await;

    let gmail = GmailClient::new(google_auth(), &server.base_url()).unwrap();
    let emails = gmail.list_messages("is:unread", 5).await.unwrap();

    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].id, "m1");
    assert_eq!(emails[0].thread_id.as_deref(), Some("t1"));
    assert_eq!(emails[0].sender, "Ana <ana@example.com>");
    assert_eq!(emails[0].subject, "Cotización");
    assert_eq!(emails[0].message_id.as_deref(), Some("<abc@mail>"));
    listing.assert_calls(1);
    detail.assert_calls(1);
}

#[tokio::test]
async fn gmail_reply_posts_raw_message_on_the_thread() {
    let server = MockServer::start_async().await;
    let send = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/gmail/v1/users/me/messages/send")
                .header("authorization", "Bearer test-token")
                .body_includes("\"threadId\":\"t1\"");
            then.status(200).json_body(json!({"id": "sent-1", "threadId": "t1"}));
        })
        .await;

    let gmail = GmailClient::new(google_auth(), &server.base_url()).unwrap();
    let result = gmail
        .send_reply(&ReplyRequest {
            email_id: "m1".to_string(),
            thread_id: Some("t1".to_string()),
            to: "ana@example.com".to_string(),
            subject: "Re: Cotización".to_string(),
            in_reply_to: Some("<abc@mail>".to_string()),
            references: Some("<abc@mail>".to_string()),
            body: "Gracias, la reviso hoy.".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(result["id"], json!("sent-1"));
    send.assert_calls(1);
}

#[tokio::test]
async fn gmail_upstream_errors_keep_status_and_body() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/gmail/v1/users/me/messages");
            then.status(403).body("insufficient scopes");
        })
        .await;

    let gmail = GmailClient::new(google_auth(), &server.base_url()).unwrap();
    match gmail.list_messages("in:inbox", 10).await {
        Err(AvaBotError::Upstream { status, body }) => {
            assert_eq!(status, 403);
            assert_eq!(body, "insufficient scopes");
        }
        other => panic!("expected upstream error, got {other:?}"),
    }
}

#[tokio::test]
async fn calendar_creates_meet_events() {
    let server = MockServer::start_async().await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/calendar/v3/calendars/primary/events")
                .query_param("conferenceDataVersion", "1")
                .query_param("sendUpdates", "all");
            then.status(200).json_body(json!({
                "id": "ev1",
                "status": "confirmed",
                "htmlLink": "https://calendar.google.com/event?eid=ev1",
                "conferenceData": {"entryPoints": [
                    {"entryPointType": "video", "uri": "https://meet.google.com/abc-defg-hij"}
                ]}
            }));
        })
        .await;

    let calendar = GoogleCalendarClient::new(google_auth(), &server.base_url()).unwrap();
    let start = NaiveDate::from_ymd_opt(2026, 10, 20)
        .unwrap()
        .and_hms_opt(15, 0, 0)
        .unwrap();
    let created = calendar
        .create_event(&NewEvent {
            summary: "Revisión de propuesta".to_string(),
            description: None,
            start,
            end: start + chrono::TimeDelta::minutes(60),
            timezone: "America/Bogota".to_string(),
            attendees: vec!["ana@example.com".to_string()],
            with_meet: true,
        })
        .await
        .unwrap();

    assert_eq!(created.id, "ev1");
    assert_eq!(
        created.meet_link.as_deref(),
        Some("https://meet.google.com/abc-defg-hij")
    );
    create.assert_calls(1);
}

#[tokio::test]
async fn wompi_payment_link_and_webhook_checksum() {
    let server = MockServer::start_async().await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/payment_links")
                .header("authorization", "Bearer prv_test_key")
                .body_includes("\"amount_in_cents\":8000000")
                .body_includes("\"currency\":\"COP\"")
                .body_includes("\"single_use\":true");
            then.status(201).json_body(json!({"data": {"id": "test_AbC123"}}));
        })
        .await;

    let wompi = WompiClient::new(
        &server.base_url(),
        "prv_test_key",
        Some("events_secret".to_string()),
    )
    .unwrap();
    let link = wompi
        .create_payment_link(&PaymentLinkRequest {
            name: "Asesoría".to_string(),
            description: "Asesoría contable".to_string(),
            amount_in_cents: 8_000_000,
            currency: "COP".to_string(),
            expires_in_minutes: 1440,
        })
        .await
        .unwrap();

    assert_eq!(link.url, "https://checkout.wompi.co/l/test_AbC123");
    assert!(link.reference.starts_with("ref_"));
    create.assert_calls(1);

    let body = br#"{"event":"transaction.updated","data":{"transaction":{"id":"tx1","status":"APPROVED"}}}"#;
    let checksum = sign(b"events_secret", body).unwrap();
    assert!(wompi.verify_webhook(body, &checksum));
    assert!(!wompi.verify_webhook(body, "00"));
    assert!(!wompi.verify_webhook(b"tampered", &checksum));
}

#[tokio::test]
async fn together_writes_image_and_metadata() {
    let server = MockServer::start_async().await;
    let png = [0x89u8, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
    let generate = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/images/generations")
                .header("authorization", "Bearer together-key")
                .body_includes("\"width\":1024")
                .body_includes("\"height\":768")
                .body_includes("\"response_format\":\"b64_json\"");
            then.status(200)
                .json_body(json!({"data": [{"b64_json": STANDARD.encode(png)}]}));
        })
        .await;

    let dir = tempdir().unwrap();
    let client = TogetherImageClient::new(
        "together-key",
        &server.base_url(),
        "black-forest-labs/FLUX.1-schnell-Free",
        dir.path().to_path_buf(),
    )
    .unwrap();
    let image = client.generate("un faro al atardecer", "realistic").await.unwrap();

    assert_eq!(std::fs::read(&image.path).unwrap(), png);
    let meta: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&image.metadata_path).unwrap()).unwrap();
    assert_eq!(meta["original_prompt"], json!("un faro al atardecer"));
    assert_eq!(meta["style"], json!("realistic"));
    assert_eq!(meta["api"], json!("together"));
    generate.assert_calls(1);
}

#[tokio::test]
async fn groq_completes_chat_turns() {
    let server = MockServer::start_async().await;
    let completion = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .header("authorization", "Bearer gsk_test")
                .body_includes("\"model\":\"llama-3.3-70b-versatile\"");
            then.status(200).json_body(json!({
                "choices": [{"message": {"role": "assistant", "content": "  ¡Hola! ¿En qué te ayudo?  "}}]
            }));
        })
        .await;

    let groq = GroqClient::new(
        "gsk_test",
        &server.base_url(),
        "llama-3.3-70b-versatile",
        "llama-3.2-90b-vision-preview",
    )
    .unwrap();
    let history = vec![ChatTurn::user("hola"), ChatTurn::assistant("¡Hola!")];
    let text = groq
        .complete("Eres Ava.", &history, "¿sigues ahí?")
        .await
        .unwrap();

    assert_eq!(text, "¡Hola! ¿En qué te ayudo?");
    completion.assert_calls(1);
}

#[tokio::test]
async fn tavily_search_maps_results() {
    let server = MockServer::start_async().await;
    let search = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/search")
                .header("authorization", "Bearer tvly-test")
                .body_includes("\"query\":\"rust async\"")
                .body_includes("\"max_results\":5");
            then.status(200).json_body(json!({"results": [
                {"title": "Tokio", "url": "https://tokio.rs/tokio/tutorial", "content": "Runtime asíncrono", "score": 0.9},
                {"url": "https://docs.rs/futures"}
            ]}));
        })
        .await;

    let tavily = TavilySearchClient::new("tvly-test", &server.base_url()).unwrap();
    let results = tavily.search("rust async", 5).await.unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].title, "Tokio");
    assert_eq!(results[0].display_link, "tokio.rs");
    assert_eq!(results[0].snippet, "Runtime asíncrono");
    assert_eq!(results[1].title, "Sin título");
    assert_eq!(results[1].snippet, "Sin descripción");
    search.assert_calls(1);
}

#[tokio::test]
async fn search_falls_back_to_google_when_tavily_fails() {
    let server = MockServer::start_async().await;
    let tavily_mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/search");
            then.status(500).body("unavailable");
        })
        .await;
    let google_mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/customsearch/v1")
                .query_param("key", "gkey")
                .query_param("cx", "cx1")
                .query_param("q", "clima Bogotá")
                .query_param("num", "5")
                .query_param("lr", "lang_es");
            then.status(200).json_body(json!({"items": [
                {"title": "Pronóstico", "link": "https://clima.example/bogota", "snippet": "Lluvias", "displayLink": "clima.example"}
            ]}));
        })
        .await;

    let search = FallbackSearch::new(
        Arc::new(TavilySearchClient::new("tvly-test", &server.base_url()).unwrap()),
        Some(Arc::new(
            GoogleSearchClient::new("gkey", "cx1", &server.base_url(), 100).unwrap(),
        )),
    );
    let results = search.search("clima Bogotá", 5).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].link, "https://clima.example/bogota");
    tavily_mock.assert_calls(1);
    google_mock.assert_calls(1);
}

#[tokio::test]
async fn google_token_is_refreshed_once_when_expired() {
    struct Expired(String);

    #[async_trait]
    impl CredentialProvider for Expired {
        fn name(&self) -> &str {
            "expired"
        }

        async fn load(&self) -> Result<Option<GoogleCredentials>> {
            Ok(Some(GoogleCredentials {
                token: Some("stale".to_string()),
                refresh_token: Some("1//refresh".to_string()),
                token_uri: self.0.clone(),
                client_id: Some("client".to_string()),
                client_secret: Some("secret".to_string()),
                scopes: Vec::new(),
                expiry: Some("2020-01-01T00:00:00Z".to_string()),
            }))
        }
    }

    let server = MockServer::start_async().await;
    let refresh = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/token")
                .body_includes("grant_type=refresh_token");
            then.status(200)
                .json_body(json!({"access_token": "fresh", "expires_in": 3599}));
        })
        .await;

    let auth = GoogleAuth::new(CredentialChain::new(vec![Arc::new(Expired(
        server.url("/token"),
    ))]))
    .unwrap();

    assert_eq!(auth.access_token().await.unwrap(), "fresh");
    assert_eq!(auth.access_token().await.unwrap(), "fresh");
    refresh.assert_calls(1);
}

#[tokio::test]
async fn environment_token_is_refreshed_before_first_use() {
    let server = MockServer::start_async().await;
    let refresh = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/token")
                .body_includes("refresh_token=1%2F%2Frefresh");
            then.status(200)
                .json_body(json!({"access_token": "fresh", "expires_in": 3599}));
        })
        .await;
    let stale = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/gmail/v1/users/me/messages")
                .header("authorization", "Bearer stale");
            then.status(401)
                .json_body(json!({"error": {"code": 401, "message": "expired"}}));
        })
        .await;
    let listing = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/gmail/v1/users/me/messages")
                .header("authorization", "Bearer fresh");
            then.status(200).json_body(json!({"resultSizeEstimate": 0}));
        })
        .await;

    let token_uri = server.url("/token");
    let env = EnvCredentialProvider::from_lookup(move |key| match key {
        "GOOGLE_CLIENT_ID" => Some("client".to_string()),
        "GOOGLE_CLIENT_SECRET" => Some("secret".to_string()),
        "GOOGLE_ACCESS_TOKEN" => Some("stale".to_string()),
        "GOOGLE_REFRESH_TOKEN" => Some("1//refresh".to_string()),
        "GOOGLE_TOKEN_URI" => Some(token_uri.clone()),
        _ => None,
    });
    let auth = Arc::new(GoogleAuth::new(CredentialChain::new(vec![Arc::new(env)])).unwrap());
    let gmail = GmailClient::new(auth, &server.base_url()).unwrap();

    for _ in 0..3 {
        assert!(gmail.list_messages("in:inbox", 5).await.unwrap().is_empty());
    }
    refresh.assert_calls(1);
    listing.assert_calls(3);
    stale.assert_calls(0);
}

#[tokio::test]
async fn credential_chain_reports_missing_credentials() {
    struct Empty;

    #[async_trait]
    impl CredentialProvider for Empty {
        fn name(&self) -> &str {
            "empty"
        }

        async fn load(&self) -> Result<Option<GoogleCredentials>> {
            Ok(None)
        }
    }

    let chain = CredentialChain::new(vec![Arc::new(Empty), Arc::new(StaticToken)]);
    assert_eq!(
        chain.resolve().await.unwrap().token.as_deref(),
        Some("test-token")
    );

    let chain = CredentialChain::new(vec![Arc::new(Empty)]);
    assert!(matches!(
        chain.resolve().await,
        Err(AvaBotError::NoCredentials(_))
    ));
}
