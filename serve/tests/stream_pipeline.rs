//! Streaming pipeline integration tests: the save-exactly-once guarantee
//! across the consumer and cleanup paths, driven without HTTP.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use serve::{assistant_already_saved, cleanup_and_save, save_message, StreamSession};
use skein::agent::FinalPayload;
use skein::db::models::MessageRole;
use skein::db::{Database, NewMessage};
use skein::llm::{LlmUsage, MockLlm};
use skein::message::{AssistantMessage, Message, ToolCall};
use skein::{Config, RequestScope, ToolResultBuffer};

struct Fixture {
    db: Database,
    _dir: tempfile::TempDir,
    conversation_id: String,
    user_id: String,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("serve-test.db")).await.unwrap();
    let user = db
        .get_or_create_user("stream@example.com", "Stream Tester", None)
        .await
        .unwrap();
    let conversation = db
        .create_conversation(&user.id, "New Conversation", "gemini-3-flash-preview", false, false)
        .await
        .unwrap();
    Fixture {
        db,
        _dir: dir,
        conversation_id: conversation.id,
        user_id: user.id,
    }
}

fn test_config() -> Config {
    Config {
        stream_cleanup_wait_delay: Duration::from_millis(10),
        stream_cleanup_thread_timeout: Duration::from_secs(5),
        ..Config::default()
    }
}

fn session_for(fixture: &Fixture, request_id: &str, placeholder_id: Option<String>) -> StreamSession {
    StreamSession {
        db: fixture.db.clone(),
        buffer: ToolResultBuffer::new(Duration::from_secs(60)),
        assist_llm: Arc::new(MockLlm::with_no_tool_calls("Weather Question")),
        config: test_config(),
        scope: RequestScope::new(),
        conversation_id: fixture.conversation_id.clone(),
        user_id: fixture.user_id.clone(),
        request_id: request_id.to_string(),
        model: "gemini-3-flash-preview".into(),
        message_text: "what's the weather in prague?".into(),
        placeholder_id,
        anonymous_mode: false,
    }
}

fn payload_with_content(content: &str) -> FinalPayload {
    FinalPayload {
        content: content.to_string(),
        metadata: json!({}),
        tool_results: vec![],
        usage: LlmUsage {
            input_tokens: 50,
            output_tokens: 20,
        },
        messages: vec![Message::assistant(content)],
    }
}

#[tokio::test]
async fn early_disconnect_is_saved_by_the_cleanup_task() {
    let fixture = fixture().await;
    let session = Arc::new(session_for(&fixture, "req-disconnect", None));
    fixture
        .db
        .add_message(NewMessage::new(
            &fixture.conversation_id,
            MessageRole::User,
            "what's the weather in prague?",
        ))
        .await
        .unwrap();

    // Generated image captured during the run, never drained (the consumer
    // died after three tokens).
    session.buffer.store(
        "req-disconnect",
        json!({"prompt": "fox", "_full_result": {"images": [
            {"mime_type": "image/png", "data": "aGVsbG8="}
        ]}}),
    );

    let payload = FinalPayload {
        messages: vec![Message::Assistant(AssistantMessage {
            content: "Here is your image of Prague in the sun.".into(),
            tool_calls: vec![ToolCall {
                id: "tc1".into(),
                name: "generate_image".into(),
                arguments: json!({"prompt": "prague in the sun"}),
            }],
            usage: None,
            thinking: None,
        })],
        ..payload_with_content("Here is your image of Prague in the sun.")
    };
    let final_results = Arc::new(Mutex::new(Some(payload)));

    // Producer completed; consumer never reached the final tuple.
    let producer = tokio::spawn(async {});
    cleanup_and_save(session.clone(), producer, final_results).await;

    let last = fixture
        .db
        .last_message(&fixture.conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(last.role, MessageRole::Assistant);
    assert!(last.content.contains("Prague in the sun"));
    assert_eq!(last.files.len(), 1);
    assert_eq!(
        last.generated_images.as_ref().unwrap()[0].prompt,
        "prague in the sun"
    );

    // The buffer was drained exactly once and the blob landed.
    assert!(session.buffer.is_empty());
    let blob = fixture
        .db
        .get_blob(&format!("{}:0", last.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(blob, b"hello");

    // A cost row was recorded for the streamed response.
    let spent = fixture
        .db
        .conversation_cost_total(&fixture.conversation_id)
        .await
        .unwrap();
    assert!(spent > 0.0);
}

#[tokio::test]
async fn cleanup_skips_when_the_consumer_already_saved() {
    let fixture = fixture().await;
    let session = Arc::new(session_for(&fixture, "req-saved", None));
    let payload = payload_with_content("All done.");

    // Consumer path saved first.
    save_message(&session, &payload).await.unwrap();
    assert!(assistant_already_saved(&fixture.db, &fixture.conversation_id).await);

    let producer = tokio::spawn(async {});
    cleanup_and_save(
        session.clone(),
        producer,
        Arc::new(Mutex::new(Some(payload))),
    )
    .await;

    let messages = fixture.db.get_messages(&fixture.conversation_id).await.unwrap();
    let assistant_count = messages
        .iter()
        .filter(|m| m.role == MessageRole::Assistant)
        .count();
    assert_eq!(assistant_count, 1);
}

#[tokio::test]
async fn producer_failure_deletes_the_placeholder() {
    let fixture = fixture().await;
    let placeholder = fixture
        .db
        .add_message(NewMessage::new(
            &fixture.conversation_id,
            MessageRole::Assistant,
            "",
        ))
        .await
        .unwrap();
    let session = Arc::new(session_for(&fixture, "req-fail", Some(placeholder.id.clone())));
    session.buffer.store("req-fail", json!({"partial": true}));

    let producer = tokio::spawn(async {});
    cleanup_and_save(session.clone(), producer, Arc::new(Mutex::new(None))).await;

    assert!(fixture
        .db
        .get_message_by_id(&placeholder.id)
        .await
        .unwrap()
        .is_none());
    assert!(session.buffer.is_empty());
}

#[tokio::test]
async fn placeholder_is_finalized_in_place_on_success() {
    let fixture = fixture().await;
    let placeholder = fixture
        .db
        .add_message(NewMessage::new(
            &fixture.conversation_id,
            MessageRole::Assistant,
            "",
        ))
        .await
        .unwrap();
    let session = session_for(&fixture, "req-placeholder", Some(placeholder.id.clone()));

    let saved = save_message(&session, &payload_with_content("Final content."))
        .await
        .unwrap();
    assert_eq!(saved.message_id, placeholder.id);

    let reloaded = fixture
        .db
        .get_message_by_id(&placeholder.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.content, "Final content.");

    // Exactly one assistant row: finalized in place, never duplicated.
    let messages = fixture.db.get_messages(&fixture.conversation_id).await.unwrap();
    assert_eq!(messages.len(), 1);
}

#[tokio::test]
async fn first_turn_gets_an_auto_generated_title() {
    let fixture = fixture().await;
    let session = session_for(&fixture, "req-title", None);
    let saved = save_message(&session, &payload_with_content("Sunny, around 24 °C."))
        .await
        .unwrap();
    assert_eq!(saved.title.as_deref(), Some("Weather Question"));

    let conversation = fixture
        .db
        .get_conversation(&fixture.conversation_id, &fixture.user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conversation.title, "Weather Question");

    // A second save does not retitle.
    let session = session_for(&fixture, "req-title-2", None);
    let saved = save_message(&session, &payload_with_content("More detail."))
        .await
        .unwrap();
    assert!(saved.title.is_none());
}
