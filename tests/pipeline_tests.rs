//! End-to-end pipeline tests: a scripted provider drives the full
//! generate → relay → extract → persist path against a real (in-memory)
//! store, and a follow-up turn continues the same conversation.

use tokio::sync::mpsc;

use demoforge::knowledge::KnowledgeClient;
use demoforge::mode::Mode;
use demoforge::orchestrator::{run_generation, GenerationRequest, StreamEvent};
use demoforge::providers::{ProviderHandle, ScriptedClient};
use demoforge::store::MessageStore;
use demoforge::web::sse_frame;

const DEMO_DOC: &str = "<!DOCTYPE html>\n<html>\n<head><title>Spring Mass</title></head>\n<body><canvas></canvas></body>\n</html>";

fn scripted(chunks: Vec<&str>) -> ProviderHandle {
    ProviderHandle::Scripted(ScriptedClient::new().with_chunks(chunks))
}

async fn run(
    request: GenerationRequest,
    store: &MessageStore,
    client: &ProviderHandle,
) -> (
    demoforge::Result<demoforge::orchestrator::GenerationOutcome>,
    Vec<StreamEvent>,
) {
    let knowledge = KnowledgeClient::disabled();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let result = run_generation(request, store, &knowledge, client, "test-model", &tx).await;
    drop(tx);
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    (result, events)
}

// ---------------------------------------------------------------------------
// Full conversation flow
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_two_turn_conversation_demo_then_chat() {
    let store = MessageStore::open_in_memory().expect("store");

    // Turn 1: experiment mode, fenced demo document.
    let reply = format!("Here you go!\n```html\n{}\n```\n", DEMO_DOC);
    let client = scripted(reply.split_inclusive('\n').collect());
    let request = GenerationRequest {
        prompt: "spring-mass oscillator".to_string(),
        ..Default::default()
    };
    let (result, _) = run(request, &store, &client).await;
    let first = result.expect("first turn");
    assert_eq!(first.mode, Mode::Experiment);
    assert!(first.html_found);

    // Turn 2: same conversation, now three prior turns -> chat mode.
    let client = scripted(vec!["The restoring ", "force is -kx."]);
    let request = GenerationRequest {
        prompt: "why does it oscillate?".to_string(),
        conversation_id: Some(first.conversation_id.clone()),
        ..Default::default()
    };
    let (result, events) = run(request, &store, &client).await;
    let second = result.expect("second turn");
    assert_eq!(second.mode, Mode::Chat);
    assert_eq!(second.conversation_id, first.conversation_id);
    assert!(second.artifact_id.is_none());
    assert_eq!(second.final_text, "The restoring force is -kx.");
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Artifact { .. })));

    // Both exchanges persisted in order.
    let history = store.chat_history(&first.conversation_id).expect("history");
    assert_eq!(history.len(), 4);
}

#[tokio::test]
async fn test_artifact_event_before_any_delta() {
    let store = MessageStore::open_in_memory().expect("store");
    let reply = format!("```html\n{}\n```", DEMO_DOC);
    let client = scripted(vec![reply.as_str()]);
    let request = GenerationRequest { prompt: "waves".to_string(), ..Default::default() };

    let (result, events) = run(request, &store, &client).await;
    result.expect("generation");

    let artifact_pos = events
        .iter()
        .position(|e| matches!(e, StreamEvent::Artifact { .. }))
        .expect("artifact event");
    let delta_pos = events
        .iter()
        .position(|e| matches!(e, StreamEvent::Delta { .. }))
        .expect("delta event");
    assert!(artifact_pos < delta_pos);
}

#[tokio::test]
async fn test_artifact_route_payload_matches_stream() {
    // What /artifact/{id} would serve must equal the extracted document.
    let store = MessageStore::open_in_memory().expect("store");
    let reply = format!("```html\n{}\n```", DEMO_DOC);
    let client = scripted(vec![reply.as_str()]);
    let request = GenerationRequest { prompt: "waves".to_string(), ..Default::default() };

    let (result, _) = run(request, &store, &client).await;
    let outcome = result.expect("generation");

    let message = store
        .get_message(&outcome.message_id)
        .expect("fetch")
        .expect("row");
    assert_eq!(message.artifact_html.as_deref(), Some(DEMO_DOC));
    assert_eq!(message.artifact_title.as_deref(), Some("Spring Mass"));
}

#[tokio::test]
async fn test_provider_failure_keeps_partial_text() {
    let store = MessageStore::open_in_memory().expect("store");
    let client = ProviderHandle::Scripted(
        ScriptedClient::new()
            .with_chunks(vec!["partial ", "output ", "lost"])
            .failing_after(2),
    );
    let request = GenerationRequest { prompt: "magnets".to_string(), ..Default::default() };

    let (result, events) = run(request, &store, &client).await;
    assert!(result.is_err());

    let errors: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Error { .. }))
        .collect();
    assert_eq!(errors.len(), 1, "exactly one error event per failed stream");

    // Partial buffer persisted on the pending assistant row.
    let messages: Vec<_> = {
        let conversation = match &events[0] {
            StreamEvent::Meta { conversation_id, .. } => conversation_id.clone(),
            other => panic!("expected meta first, got {:?}", other),
        };
        store.get_messages(&conversation).expect("messages")
    };
    let assistant = messages.last().expect("assistant row");
    assert_eq!(assistant.content, "partial output ");
}

// ---------------------------------------------------------------------------
// SSE framing of real events
// ---------------------------------------------------------------------------

#[test]
fn test_stream_events_survive_sse_framing() {
    let event = StreamEvent::Delta { text: "line1\nline2\n".to_string() };
    let json = serde_json::to_string(&event).expect("serialize");

    // JSON escapes the newline, so the wire payload is single-line.
    assert!(!json.contains('\n'));
    assert_eq!(sse_frame(&json), format!("data: {}\n\n", json));

    let parsed: serde_json::Value = serde_json::from_str(&json).expect("parse");
    assert_eq!(parsed["type"], "delta");
    assert_eq!(parsed["text"], "line1\nline2\n");
}
