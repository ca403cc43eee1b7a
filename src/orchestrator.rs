//! The streaming generation state machine: decide the mode, persist the
//! artifact id before the provider is ever called, relay chunks in order
//! while accumulating the full buffer, then extract and persist on
//! completion. Event forwarding (SSE) and persistence are independent
//! resources: a dead client stops forwarding but never stops the final
//! database write.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::extract::extract_html;
use crate::knowledge::KnowledgeClient;
use crate::mode::{select_mode, Mode};
use crate::prompt::{chat_prompt, experiment_prompt};
use crate::providers::ProviderHandle;
use crate::store::{MessageStore, MessageUpdate};
use crate::{ChatMessage, DemoError, Result, Role};

/// One client-visible event. Serialized as a tagged JSON object per SSE
/// event; the terminal sentinel is emitted by the transport layer, not here.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Meta {
        conversation_id: String,
        message_id: String,
        mode: Mode,
    },
    Delta {
        text: String,
    },
    Artifact {
        artifact_id: String,
        message_id: String,
    },
    Warning {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Inbound generation request, transport-agnostic.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub prompt: String,
    pub conversation_id: Option<String>,
    pub pending_message_id: Option<String>,
    pub model: Option<String>,
    /// Restricted-access callers are never allowed to mint new artifacts.
    pub chat_only: bool,
}

#[derive(Debug)]
pub struct GenerationOutcome {
    pub conversation_id: String,
    pub message_id: String,
    pub mode: Mode,
    pub artifact_id: Option<String>,
    pub final_text: String,
    pub html_found: bool,
}

/// Drive one generation request end to end, sending events through `tx`.
///
/// State path: mode decision → (experiment only) artifact-id persist →
/// provider stream relay → extraction and final persist. Provider failure
/// persists the partial buffer, emits a single error event, and returns the
/// error.
pub async fn run_generation(
    request: GenerationRequest,
    store: &MessageStore,
    knowledge: &KnowledgeClient,
    client: &ProviderHandle,
    model: &str,
    tx: &mpsc::UnboundedSender<StreamEvent>,
) -> Result<GenerationOutcome> {
    match generate(request, store, knowledge, client, model, tx).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            // Exactly one error event per failed stream, whatever the path.
            let _ = tx.send(StreamEvent::Error { message: e.to_string() });
            Err(e)
        }
    }
}

async fn generate(
    request: GenerationRequest,
    store: &MessageStore,
    knowledge: &KnowledgeClient,
    client: &ProviderHandle,
    model: &str,
    tx: &mpsc::UnboundedSender<StreamEvent>,
) -> Result<GenerationOutcome> {
    let prompt_text = request.prompt.trim().to_string();
    if prompt_text.is_empty() {
        return Err(DemoError::EmptyPrompt);
    }

    // -- Conversation and message rows --------------------------------------

    let conversation_id = match &request.conversation_id {
        Some(id) => {
            if !store.conversation_exists(id)? {
                return Err(DemoError::UnknownConversation(id.clone()));
            }
            id.clone()
        }
        None => store.create_conversation(&conversation_title(&prompt_text))?,
    };

    let message_id = match &request.pending_message_id {
        Some(id) => {
            store
                .get_message(id)?
                .ok_or_else(|| DemoError::UnknownMessage(id.clone()))?;
            id.clone()
        }
        None => {
            store.append_message(&conversation_id, Role::User, &prompt_text)?;
            store.append_message(&conversation_id, Role::Assistant, "")?.id
        }
    };

    // -- Mode decision -------------------------------------------------------

    let history = store.chat_history(&conversation_id)?;
    let mode = select_mode(&history, request.chat_only);
    info!(%conversation_id, %message_id, %mode, "generation started");

    let _ = tx.send(StreamEvent::Meta {
        conversation_id: conversation_id.clone(),
        message_id: message_id.clone(),
        mode,
    });

    // Experiment mode assigns and persists the artifact id up front, before
    // any provider call, so clients can poll for it deterministically
    // instead of racing a fence-detection heuristic.
    let artifact_id = if mode == Mode::Experiment {
        let id = Uuid::new_v4().to_string();
        match store.update_message(&message_id, MessageUpdate::artifact_id(id.clone())) {
            Ok(Some(_)) => {}
            Ok(None) => return Err(DemoError::UnknownMessage(message_id)),
            // Bookkeeping failure must not kill the live stream; the final
            // write carries the id again.
            Err(e) => error!(%message_id, error = %e, "early artifact-id persist failed"),
        }
        let _ = tx.send(StreamEvent::Artifact {
            artifact_id: id.clone(),
            message_id: message_id.clone(),
        });
        Some(id)
    } else {
        None
    };

    // -- Prompt assembly -----------------------------------------------------

    let knowledge_text = knowledge.fetch(&prompt_text).await;
    let system = match mode {
        Mode::Experiment => experiment_prompt(&prompt_text, &knowledge_text),
        Mode::Chat => chat_prompt(&knowledge_text),
    };

    let mut messages = vec![ChatMessage::system(system)];
    messages.extend(history.iter().map(ChatMessage::from));
    let have_user_turn = history
        .last()
        .is_some_and(|turn| turn.role == Role::User && turn.text == prompt_text);
    if !have_user_turn {
        messages.push(ChatMessage::user(prompt_text.clone()));
    }

    // -- Streaming -----------------------------------------------------------

    let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<String>();
    let stream_client = client.clone();
    let stream_model = model.to_string();
    let stream_task = tokio::spawn(async move {
        stream_client
            .stream_chat(&messages, &stream_model, &chunk_tx)
            .await
    });

    let mut buffer = String::new();
    while let Some(chunk) = chunk_rx.recv().await {
        buffer.push_str(&chunk);
        let _ = tx.send(StreamEvent::Delta { text: chunk });
    }

    let stream_result = match stream_task.await {
        Ok(result) => result,
        Err(e) => Err(DemoError::Provider(format!("stream task failed: {}", e))),
    };

    if let Err(e) = stream_result {
        // Save whatever arrived before the failure; the raw text is still
        // worth more than nothing.
        persist_final(store, &message_id, MessageUpdate::content(buffer.clone()));
        return Err(e);
    }

    // -- Completion ----------------------------------------------------------

    let mut html_found = false;
    match mode {
        Mode::Experiment => {
            let extracted = extract_html(&buffer);
            html_found = extracted.html.is_some();
            if !html_found {
                warn!(%message_id, "no HTML document found in model output");
                let _ = tx.send(StreamEvent::Warning {
                    message: "no HTML document found in the reply; raw text saved".to_string(),
                });
            }
            persist_final(
                store,
                &message_id,
                MessageUpdate {
                    content: Some(buffer.clone()),
                    artifact_id: artifact_id.clone(),
                    artifact_html: extracted.html,
                    artifact_title: extracted.title,
                },
            );
        }
        Mode::Chat => {
            persist_final(store, &message_id, MessageUpdate::content(buffer.clone()));
        }
    }

    info!(%message_id, %mode, html_found, chars = buffer.len(), "generation complete");

    Ok(GenerationOutcome {
        conversation_id,
        message_id,
        mode,
        artifact_id,
        final_text: buffer,
        html_found,
    })
}

/// Persistence failures at the end of a stream are logged, never fatal: the
/// user keeps the live text even when server-side bookkeeping fails.
fn persist_final(store: &MessageStore, message_id: &str, update: MessageUpdate) {
    match store.update_message(message_id, update) {
        Ok(Some(_)) => {}
        Ok(None) => error!(%message_id, "final persist skipped: message row missing"),
        Err(e) => error!(%message_id, error = %e, "final persist failed"),
    }
}

fn conversation_title(prompt: &str) -> String {
    let mut title: String = prompt.chars().take(80).collect();
    if title.len() < prompt.len() {
        title.push('…');
    }
    title
}
