//! SQLite-backed conversation/message store. The pipeline only needs two
//! semantics from it: "fetch ordered history" and "update by id with
//! partial fields". The partial update is a real UPDATE, never an upsert,
//! so the early artifact-id write can never be clobbered by a later write
//! that omits it.

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

use crate::{ConversationTurn, DemoError, Result, Role};

/// One persisted message row.
#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub artifact_id: Option<String>,
    pub artifact_html: Option<String>,
    pub artifact_title: Option<String>,
    pub created_at: i64,
}

/// Partial field set for `update_message`. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct MessageUpdate {
    pub content: Option<String>,
    pub artifact_id: Option<String>,
    pub artifact_html: Option<String>,
    pub artifact_title: Option<String>,
}

impl MessageUpdate {
    pub fn content(text: impl Into<String>) -> Self {
        MessageUpdate { content: Some(text.into()), ..Default::default() }
    }

    pub fn artifact_id(id: impl Into<String>) -> Self {
        MessageUpdate { artifact_id: Some(id.into()), ..Default::default() }
    }
}

pub struct MessageStore {
    conn: Mutex<Connection>,
}

impl MessageStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversations (
                 id          TEXT PRIMARY KEY,
                 title       TEXT NOT NULL,
                 created_at  INTEGER NOT NULL DEFAULT (strftime('%s','now'))
             );
             CREATE TABLE IF NOT EXISTS messages (
                 id               TEXT PRIMARY KEY,
                 conversation_id  TEXT NOT NULL REFERENCES conversations(id),
                 role             TEXT NOT NULL,
                 content          TEXT NOT NULL DEFAULT '',
                 artifact_id      TEXT,
                 artifact_html    TEXT,
                 artifact_title   TEXT,
                 created_at       INTEGER NOT NULL DEFAULT (strftime('%s','now'))
             );
             CREATE INDEX IF NOT EXISTS idx_messages_conversation
                 ON messages(conversation_id);",
        )?;
        Ok(MessageStore { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("store mutex poisoned")
    }

    /// Create a conversation plus its root metadata turn (the first
    /// assistant row, which carries the title and is never part of chat
    /// history). Returns the conversation id.
    pub fn create_conversation(&self, title: &str) -> Result<String> {
        let conversation_id = Uuid::new_v4().to_string();
        let root_id = Uuid::new_v4().to_string();
        let conn = self.lock();
        conn.execute(
            "INSERT INTO conversations (id, title) VALUES (?1, ?2)",
            params![conversation_id, title],
        )?;
        conn.execute(
            "INSERT INTO messages (id, conversation_id, role, content) VALUES (?1, ?2, ?3, ?4)",
            params![root_id, conversation_id, Role::Assistant.as_str(), title],
        )?;
        Ok(conversation_id)
    }

    pub fn conversation_exists(&self, conversation_id: &str) -> Result<bool> {
        let conn = self.lock();
        let found: Option<String> = conn
            .query_row(
                "SELECT id FROM conversations WHERE id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<StoredMessage> {
        if !self.conversation_exists(conversation_id)? {
            return Err(DemoError::UnknownConversation(conversation_id.to_string()));
        }
        let id = Uuid::new_v4().to_string();
        {
            let conn = self.lock();
            conn.execute(
                "INSERT INTO messages (id, conversation_id, role, content) VALUES (?1, ?2, ?3, ?4)",
                params![id, conversation_id, role.as_str(), content],
            )?;
        }
        self.get_message(&id)?
            .ok_or_else(|| DemoError::UnknownMessage(id))
    }

    pub fn get_message(&self, id: &str) -> Result<Option<StoredMessage>> {
        let conn = self.lock();
        let message = conn
            .query_row(
                "SELECT id, conversation_id, role, content, artifact_id, artifact_html,
                        artifact_title, created_at
                 FROM messages WHERE id = ?1",
                params![id],
                row_to_message,
            )
            .optional()?;
        Ok(message)
    }

    /// All messages of a conversation in insertion order, root turn first.
    pub fn get_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, role, content, artifact_id, artifact_html,
                    artifact_title, created_at
             FROM messages WHERE conversation_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![conversation_id], row_to_message)?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Partial update by id. Returns the updated row, or `None` when no row
    /// with that id exists.
    pub fn update_message(
        &self,
        id: &str,
        update: MessageUpdate,
    ) -> Result<Option<StoredMessage>> {
        let mut sets = Vec::new();
        let mut values: Vec<String> = Vec::new();

        if let Some(content) = update.content {
            sets.push("content = ?");
            values.push(content);
        }
        if let Some(artifact_id) = update.artifact_id {
            sets.push("artifact_id = ?");
            values.push(artifact_id);
        }
        if let Some(artifact_html) = update.artifact_html {
            sets.push("artifact_html = ?");
            values.push(artifact_html);
        }
        if let Some(artifact_title) = update.artifact_title {
            sets.push("artifact_title = ?");
            values.push(artifact_title);
        }

        if !sets.is_empty() {
            let sql = format!("UPDATE messages SET {} WHERE id = ?", sets.join(", "));
            values.push(id.to_string());
            let changed = self.lock().execute(&sql, params_from_iter(values.iter()))?;
            if changed == 0 {
                return Ok(None);
            }
        }

        self.get_message(id)
    }

    /// Conversation history as role-tagged turns: the root metadata turn and
    /// empty placeholder rows are excluded.
    pub fn chat_history(&self, conversation_id: &str) -> Result<Vec<ConversationTurn>> {
        let messages = self.get_messages(conversation_id)?;
        let mut turns = Vec::new();
        for (index, message) in messages.iter().enumerate() {
            if index == 0 && message.role == Role::Assistant.as_str() {
                continue; // root metadata turn
            }
            if message.content.trim().is_empty() {
                continue; // pending placeholder
            }
            if let Some(role) = Role::from_str_loose(&message.role) {
                turns.push(ConversationTurn { role, text: message.content.clone() });
            }
        }
        Ok(turns)
    }
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
    Ok(StoredMessage {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        artifact_id: row.get(4)?,
        artifact_html: row.get(5)?,
        artifact_title: row.get(6)?,
        created_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MessageStore {
        MessageStore::open_in_memory().expect("in-memory store")
    }

    #[test]
    fn test_create_conversation_inserts_root_turn() {
        let store = store();
        let conversation = store.create_conversation("Pendulum").expect("create");
        let messages = store.get_messages(&conversation).expect("messages");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "assistant");
        assert_eq!(messages[0].content, "Pendulum");
    }

    #[test]
    fn test_append_preserves_insertion_order() {
        let store = store();
        let conversation = store.create_conversation("t").expect("create");
        store.append_message(&conversation, Role::User, "first").expect("append");
        store.append_message(&conversation, Role::Assistant, "second").expect("append");
        store.append_message(&conversation, Role::User, "third").expect("append");

        let contents: Vec<String> = store
            .get_messages(&conversation)
            .expect("messages")
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["t", "first", "second", "third"]);
    }

    #[test]
    fn test_append_to_unknown_conversation_fails() {
        let store = store();
        let result = store.append_message("missing", Role::User, "x");
        assert!(matches!(result, Err(DemoError::UnknownConversation(_))));
    }

    #[test]
    fn test_update_message_partial_fields() {
        let store = store();
        let conversation = store.create_conversation("t").expect("create");
        let message = store
            .append_message(&conversation, Role::Assistant, "")
            .expect("append");

        let updated = store
            .update_message(&message.id, MessageUpdate::artifact_id("art-1"))
            .expect("update")
            .expect("row exists");
        assert_eq!(updated.artifact_id.as_deref(), Some("art-1"));
        assert_eq!(updated.content, "");

        // A later content-only write must not clobber the artifact id.
        let updated = store
            .update_message(&message.id, MessageUpdate::content("final text"))
            .expect("update")
            .expect("row exists");
        assert_eq!(updated.content, "final text");
        assert_eq!(updated.artifact_id.as_deref(), Some("art-1"));
    }

    #[test]
    fn test_update_unknown_message_returns_none() {
        let store = store();
        let result = store
            .update_message("nope", MessageUpdate::content("x"))
            .expect("update");
        assert!(result.is_none());
    }

    #[test]
    fn test_update_with_no_fields_is_a_fetch() {
        let store = store();
        let conversation = store.create_conversation("t").expect("create");
        let message = store
            .append_message(&conversation, Role::User, "hello")
            .expect("append");
        let fetched = store
            .update_message(&message.id, MessageUpdate::default())
            .expect("update")
            .expect("row exists");
        assert_eq!(fetched.content, "hello");
    }

    #[test]
    fn test_chat_history_skips_root_and_placeholder() {
        let store = store();
        let conversation = store.create_conversation("Gravity").expect("create");
        store.append_message(&conversation, Role::User, "show me").expect("append");
        store.append_message(&conversation, Role::Assistant, "").expect("append");

        let history = store.chat_history(&conversation).expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0], ConversationTurn::user("show me"));
    }

    #[test]
    fn test_chat_history_keeps_completed_turns() {
        let store = store();
        let conversation = store.create_conversation("t").expect("create");
        store.append_message(&conversation, Role::User, "q1").expect("append");
        store.append_message(&conversation, Role::Assistant, "a1").expect("append");
        store.append_message(&conversation, Role::User, "q2").expect("append");

        let history = store.chat_history(&conversation).expect("history");
        assert_eq!(history.len(), 3);
        assert_eq!(history[1], ConversationTurn::assistant("a1"));
    }

    #[test]
    fn test_store_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("demoforge.db");

        let conversation = {
            let store = MessageStore::open(&path).expect("open");
            let conversation = store.create_conversation("t").expect("create");
            store.append_message(&conversation, Role::User, "persisted").expect("append");
            conversation
        };

        let store = MessageStore::open(&path).expect("reopen");
        let messages = store.get_messages(&conversation).expect("messages");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "persisted");
    }
}
