//! Database queries for conversations and messages

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::connection::{format_ts, parse_ts, Store};
use crate::error::{LearaError, Result};
use crate::types::*;

/// Characters of the first message used as a new conversation's title
pub const TITLE_MAX_CHARS: usize = 50;

const CONVERSATION_COLUMNS: &str = "id, title, created_at, updated_at, message_count";
const MESSAGE_COLUMNS: &str = "id, conversation_id, content, sender, timestamp";

fn uuid_column(row: &Row, column: &str) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(column)?;
    Uuid::parse_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub fn conversation_from_row(row: &Row) -> rusqlite::Result<Conversation> {
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(Conversation {
        id: uuid_column(row, "id")?,
        title: row.get("title")?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
        message_count: row.get("message_count")?,
    })
}

pub fn message_from_row(row: &Row) -> rusqlite::Result<Message> {
    let sender_str: String = row.get("sender")?;
    let sender = sender_str.parse().map_err(|e: LearaError| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let timestamp: String = row.get("timestamp")?;

    Ok(Message {
        id: uuid_column(row, "id")?,
        conversation_id: uuid_column(row, "conversation_id")?,
        content: row.get("content")?,
        sender,
        timestamp: parse_ts(&timestamp)?,
    })
}

/// Title derived from the opening message
pub fn title_from_content(content: &str) -> String {
    content.trim().chars().take(TITLE_MAX_CHARS).collect()
}

/// Append a message, creating its conversation when needed
///
/// The caller must run this inside a transaction: the conversation insert,
/// message insert and `message_count` refresh commit or roll back together.
/// `message_count` is recomputed from the message rows rather than
/// incremented, so it can never drift from the actual count.
pub fn append_message(
    conn: &Connection,
    conversation_id: Option<ConversationId>,
    content: &str,
    sender: Sender,
) -> Result<(Conversation, Message)> {
    let now = Utc::now();
    let now_str = format_ts(&now);
    let conversation_id = conversation_id.unwrap_or_else(Uuid::new_v4);
    let conversation_key = conversation_id.to_string();

    let created = conn.execute(
        "INSERT INTO conversations (id, title, created_at, updated_at, message_count)
         VALUES (?1, ?2, ?3, ?3, 0)
         ON CONFLICT (id) DO NOTHING",
        params![conversation_key, title_from_content(content), now_str],
    )?;
    if created > 0 {
        tracing::debug!(conversation_id = %conversation_id, "Conversation created");
    }

    // Never earlier than the newest message already stored, so chronological
    // reads stay ordered even if the clock steps back
    let timestamp: String = conn.query_row(
        "SELECT MAX(?1, COALESCE(MAX(timestamp), ?1)) FROM messages WHERE conversation_id = ?2",
        params![now_str, conversation_key],
        |row| row.get(0),
    )?;

    let message = Message {
        id: Uuid::new_v4(),
        conversation_id,
        content: content.to_string(),
        sender,
        timestamp: parse_ts(&timestamp)?,
    };

    conn.execute(
        "INSERT INTO messages (id, conversation_id, content, sender, timestamp)
         VALUES (?, ?, ?, ?, ?)",
        params![
            message.id.to_string(),
            conversation_key,
            message.content,
            sender.as_str(),
            timestamp
        ],
    )?;

    conn.execute(
        "UPDATE conversations SET
            message_count = (SELECT COUNT(*) FROM messages WHERE conversation_id = ?1),
            updated_at = MAX(updated_at, ?2)
         WHERE id = ?1",
        params![conversation_key, now_str],
    )?;

    tracing::debug!(
        conversation_id = %conversation_id,
        message_id = %message.id,
        sender = %sender,
        "Message appended"
    );

    let conversation = get_conversation(conn, conversation_id)?;
    Ok((conversation, message))
}

pub fn get_conversation(conn: &Connection, id: ConversationId) -> Result<Conversation> {
    conn.query_row(
        &format!(
            "SELECT {} FROM conversations WHERE id = ?",
            CONVERSATION_COLUMNS
        ),
        params![id.to_string()],
        conversation_from_row,
    )
    .optional()?
    .ok_or_else(|| LearaError::not_found("conversation", id))
}

/// Conversations, most recently updated first
pub fn list_conversations(conn: &Connection, limit: u32, offset: u32) -> Result<Vec<Conversation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM conversations ORDER BY updated_at DESC, id ASC LIMIT ? OFFSET ?",
        CONVERSATION_COLUMNS
    ))?;
    let conversations = stmt
        .query_map(params![limit, offset], conversation_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(conversations)
}

/// Messages of a conversation in chronological order, optionally capped to
/// the first `limit`
pub fn get_messages(
    conn: &Connection,
    conversation_id: ConversationId,
    limit: Option<u32>,
) -> Result<Vec<Message>> {
    get_conversation(conn, conversation_id)?;

    // SQLite treats a negative LIMIT as "no limit"
    let limit = limit.map(i64::from).unwrap_or(-1);
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM messages WHERE conversation_id = ?
         ORDER BY timestamp ASC, rowid ASC LIMIT ?",
        MESSAGE_COLUMNS
    ))?;
    let messages = stmt
        .query_map(params![conversation_id.to_string(), limit], message_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(messages)
}

/// The last `count` messages of a conversation, returned oldest first
pub fn recent_messages(
    conn: &Connection,
    conversation_id: ConversationId,
    count: u32,
) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {cols} FROM (
            SELECT {cols}, rowid AS seq FROM messages WHERE conversation_id = ?
            ORDER BY timestamp DESC, rowid DESC LIMIT ?
         ) ORDER BY timestamp ASC, seq ASC",
        cols = MESSAGE_COLUMNS
    ))?;
    let messages = stmt
        .query_map(params![conversation_id.to_string(), count], message_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(messages)
}

impl Store {
    /// Append a message atomically; `conversation_id` of `None` starts a new
    /// conversation
    pub async fn append_message(
        &self,
        conversation_id: Option<ConversationId>,
        content: &str,
        sender: Sender,
    ) -> Result<(Conversation, Message)> {
        require_non_empty("content", content)?;
        let content = content.to_string();
        self.with_transaction(move |conn| append_message(conn, conversation_id, &content, sender))
            .await
    }

    pub async fn get_conversation(&self, id: ConversationId) -> Result<Conversation> {
        self.with_connection(move |conn| get_conversation(conn, id))
            .await
    }

    pub async fn list_conversations(&self, limit: u32, offset: u32) -> Result<Vec<Conversation>> {
        self.with_connection(move |conn| list_conversations(conn, limit, offset))
            .await
    }

    pub async fn get_messages(
        &self,
        conversation_id: ConversationId,
        limit: Option<u32>,
    ) -> Result<Vec<Message>> {
        self.with_connection(move |conn| get_messages(conn, conversation_id, limit))
            .await
    }

    pub async fn recent_messages(
        &self,
        conversation_id: ConversationId,
        count: u32,
    ) -> Result<Vec<Message>> {
        self.with_connection(move |conn| recent_messages(conn, conversation_id, count))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::connection::test_connection;

    fn message_rows(conn: &Connection, id: ConversationId) -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?",
            params![id.to_string()],
            |r| r.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_append_creates_conversation() {
        let conn = test_connection();
        let (conversation, message) =
            append_message(&conn, None, "Hello there, remember my cat is Milo", Sender::User)
                .unwrap();

        assert_eq!(conversation.message_count, 1);
        assert_eq!(conversation.title, "Hello there, remember my cat is Milo");
        assert_eq!(message.conversation_id, conversation.id);
        assert_eq!(message.sender, Sender::User);
    }

    #[test]
    fn test_count_tracks_messages() {
        let conn = test_connection();
        let (conversation, _) = append_message(&conn, None, "one", Sender::User).unwrap();
        for i in 0..4 {
            let sender = if i % 2 == 0 { Sender::Assistant } else { Sender::User };
            let (updated, _) =
                append_message(&conn, Some(conversation.id), "more", sender).unwrap();
            assert_eq!(updated.message_count, i + 2);
            assert_eq!(updated.message_count, message_rows(&conn, conversation.id));
        }
    }

    #[test]
    fn test_unknown_id_creates_conversation_under_that_id() {
        let conn = test_connection();
        let id = Uuid::new_v4();
        let (conversation, _) = append_message(&conn, Some(id), "hi", Sender::User).unwrap();
        assert_eq!(conversation.id, id);
        assert_eq!(conversation.message_count, 1);
    }

    #[test]
    fn test_title_is_truncated() {
        let long = "é".repeat(80);
        assert_eq!(title_from_content(&long).chars().count(), TITLE_MAX_CHARS);
        assert_eq!(title_from_content("  short  "), "short");
    }

    #[test]
    fn test_failed_transaction_leaves_count_consistent() {
        let mut conn = test_connection();
        let (conversation, _) = append_message(&conn, None, "first", Sender::User).unwrap();

        {
            let tx = conn.transaction().unwrap();
            append_message(&tx, Some(conversation.id), "second", Sender::Assistant).unwrap();
            // dropped without commit
        }

        let reloaded = get_conversation(&conn, conversation.id).unwrap();
        assert_eq!(reloaded.message_count, 1);
        assert_eq!(message_rows(&conn, conversation.id), 1);
    }

    #[test]
    fn test_message_reads() {
        let conn = test_connection();
        let (conversation, _) = append_message(&conn, None, "m0", Sender::User).unwrap();
        for i in 1..5 {
            append_message(&conn, Some(conversation.id), &format!("m{}", i), Sender::User)
                .unwrap();
        }

        let all = get_messages(&conn, conversation.id, None).unwrap();
        let contents: Vec<_> = all.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m0", "m1", "m2", "m3", "m4"]);

        let first_two = get_messages(&conn, conversation.id, Some(2)).unwrap();
        assert_eq!(first_two.len(), 2);

        let recent = recent_messages(&conn, conversation.id, 2).unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4"]);

        assert!(matches!(
            get_messages(&conn, Uuid::new_v4(), None),
            Err(LearaError::NotFound { .. })
        ));
    }

    #[test]
    fn test_list_conversations_most_recent_first() {
        let conn = test_connection();
        let (a, _) = append_message(&conn, None, "a", Sender::User).unwrap();
        let (b, _) = append_message(&conn, None, "b", Sender::User).unwrap();
        append_message(&conn, Some(a.id), "again", Sender::Assistant).unwrap();

        let listed = list_conversations(&conn, 10, 0).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, a.id);
        assert_eq!(listed[1].id, b.id);
    }
}
