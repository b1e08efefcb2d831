//! Conversation cache.
//!
//! Each conversation `(viewer, counterpart)` is mirrored as a full ordered
//! list. The synchronizer always rewrites the whole list from an
//! authoritative fetch -- it never merges -- so the cache API is
//! replace / load / clear rather than row-level CRUD.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use courant_shared::message::Message;
use courant_shared::types::{CorrelationId, MessageId, UserId};

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Atomically replace the cached list for one conversation with the
    /// given authoritative ordering.
    pub fn replace_conversation(
        &mut self,
        viewer: UserId,
        counterpart: UserId,
        messages: &[Message],
    ) -> Result<()> {
        let tx = self.conn_mut().transaction()?;

        tx.execute(
            "DELETE FROM cached_messages WHERE viewer = ?1 AND counterpart = ?2",
            params![viewer.0.to_string(), counterpart.0.to_string()],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO cached_messages
                 (viewer, counterpart, id, correlation_id, sender, receiver,
                  content, reply_to, reactions, is_deleted, status,
                  created_at, delivered_at, read_at, position)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            )?;

            for (position, m) in messages.iter().enumerate() {
                stmt.execute(params![
                    viewer.0.to_string(),
                    counterpart.0.to_string(),
                    m.id.0.to_string(),
                    m.correlation_id.0.to_string(),
                    m.sender.0.to_string(),
                    m.receiver.0.to_string(),
                    serde_json::to_string(&m.content)?,
                    m.reply_to.map(|r| r.0.to_string()),
                    serde_json::to_string(&m.reactions)?,
                    m.is_deleted as i64,
                    serde_json::to_string(&m.status)?,
                    m.created_at.to_rfc3339(),
                    m.delivered_at.map(|t| t.to_rfc3339()),
                    m.read_at.map(|t| t.to_rfc3339()),
                    position as i64,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Load the cached list for one conversation, in authoritative order.
    /// Returns an empty list when the conversation has never been cached.
    pub fn load_conversation(
        &self,
        viewer: UserId,
        counterpart: UserId,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, correlation_id, sender, receiver, content, reply_to,
                    reactions, is_deleted, status, created_at, delivered_at, read_at
             FROM cached_messages
             WHERE viewer = ?1 AND counterpart = ?2
             ORDER BY position ASC",
        )?;

        let rows = stmt.query_map(
            params![viewer.0.to_string(), counterpart.0.to_string()],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Drop every cached message of one conversation. This is the only
    /// physical removal path (explicit clear-conversation operation).
    pub fn clear_conversation(&self, viewer: UserId, counterpart: UserId) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM cached_messages WHERE viewer = ?1 AND counterpart = ?2",
            params![viewer.0.to_string(), counterpart.0.to_string()],
        )?;
        Ok(affected)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let corr_str: String = row.get(1)?;
    let sender_str: String = row.get(2)?;
    let receiver_str: String = row.get(3)?;
    let content_json: String = row.get(4)?;
    let reply_to_str: Option<String> = row.get(5)?;
    let reactions_json: String = row.get(6)?;
    let is_deleted: i64 = row.get(7)?;
    let status_json: String = row.get(8)?;
    let created_str: String = row.get(9)?;
    let delivered_str: Option<String> = row.get(10)?;
    let read_str: Option<String> = row.get(11)?;

    let parse_uuid = |idx: usize, s: &str| {
        Uuid::parse_str(s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    };
    let parse_ts = |idx: usize, s: &str| {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
    };
    let reply_to = match reply_to_str {
        Some(s) => Some(MessageId(parse_uuid(5, &s)?)),
        None => None,
    };
    let delivered_at = match delivered_str {
        Some(s) => Some(parse_ts(10, &s)?),
        None => None,
    };
    let read_at = match read_str {
        Some(s) => Some(parse_ts(11, &s)?),
        None => None,
    };

    Ok(Message {
        id: MessageId(parse_uuid(0, &id_str)?),
        correlation_id: CorrelationId(parse_uuid(1, &corr_str)?),
        sender: UserId(parse_uuid(2, &sender_str)?),
        receiver: UserId(parse_uuid(3, &receiver_str)?),
        content: parse_json(4, &content_json)?,
        reply_to,
        reactions: parse_json(6, &reactions_json)?,
        is_deleted: is_deleted != 0,
        status: parse_json(8, &status_json)?,
        created_at: parse_ts(9, &created_str)?,
        delivered_at,
        read_at,
    })
}

fn parse_json<T: serde::de::DeserializeOwned>(idx: usize, s: &str) -> rusqlite::Result<T> {
    serde_json::from_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
