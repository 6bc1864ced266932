use std::collections::HashMap;

use rusqlite::{params, Connection, OptionalExtension};

use natter_shared::types::{MessageId, UserId};

use crate::database::{decode_ts, decode_uuid, encode_ts, now_micros, Database};
use crate::error::{Result, StoreError};
use crate::models::{Message, NewMessage};

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, text, image, seen, created_at";

impl Database {
    /// Persist a new message with `seen = false`.
    ///
    /// `created_at` never goes backwards: if the wall clock is behind the
    /// newest stored message, the newest timestamp is reused.
    pub fn create_message(&mut self, new: NewMessage) -> Result<Message> {
        let tx = self.conn_mut().transaction()?;

        let latest: Option<String> = tx
            .query_row("SELECT MAX(created_at) FROM messages", [], |row| row.get(0))
            .optional()?
            .flatten();

        let mut created_at = now_micros();
        if let Some(raw) = latest {
            let latest = decode_ts(0, &raw)?;
            if latest > created_at {
                created_at = latest;
            }
        }

        let message = Message {
            id: MessageId::new(),
            sender_id: new.sender_id,
            receiver_id: new.receiver_id,
            text: new.text,
            image: new.image,
            seen: false,
            created_at,
        };

        tx.execute(
            "INSERT INTO messages (id, sender_id, receiver_id, text, image, seen, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![
                message.id.to_string(),
                message.sender_id.to_string(),
                message.receiver_id.to_string(),
                message.text,
                message.image,
                encode_ts(&message.created_at),
            ],
        )?;
        tx.commit()?;

        Ok(message)
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Full conversation between two users in both directions, oldest first.
    pub fn find_between(&self, a: UserId, b: UserId) -> Result<Vec<Message>> {
        select_between(self.conn(), a, b)
    }

    /// Read the conversation between `viewer` and `peer`, then mark what
    /// `peer` sent to `viewer` as seen, in one transaction. Messages come
    /// back as they were before the mark. Returns them with the number of
    /// messages that changed state.
    pub fn read_conversation(
        &mut self,
        viewer: UserId,
        peer: UserId,
    ) -> Result<(Vec<Message>, usize)> {
        let tx = self.conn_mut().transaction()?;
        let messages = select_between(&tx, viewer, peer)?;
        let marked = update_seen_from(&tx, peer, viewer)?;
        tx.commit()?;
        Ok((messages, marked))
    }

    /// Flip one message to seen. Returns `false` if no such message exists.
    pub fn mark_seen(&self, id: MessageId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET seen = 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Mark every unseen message from `sender` to `receiver` as seen.
    /// Returns the number of messages that changed state.
    pub fn mark_all_seen_from(&self, sender: UserId, receiver: UserId) -> Result<usize> {
        update_seen_from(self.conn(), sender, receiver)
    }

    /// Unseen messages addressed to `receiver`, counted per sender. Senders
    /// with nothing unseen are absent from the map.
    pub fn count_unseen_grouped_by_sender(&self, receiver: UserId) -> Result<HashMap<UserId, u32>> {
        let mut stmt = self.conn().prepare(
            "SELECT sender_id, COUNT(*)
             FROM messages
             WHERE receiver_id = ?1 AND seen = 0
             GROUP BY sender_id",
        )?;

        let rows = stmt.query_map(params![receiver.to_string()], |row| {
            let sender: String = row.get(0)?;
            let count: u32 = row.get(1)?;
            Ok((UserId(decode_uuid(0, &sender)?), count))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (sender, count) = row?;
            counts.insert(sender, count);
        }
        Ok(counts)
    }
}

fn select_between(conn: &Connection, a: UserId, b: UserId) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS}
         FROM messages
         WHERE (sender_id = ?1 AND receiver_id = ?2)
            OR (sender_id = ?2 AND receiver_id = ?1)
         ORDER BY created_at ASC, rowid ASC"
    ))?;

    let rows = stmt.query_map(params![a.to_string(), b.to_string()], row_to_message)?;

    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

fn update_seen_from(conn: &Connection, sender: UserId, receiver: UserId) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE messages SET seen = 1
         WHERE sender_id = ?1 AND receiver_id = ?2 AND seen = 0",
        params![sender.to_string(), receiver.to_string()],
    )?;
    Ok(affected)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let sender_str: String = row.get(1)?;
    let receiver_str: String = row.get(2)?;
    let ts_str: String = row.get(6)?;

    Ok(Message {
        id: MessageId(decode_uuid(0, &id_str)?),
        sender_id: UserId(decode_uuid(1, &sender_str)?),
        receiver_id: UserId(decode_uuid(2, &receiver_str)?),
        text: row.get(3)?,
        image: row.get(4)?,
        seen: row.get(5)?,
        created_at: decode_ts(6, &ts_str)?,
    })
}
