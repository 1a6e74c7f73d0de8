use anyhow::Result;
use rusqlite::OptionalExtension;

use crate::Database;
use crate::models::MessageRow;

const MESSAGE_COLUMNS: &str =
    "m.id, m.sender_id, u.username, m.recipient_id, m.content, m.is_read, m.read_at, m.created_at";

impl Database {
    pub fn insert_message(
        &self,
        id: &str,
        sender_id: &str,
        recipient_id: Option<&str>,
        content: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, recipient_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, sender_id, recipient_id, content, created_at],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS}
                 FROM messages m
                 LEFT JOIN users u ON m.sender_id = u.id
                 WHERE m.id = ?1"
            ))?;
            let row = stmt.query_row([id], map_message_row).optional()?;
            Ok(row)
        })
    }

    pub fn delete_message(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM messages WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    /// Full two-party thread, oldest first. Never touches read flags —
    /// marking-as-read is a separate explicit operation.
    pub fn messages_between(&self, user_a: &str, user_b: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS}
                 FROM messages m
                 LEFT JOIN users u ON m.sender_id = u.id
                 WHERE (m.sender_id = ?1 AND m.recipient_id = ?2)
                    OR (m.sender_id = ?2 AND m.recipient_id = ?1)
                 ORDER BY m.created_at ASC, m.rowid ASC"
            ))?;
            let rows = stmt
                .query_map([user_a, user_b], map_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Every direct message the user sent or received, newest first.
    /// Broadcast messages (NULL recipient) are not part of any
    /// conversation and are excluded.
    pub fn direct_messages_for_user(&self, user_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS}
                 FROM messages m
                 LEFT JOIN users u ON m.sender_id = u.id
                 WHERE m.recipient_id IS NOT NULL
                   AND (m.sender_id = ?1 OR m.recipient_id = ?1)
                 ORDER BY m.created_at DESC, m.rowid DESC"
            ))?;
            let rows = stmt
                .query_map([user_id], map_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Bulk false→true read transition; returns how many rows flipped.
    /// Naturally idempotent — already-read rows never match the WHERE.
    pub fn mark_messages_read(
        &self,
        recipient_id: &str,
        sender_id: &str,
        read_at: &str,
    ) -> Result<u64> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET is_read = 1, read_at = ?3
                 WHERE recipient_id = ?1 AND sender_id = ?2 AND is_read = 0",
                rusqlite::params![recipient_id, sender_id, read_at],
            )?;
            Ok(changed as u64)
        })
    }
}

fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        sender_username: row.get(2)?,
        recipient_id: row.get(3)?,
        content: row.get(4)?,
        is_read: row.get(5)?,
        read_at: row.get(6)?,
        created_at: row.get(7)?,
    })
}
