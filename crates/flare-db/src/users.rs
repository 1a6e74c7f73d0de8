use anyhow::Result;
use rusqlite::OptionalExtension;

use crate::Database;
use crate::models::UserRow;

impl Database {
    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
        avatar_url: &str,
        bio: &str,
        now: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, avatar_url, bio, last_seen, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                rusqlite::params![id, username, password_hash, avatar_url, bio, now],
            )?;
            Ok(())
        })
    }

    /// Handle lookup is case-insensitive (the column is COLLATE NOCASE).
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE username = ?1"
            ))?;
            let row = stmt.query_row([username], map_user_row).optional()?;
            Ok(row)
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"))?;
            let row = stmt.query_row([id], map_user_row).optional()?;
            Ok(row)
        })
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC"
            ))?;
            let rows = stmt
                .query_map([], map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns false when the user no longer exists.
    pub fn update_profile(&self, id: &str, avatar_url: &str, bio: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET avatar_url = ?2, bio = ?3 WHERE id = ?1",
                rusqlite::params![id, avatar_url, bio],
            )?;
            Ok(changed > 0)
        })
    }

    /// Operator tooling — there is no HTTP surface for promoting admins.
    pub fn set_admin(&self, id: &str, is_admin: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET is_admin = ?2 WHERE id = ?1",
                rusqlite::params![id, is_admin],
            )?;
            Ok(())
        })
    }

    pub fn set_presence(&self, id: &str, is_online: bool, last_seen: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET is_online = ?2, last_seen = ?3 WHERE id = ?1",
                rusqlite::params![id, is_online, last_seen],
            )?;
            Ok(())
        })
    }

    pub fn delete_user(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
            Ok(())
        })
    }
}

const USER_COLUMNS: &str =
    "id, username, password, avatar_url, bio, is_admin, is_online, last_seen, created_at";

pub(crate) fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        avatar_url: row.get(3)?,
        bio: row.get(4)?,
        is_admin: row.get(5)?,
        is_online: row.get(6)?,
        last_seen: row.get(7)?,
        created_at: row.get(8)?,
    })
}

/// Shared by the post/hotspot queries that join an author or member onto
/// their owning row; `offset` is the column index where the user columns
/// start in the joined SELECT.
pub(crate) fn map_user_row_at(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(offset)?,
        username: row.get(offset + 1)?,
        password: row.get(offset + 2)?,
        avatar_url: row.get(offset + 3)?,
        bio: row.get(offset + 4)?,
        is_admin: row.get(offset + 5)?,
        is_online: row.get(offset + 6)?,
        last_seen: row.get(offset + 7)?,
        created_at: row.get(offset + 8)?,
    })
}

pub(crate) fn user_columns_prefixed(alias: &str) -> String {
    [
        "id",
        "username",
        "password",
        "avatar_url",
        "bio",
        "is_admin",
        "is_online",
        "last_seen",
        "created_at",
    ]
    .iter()
    .map(|c| format!("{alias}.{c}"))
    .collect::<Vec<_>>()
    .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format_timestamp;
    use chrono::Utc;
    use uuid::Uuid;

    fn add_user(db: &Database, username: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let now = format_timestamp(Utc::now());
        db.create_user(&id, username, "hash", "", "", &now).unwrap();
        id
    }

    #[test]
    fn handle_uniqueness_is_case_insensitive() {
        let db = Database::open_in_memory().unwrap();
        add_user(&db, "Alice");

        let now = format_timestamp(Utc::now());
        let err = db.create_user(
            &Uuid::new_v4().to_string(),
            "ALICE",
            "hash",
            "",
            "",
            &now,
        );
        assert!(err.is_err());

        assert!(db.get_user_by_username("alice").unwrap().is_some());
    }

    #[test]
    fn update_profile_reports_missing_user() {
        let db = Database::open_in_memory().unwrap();
        let id = add_user(&db, "bob");

        assert!(db.update_profile(&id, "http://a", "new bio").unwrap());
        assert!(!db.update_profile("no-such-id", "http://a", "bio").unwrap());

        let row = db.get_user_by_id(&id).unwrap().unwrap();
        assert_eq!(row.bio, "new bio");
    }
}
