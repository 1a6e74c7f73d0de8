use anyhow::Result;
use rusqlite::OptionalExtension;

use crate::Database;
use crate::models::{HotspotRow, UserRow};
use crate::posts::placeholders;
use crate::users::{map_user_row_at, user_columns_prefixed};

impl Database {
    pub fn insert_hotspot(
        &self,
        id: &str,
        author_id: &str,
        title: &str,
        description: &str,
        latitude: f64,
        longitude: f64,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO hotspots (id, author_id, title, description, latitude, longitude, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![id, author_id, title, description, latitude, longitude, created_at],
            )?;
            Ok(())
        })
    }

    pub fn get_hotspot(&self, id: &str) -> Result<Option<HotspotRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, author_id, title, description, latitude, longitude, created_at
                 FROM hotspots WHERE id = ?1",
            )?;
            let row = stmt.query_row([id], map_hotspot_row).optional()?;
            Ok(row)
        })
    }

    /// All hotspots, newest first, with authors. Hotspots whose author
    /// was deleted concurrently are omitted.
    pub fn list_hotspots(&self) -> Result<Vec<(HotspotRow, UserRow)>> {
        self.with_conn(|conn| {
            let user_cols = user_columns_prefixed("u");
            let mut stmt = conn.prepare(&format!(
                "SELECT h.id, h.author_id, h.title, h.description, h.latitude, h.longitude,
                        h.created_at, {user_cols}
                 FROM hotspots h
                 JOIN users u ON h.author_id = u.id
                 ORDER BY h.created_at DESC"
            ))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((map_hotspot_row(row)?, map_user_row_at(row, 7)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Removes the hotspot and its joined set in one transaction.
    pub fn delete_hotspot(&self, id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM hotspot_members WHERE hotspot_id = ?1", [id])?;
            tx.execute("DELETE FROM hotspots WHERE id = ?1", [id])?;
            tx.commit()?;
            Ok(())
        })
    }

    // -- Joined set --

    pub fn hotspot_member_exists(&self, hotspot_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM hotspot_members WHERE hotspot_id = ?1 AND user_id = ?2",
                    [hotspot_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn insert_hotspot_member(
        &self,
        hotspot_id: &str,
        user_id: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO hotspot_members (hotspot_id, user_id, created_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![hotspot_id, user_id, created_at],
            )?;
            Ok(())
        })
    }

    pub fn delete_hotspot_member(&self, hotspot_id: &str, user_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM hotspot_members WHERE hotspot_id = ?1 AND user_id = ?2",
                [hotspot_id, user_id],
            )?;
            Ok(())
        })
    }

    /// Joined count is always recomputed from the set.
    pub fn count_hotspot_members(&self, hotspot_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let count: usize = conn.query_row(
                "SELECT COUNT(*) FROM hotspot_members WHERE hotspot_id = ?1",
                [hotspot_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// The joined users of one hotspot, in join order, skipping members
    /// whose accounts no longer exist.
    pub fn hotspot_member_profiles(&self, hotspot_id: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let user_cols = user_columns_prefixed("u");
            let mut stmt = conn.prepare(&format!(
                "SELECT {user_cols}
                 FROM hotspot_members m
                 JOIN users u ON m.user_id = u.id
                 WHERE m.hotspot_id = ?1
                 ORDER BY m.created_at ASC, m.rowid ASC"
            ))?;
            let rows = stmt
                .query_map([hotspot_id], |row| map_user_row_at(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Batch variant of [`Self::hotspot_member_profiles`] for the list view.
    pub fn members_for_hotspots(&self, hotspot_ids: &[String]) -> Result<Vec<(String, UserRow)>> {
        if hotspot_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let user_cols = user_columns_prefixed("u");
            let sql = format!(
                "SELECT m.hotspot_id, {user_cols}
                 FROM hotspot_members m
                 JOIN users u ON m.user_id = u.id
                 WHERE m.hotspot_id IN ({})
                 ORDER BY m.created_at ASC, m.rowid ASC",
                placeholders(hotspot_ids.len())
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = hotspot_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok((row.get(0)?, map_user_row_at(row, 1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn hotspot_ids_joined_by(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT hotspot_id FROM hotspot_members WHERE user_id = ?1")?;
            let rows = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn map_hotspot_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<HotspotRow> {
    Ok(HotspotRow {
        id: row.get(0)?,
        author_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        latitude: row.get(4)?,
        longitude: row.get(5)?,
        created_at: row.get(6)?,
    })
}
