use anyhow::Result;
use rusqlite::OptionalExtension;

use crate::Database;
use crate::models::{PostRow, ReplyRow, UserRow};
use crate::users::{map_user_row_at, user_columns_prefixed};

impl Database {
    pub fn insert_post(
        &self,
        id: &str,
        author_id: &str,
        content: &str,
        images_json: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO posts (id, author_id, content, images, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, author_id, content, images_json, created_at],
            )?;
            Ok(())
        })
    }

    pub fn get_post(&self, id: &str) -> Result<Option<PostRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, author_id, content, images, created_at FROM posts WHERE id = ?1",
            )?;
            let row = stmt
                .query_row([id], |row| {
                    Ok(PostRow {
                        id: row.get(0)?,
                        author_id: row.get(1)?,
                        content: row.get(2)?,
                        images: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })
                .optional()?;
            Ok(row)
        })
    }

    /// Feed page, newest first. INNER JOIN on the author: posts whose
    /// author was deleted concurrently are omitted rather than failing
    /// the whole response.
    pub fn list_posts(&self, limit: u32, offset: u32) -> Result<Vec<(PostRow, UserRow)>> {
        self.with_conn(|conn| {
            let user_cols = user_columns_prefixed("u");
            let mut stmt = conn.prepare(&format!(
                "SELECT p.id, p.author_id, p.content, p.images, p.created_at, {user_cols}
                 FROM posts p
                 JOIN users u ON p.author_id = u.id
                 ORDER BY p.created_at DESC
                 LIMIT ?1 OFFSET ?2"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![limit, offset], |row| {
                    let post = PostRow {
                        id: row.get(0)?,
                        author_id: row.get(1)?,
                        content: row.get(2)?,
                        images: row.get(3)?,
                        created_at: row.get(4)?,
                    };
                    Ok((post, map_user_row_at(row, 5)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_posts(&self) -> Result<u32> {
        self.with_conn(|conn| {
            let count: u32 = conn.query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))?;
            Ok(count)
        })
    }

    /// Removes the post together with its like set and reply sequence in
    /// one transaction — no partial deletes.
    pub fn delete_post(&self, id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM post_likes WHERE post_id = ?1", [id])?;
            tx.execute("DELETE FROM replies WHERE post_id = ?1", [id])?;
            tx.execute("DELETE FROM posts WHERE id = ?1", [id])?;
            tx.commit()?;
            Ok(())
        })
    }

    // -- Replies --

    pub fn insert_reply(
        &self,
        id: &str,
        post_id: &str,
        author_id: &str,
        content: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO replies (id, post_id, author_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, post_id, author_id, content, created_at],
            )?;
            Ok(())
        })
    }

    /// Batch-fetch replies (with authors) for a page of posts, in
    /// insertion order. Replies from deleted authors are omitted.
    pub fn replies_for_posts(&self, post_ids: &[String]) -> Result<Vec<(ReplyRow, UserRow)>> {
        if post_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let user_cols = user_columns_prefixed("u");
            let sql = format!(
                "SELECT r.id, r.post_id, r.author_id, r.content, r.created_at, {user_cols}
                 FROM replies r
                 JOIN users u ON r.author_id = u.id
                 WHERE r.post_id IN ({})
                 ORDER BY r.created_at ASC, r.rowid ASC",
                placeholders(post_ids.len())
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = post_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    let reply = ReplyRow {
                        id: row.get(0)?,
                        post_id: row.get(1)?,
                        author_id: row.get(2)?,
                        content: row.get(3)?,
                        created_at: row.get(4)?,
                    };
                    Ok((reply, map_user_row_at(row, 5)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Like set --

    pub fn post_like_exists(&self, post_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM post_likes WHERE post_id = ?1 AND user_id = ?2",
                    [post_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn insert_post_like(&self, post_id: &str, user_id: &str, created_at: &str) -> Result<()> {
        self.with_conn(|conn| {
            // INSERT OR IGNORE: the UNIQUE constraint absorbs a duplicate
            // insert even if the serialized path is ever bypassed.
            conn.execute(
                "INSERT OR IGNORE INTO post_likes (post_id, user_id, created_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![post_id, user_id, created_at],
            )?;
            Ok(())
        })
    }

    pub fn delete_post_like(&self, post_id: &str, user_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM post_likes WHERE post_id = ?1 AND user_id = ?2",
                [post_id, user_id],
            )?;
            Ok(())
        })
    }

    /// Like count is always recomputed from the set.
    pub fn count_post_likes(&self, post_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let count: usize = conn.query_row(
                "SELECT COUNT(*) FROM post_likes WHERE post_id = ?1",
                [post_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Batch-fetch (post_id, user_id) like pairs for a page of posts.
    /// Likes from deleted users are omitted.
    pub fn likes_for_posts(&self, post_ids: &[String]) -> Result<Vec<(String, String)>> {
        if post_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT l.post_id, l.user_id
                 FROM post_likes l
                 JOIN users u ON l.user_id = u.id
                 WHERE l.post_id IN ({})",
                placeholders(post_ids.len())
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = post_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn post_ids_liked_by(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT post_id FROM post_likes WHERE user_id = ?1")?;
            let rows = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

pub(crate) fn placeholders(n: usize) -> String {
    (1..=n)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use crate::{Database, format_timestamp};
    use chrono::Utc;
    use uuid::Uuid;

    fn add_user(db: &Database, username: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let now = format_timestamp(Utc::now());
        db.create_user(&id, username, "hash", "", "", &now).unwrap();
        id
    }

    fn add_post(db: &Database, author_id: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let now = format_timestamp(Utc::now());
        db.insert_post(&id, author_id, "hello", "[]", &now).unwrap();
        id
    }

    #[test]
    fn feed_skips_posts_with_deleted_authors() {
        let db = Database::open_in_memory().unwrap();
        let kept = add_user(&db, "kept");
        let gone = add_user(&db, "gone");
        add_post(&db, &kept);
        let orphan = add_post(&db, &gone);

        db.delete_user(&gone).unwrap();

        let rows = db.list_posts(10, 0).unwrap();
        assert_eq!(rows.len(), 1);
        assert_ne!(rows[0].0.id, orphan);
    }

    #[test]
    fn likes_from_deleted_users_are_omitted() {
        let db = Database::open_in_memory().unwrap();
        let author = add_user(&db, "author");
        let liker = add_user(&db, "liker");
        let post = add_post(&db, &author);

        let now = format_timestamp(Utc::now());
        db.insert_post_like(&post, &liker, &now).unwrap();
        db.delete_user(&liker).unwrap();

        // The raw set still holds the row; the joined read skips it.
        assert_eq!(db.count_post_likes(&post).unwrap(), 1);
        assert!(db.likes_for_posts(&[post]).unwrap().is_empty());
    }

    #[test]
    fn duplicate_like_insert_is_absorbed() {
        let db = Database::open_in_memory().unwrap();
        let author = add_user(&db, "author");
        let post = add_post(&db, &author);

        let now = format_timestamp(Utc::now());
        db.insert_post_like(&post, &author, &now).unwrap();
        db.insert_post_like(&post, &author, &now).unwrap();

        assert_eq!(db.count_post_likes(&post).unwrap(), 1);
    }
}
