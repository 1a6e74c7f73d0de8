use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE COLLATE NOCASE,
            password    TEXT NOT NULL,
            avatar_url  TEXT NOT NULL DEFAULT '',
            bio         TEXT NOT NULL DEFAULT '',
            is_admin    INTEGER NOT NULL DEFAULT 0,
            is_online   INTEGER NOT NULL DEFAULT 0,
            last_seen   TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS posts (
            id          TEXT PRIMARY KEY,
            author_id   TEXT NOT NULL,
            content     TEXT NOT NULL,
            images      TEXT NOT NULL DEFAULT '[]',
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_posts_created
            ON posts(created_at);

        -- Like set: one row per (post, user). The UNIQUE constraint is the
        -- last line of defense for set semantics; like counts are always
        -- COUNT(*) over this table, never a stored counter.
        CREATE TABLE IF NOT EXISTS post_likes (
            post_id     TEXT NOT NULL,
            user_id     TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(post_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_post_likes_post
            ON post_likes(post_id);

        CREATE TABLE IF NOT EXISTS replies (
            id          TEXT PRIMARY KEY,
            post_id     TEXT NOT NULL,
            author_id   TEXT NOT NULL,
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_replies_post
            ON replies(post_id, created_at);

        CREATE TABLE IF NOT EXISTS hotspots (
            id          TEXT PRIMARY KEY,
            author_id   TEXT NOT NULL,
            title       TEXT NOT NULL,
            description TEXT NOT NULL,
            latitude    REAL NOT NULL,
            longitude   REAL NOT NULL,
            created_at  TEXT NOT NULL
        );

        -- Joined set, same shape as post_likes.
        CREATE TABLE IF NOT EXISTS hotspot_members (
            hotspot_id  TEXT NOT NULL,
            user_id     TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(hotspot_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_hotspot_members_hotspot
            ON hotspot_members(hotspot_id);

        -- recipient_id NULL = public broadcast message.
        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            sender_id       TEXT NOT NULL,
            recipient_id    TEXT,
            content         TEXT NOT NULL,
            is_read         INTEGER NOT NULL DEFAULT 0,
            read_at         TEXT,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_sender
            ON messages(sender_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_messages_recipient
            ON messages(recipient_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
