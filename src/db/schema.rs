use std::collections::BTreeMap;

use rusqlite::{params, Connection};

/// One additive schema step. `upgrade` runs after `sql` inside the same
/// transaction and carries data over to the new shape.
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
    pub upgrade: Option<fn(&Connection) -> rusqlite::Result<()>>,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "feeds ordered by rank, feed items with composite indexes",
        sql: r#"
-- feeds table
CREATE TABLE IF NOT EXISTS feeds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    parent_id INTEGER NOT NULL DEFAULT 0,
    kind TEXT NOT NULL DEFAULT 'feed',
    source TEXT NOT NULL DEFAULT '',
    title TEXT NOT NULL,
    description TEXT,
    link TEXT,
    image_url TEXT,
    last_update_time INTEGER NOT NULL DEFAULT 0,
    rank TEXT
);

CREATE INDEX IF NOT EXISTS idx_feeds_title ON feeds(title);
CREATE INDEX IF NOT EXISTS idx_feeds_kind ON feeds(kind);
CREATE INDEX IF NOT EXISTS idx_feeds_parent_rank ON feeds(parent_id, rank, id);

-- feed_items table
CREATE TABLE IF NOT EXISTS feed_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_id INTEGER NOT NULL,
    title TEXT NOT NULL,
    link TEXT NOT NULL,
    description TEXT,
    short_description TEXT,
    image TEXT,
    pub_date INTEGER NOT NULL,
    is_read INTEGER NOT NULL DEFAULT 0,
    is_favorite INTEGER NOT NULL DEFAULT 0,
    read_time INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_feed_items_feed_pub_date_id ON feed_items(feed_id, pub_date, id);
CREATE INDEX IF NOT EXISTS idx_feed_items_pub_date_id ON feed_items(pub_date, id);
CREATE INDEX IF NOT EXISTS idx_feed_items_read_state ON feed_items(is_read, is_favorite, read_time);
CREATE INDEX IF NOT EXISTS idx_feed_items_feed_read_state ON feed_items(feed_id, is_read, is_favorite, read_time);
CREATE INDEX IF NOT EXISTS idx_feed_items_feed_link ON feed_items(feed_id, link);
"#,
        upgrade: None,
    },
    Migration {
        version: 2,
        description: "sibling order as per-parent linked lists",
        sql: r#"
ALTER TABLE feeds ADD COLUMN prev_id INTEGER NOT NULL DEFAULT 0;
ALTER TABLE feeds ADD COLUMN next_id INTEGER NOT NULL DEFAULT 0;

CREATE INDEX IF NOT EXISTS idx_feeds_chain ON feeds(parent_id, prev_id, next_id, id);
"#,
        upgrade: Some(link_siblings_by_rank),
    },
    Migration {
        version: 3,
        description: "per-feed display config",
        sql: r#"
ALTER TABLE feeds ADD COLUMN config TEXT;
"#,
        upgrade: None,
    },
];

pub const LATEST_SCHEMA_VERSION: u32 = 3;

/// Threads every parent's children into a chain following their old rank.
fn link_siblings_by_rank(conn: &Connection) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare("SELECT id, parent_id FROM feeds ORDER BY parent_id, rank, id")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut by_parent: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
    for (id, parent_id) in rows {
        by_parent.entry(parent_id).or_default().push(id);
    }

    let mut update = conn.prepare("UPDATE feeds SET prev_id = ?1, next_id = ?2 WHERE id = ?3")?;
    for siblings in by_parent.values() {
        for (i, id) in siblings.iter().enumerate() {
            let prev_id = if i > 0 { siblings[i - 1] } else { 0 };
            let next_id = siblings.get(i + 1).copied().unwrap_or(0);
            update.execute(params![prev_id, next_id, id])?;
        }
    }
    tracing::debug!("linked {} sibling lists from rank order", by_parent.len());
    Ok(())
}

pub fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )
}

pub fn schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row("PRAGMA user_version", [], |row| row.get::<_, i64>(0))
        .map(|v| v as u32)
}

pub fn apply_migrations(conn: &mut Connection) -> rusqlite::Result<u32> {
    migrate_to(conn, LATEST_SCHEMA_VERSION)
}

/// Applies every pending migration up to `target` in one transaction.
/// Databases written by a newer build are left untouched.
pub fn migrate_to(conn: &mut Connection, target: u32) -> rusqlite::Result<u32> {
    let current = schema_version(conn)?;
    if current >= target {
        if current > LATEST_SCHEMA_VERSION {
            tracing::warn!(
                "database schema v{} is newer than this build (v{})",
                current,
                LATEST_SCHEMA_VERSION
            );
        }
        return Ok(current);
    }

    let tx = conn.transaction()?;
    let mut applied = current;
    for migration in MIGRATIONS {
        if migration.version <= current || migration.version > target {
            continue;
        }
        tx.execute_batch(migration.sql)?;
        if let Some(upgrade) = migration.upgrade {
            upgrade(&tx)?;
        }
        tx.pragma_update(None, "user_version", migration.version as i64)?;
        tracing::info!("applied schema v{}: {}", migration.version, migration.description);
        applied = migration.version;
    }
    tx.commit()?;
    Ok(applied)
}
