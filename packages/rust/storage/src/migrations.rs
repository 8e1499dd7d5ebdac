//! SQL migration definitions for the PaperScout chunk store.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: chunks, FTS5 index",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per stored text chunk
CREATE TABLE IF NOT EXISTS chunks (
    id            TEXT PRIMARY KEY,
    paper_id      TEXT NOT NULL,
    chunk_index   INTEGER NOT NULL,
    title         TEXT,
    content       TEXT NOT NULL,
    metadata_json TEXT NOT NULL,
    stored_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunks_paper_id ON chunks(paper_id);

-- Full-text search over chunk text and paper title
CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    title,
    content,
    content=chunks,
    content_rowid=rowid
);

-- Triggers to keep FTS in sync with the chunks table
CREATE TRIGGER IF NOT EXISTS chunks_fts_insert AFTER INSERT ON chunks BEGIN
    INSERT INTO chunks_fts(rowid, title, content)
    VALUES (new.rowid, new.title, new.content);
END;

CREATE TRIGGER IF NOT EXISTS chunks_fts_delete AFTER DELETE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, title, content)
    VALUES ('delete', old.rowid, old.title, old.content);
END;

CREATE TRIGGER IF NOT EXISTS chunks_fts_update AFTER UPDATE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, title, content)
    VALUES ('delete', old.rowid, old.title, old.content);
    INSERT INTO chunks_fts(rowid, title, content)
    VALUES (new.rowid, new.title, new.content);
END;

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
