//! libSQL-backed chunk store (offline mode).
//!
//! [`ChunkStore`] is the contract the acquisition bridge and the quality
//! fallback talk to. [`Storage`] implements it over a local libSQL database
//! with an FTS5 index standing in for vector similarity.
//!
//! **Access rules:**
//! - discovery runs with `store=true`: read-write via [`Storage::open`]
//! - `search` and `assess` without acquisition: read-only via [`Storage::open_readonly`]

mod migrations;

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database, params};
use serde::Serialize;
use tracing::{debug, instrument};

use paperscout_shared::{PaperScoutError, Result};

/// Per-chunk metadata as handed to the store.
pub type ChunkMetadata = serde_json::Map<String, serde_json::Value>;

/// Metadata keys every chunk must carry.
pub const REQUIRED_METADATA_KEYS: [&str; 7] = [
    "title",
    "authors",
    "year",
    "doi",
    "source",
    "paperId",
    "chunkIndex",
];

// ---------------------------------------------------------------------------
// Store contract
// ---------------------------------------------------------------------------

/// A chunk read back from the store.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredChunk {
    /// `"{paperId}:{chunkIndex}"`.
    pub id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
    /// Retrieval certainty in `[0,1)`; set only for similarity-search hits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certainty: Option<f64>,
}

impl StoredChunk {
    pub fn paper_id(&self) -> Option<&str> {
        self.metadata.get("paperId").and_then(|v| v.as_str())
    }
}

/// The external store chunks are written to and retrieved from.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Store chunks with their metadata. `chunks` and `metadata` are parallel.
    async fn add_chunks(&self, chunks: &[String], metadata: &[ChunkMetadata]) -> Result<bool>;

    /// Chunks most relevant to `query`, best first.
    async fn similarity_search(&self, query: &str, limit: usize) -> Result<Vec<StoredChunk>>;

    /// Fetch one chunk by id.
    async fn get_by_id(&self, id: &str) -> Result<Option<StoredChunk>>;
}

// ---------------------------------------------------------------------------
// libSQL storage
// ---------------------------------------------------------------------------

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

fn db_err(e: libsql::Error) -> PaperScoutError {
    PaperScoutError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PaperScoutError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PaperScoutError::Storage(format!(
                "no chunk store at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    PaperScoutError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0,
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(PaperScoutError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    /// Total number of stored chunks.
    pub async fn count_chunks(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM chunks", params![])
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(db_err)?.max(0) as u64),
            None => Ok(0),
        }
    }

    /// All chunks of one paper, in chunk order.
    pub async fn chunks_for_paper(&self, paper_id: &str) -> Result<Vec<StoredChunk>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, content, metadata_json FROM chunks
                 WHERE paper_id = ?1 ORDER BY chunk_index",
                params![paper_id],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_chunk(&row, None)?);
        }
        Ok(results)
    }
}

#[async_trait]
impl ChunkStore for Storage {
    #[instrument(skip_all, fields(chunks = chunks.len()))]
    async fn add_chunks(&self, chunks: &[String], metadata: &[ChunkMetadata]) -> Result<bool> {
        self.check_writable()?;
        if chunks.len() != metadata.len() {
            return Err(PaperScoutError::validation(format!(
                "{} chunks but {} metadata entries",
                chunks.len(),
                metadata.len()
            )));
        }
        if chunks.is_empty() {
            return Ok(true);
        }

        let paper_ids = metadata
            .iter()
            .map(|meta| {
                meta.get("paperId")
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| PaperScoutError::validation("chunk metadata lacks paperId"))
            })
            .collect::<Result<Vec<&str>>>()?;

        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction().await.map_err(db_err)?;

        // A re-store replaces every earlier chunk of the paper, not just the
        // indices it rewrites.
        let mut cleared = HashSet::new();
        for paper_id in paper_ids.iter().copied().filter(|id| cleared.insert(*id)) {
            tx.execute("DELETE FROM chunks WHERE paper_id = ?1", params![paper_id])
                .await
                .map_err(db_err)?;
        }

        for ((content, meta), paper_id) in chunks.iter().zip(metadata).zip(paper_ids) {
            let chunk_index = meta
                .get("chunkIndex")
                .and_then(|v| v.as_i64())
                .ok_or_else(|| PaperScoutError::validation("chunk metadata lacks chunkIndex"))?;
            let title = meta.get("title").and_then(|v| v.as_str()).unwrap_or("");
            let id = format!("{paper_id}:{chunk_index}");
            let metadata_json = serde_json::to_string(meta)
                .map_err(|e| PaperScoutError::Storage(format!("metadata encode: {e}")))?;

            tx.execute(
                "INSERT INTO chunks (id, paper_id, chunk_index, title, content, metadata_json, stored_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    content = excluded.content,
                    metadata_json = excluded.metadata_json,
                    stored_at = excluded.stored_at",
                params![
                    id.as_str(),
                    paper_id,
                    chunk_index,
                    title,
                    content.as_str(),
                    metadata_json.as_str(),
                    now.as_str()
                ],
            )
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        debug!(count = chunks.len(), "chunks stored");
        Ok(true)
    }

    #[instrument(skip_all, fields(query = %query, limit))]
    async fn similarity_search(&self, query: &str, limit: usize) -> Result<Vec<StoredChunk>> {
        let Some(match_expr) = fts_match_expression(query) else {
            return Ok(Vec::new());
        };

        let mut rows = self
            .conn
            .query(
                "SELECT c.id, c.content, c.metadata_json, bm25(chunks_fts) AS score
                 FROM chunks_fts
                 JOIN chunks c ON c.rowid = chunks_fts.rowid
                 WHERE chunks_fts MATCH ?1
                 ORDER BY score
                 LIMIT ?2",
                params![match_expr.as_str(), limit as i64],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let score: f64 = row.get(3).unwrap_or(0.0);
            results.push(row_to_chunk(&row, Some(rank_to_certainty(score)))?);
        }
        debug!(hits = results.len(), "similarity search complete");
        Ok(results)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<StoredChunk>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, content, metadata_json FROM chunks WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_chunk(&row, None)?)),
            None => Ok(None),
        }
    }
}

/// Map an FTS5 bm25 rank (`<= 0`, lower is better) onto `[0,1)`.
pub fn rank_to_certainty(rank: f64) -> f64 {
    if !rank.is_finite() || rank >= 0.0 {
        return 0.0;
    }
    -rank / (1.0 - rank)
}

/// Turn free text into an FTS5 expression: every word quoted, OR-ed together.
fn fts_match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.to_lowercase()))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

/// Convert a `(id, content, metadata_json, ..)` row to a [`StoredChunk`].
fn row_to_chunk(row: &libsql::Row, certainty: Option<f64>) -> Result<StoredChunk> {
    let metadata_json: String = row.get(2).map_err(db_err)?;
    let metadata: ChunkMetadata = serde_json::from_str(&metadata_json)
        .map_err(|e| PaperScoutError::Storage(format!("invalid metadata: {e}")))?;

    Ok(StoredChunk {
        id: row.get::<String>(0).map_err(db_err)?,
        content: row.get::<String>(1).map_err(db_err)?,
        metadata,
        certainty,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn temp_db_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("ps_test_{}.db", Uuid::now_v7()))
    }

    async fn test_storage() -> Storage {
        Storage::open(&temp_db_path()).await.expect("open storage")
    }

    fn meta(paper_id: &str, index: i64, title: &str) -> ChunkMetadata {
        let value = json!({
            "title": title,
            "authors": "A. Author",
            "year": 2023,
            "doi": paper_id,
            "source": "openalex",
            "paperId": paper_id,
            "chunkIndex": index,
        });
        match value {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = temp_db_path();
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn add_and_get_chunks() {
        let storage = test_storage().await;
        let chunks = vec!["first part".to_string(), "second part".to_string()];
        let metadata = vec![meta("10.1/x", 0, "Paper X"), meta("10.1/x", 1, "Paper X")];

        assert!(storage.add_chunks(&chunks, &metadata).await.expect("add"));
        assert_eq!(storage.count_chunks().await.unwrap(), 2);

        let chunk = storage.get_by_id("10.1/x:1").await.unwrap().expect("found");
        assert_eq!(chunk.content, "second part");
        assert_eq!(chunk.paper_id(), Some("10.1/x"));
        assert_eq!(chunk.metadata["chunkIndex"], 1);
        assert!(chunk.certainty.is_none());

        assert!(storage.get_by_id("10.1/x:9").await.unwrap().is_none());

        let all = storage.chunks_for_paper("10.1/x").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].content, "first part");
    }

    #[tokio::test]
    async fn re_adding_a_chunk_replaces_it() {
        let storage = test_storage().await;
        let metadata = vec![meta("10.1/x", 0, "Paper X")];
        storage
            .add_chunks(&["old text".to_string()], &metadata)
            .await
            .unwrap();
        storage
            .add_chunks(&["new text".to_string()], &metadata)
            .await
            .unwrap();

        assert_eq!(storage.count_chunks().await.unwrap(), 1);
        let chunk = storage.get_by_id("10.1/x:0").await.unwrap().unwrap();
        assert_eq!(chunk.content, "new text");
    }

    #[tokio::test]
    async fn re_storing_a_paper_drops_its_older_chunks() {
        let storage = test_storage().await;
        let full_text: Vec<String> = (0..3).map(|i| format!("full text {i}")).collect();
        let metadata: Vec<_> = (0..3).map(|i| meta("p1", i, "Paper One")).collect();
        storage.add_chunks(&full_text, &metadata).await.unwrap();
        storage
            .add_chunks(&["other paper".to_string()], &[meta("p2", 0, "Paper Two")])
            .await
            .unwrap();

        storage
            .add_chunks(&["abstract only".to_string()], &[meta("p1", 0, "Paper One")])
            .await
            .unwrap();

        let chunks = storage.chunks_for_paper("p1").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "abstract only");
        assert!(storage.get_by_id("p1:2").await.unwrap().is_none());
        assert_eq!(storage.chunks_for_paper("p2").await.unwrap().len(), 1);
        assert!(storage.similarity_search("full", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mismatched_lengths_are_rejected() {
        let storage = test_storage().await;
        let err = storage
            .add_chunks(&["a".to_string(), "b".to_string()], &[meta("10.1/x", 0, "X")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("2 chunks but 1 metadata"));
        assert_eq!(storage.count_chunks().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn metadata_without_paper_id_is_rejected() {
        let storage = test_storage().await;
        let mut m = meta("10.1/x", 0, "X");
        m.remove("paperId");
        assert!(storage.add_chunks(&["a".to_string()], &[m]).await.is_err());
    }

    #[tokio::test]
    async fn fts_similarity_search() {
        let storage = test_storage().await;
        let chunks = vec![
            "Decentralized autonomous organizations and on-chain voting.".to_string(),
            "Protein folding with deep learning.".to_string(),
            "Blockchain governance models compared across networks.".to_string(),
        ];
        let metadata = vec![
            meta("10.1/a", 0, "DAO Voting"),
            meta("10.1/b", 0, "Protein Folding"),
            meta("10.1/c", 0, "Blockchain Governance"),
        ];
        storage.add_chunks(&chunks, &metadata).await.unwrap();

        let hits = storage
            .similarity_search("blockchain governance", 10)
            .await
            .expect("search");
        assert!(!hits.is_empty());
        assert_eq!(hits[0].paper_id(), Some("10.1/c"));
        let certainty = hits[0].certainty.expect("certainty");
        assert!(certainty > 0.0 && certainty < 1.0);
        assert!(hits.iter().all(|h| h.paper_id() != Some("10.1/b")));
    }

    #[tokio::test]
    async fn search_with_only_punctuation_returns_nothing() {
        let storage = test_storage().await;
        let hits = storage.similarity_search("\"*:-", 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = temp_db_path();
        let rw = Storage::open(&tmp).await.unwrap();
        rw.add_chunks(&["text".to_string()], &[meta("10.1/x", 0, "X")])
            .await
            .unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert_eq!(ro.count_chunks().await.unwrap(), 1);
        let result = ro
            .add_chunks(&["more".to_string()], &[meta("10.1/y", 0, "Y")])
            .await;
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }

    #[tokio::test]
    async fn readonly_requires_existing_file() {
        assert!(Storage::open_readonly(&temp_db_path()).await.is_err());
    }

    #[test]
    fn rank_mapping() {
        assert_eq!(rank_to_certainty(0.0), 0.0);
        assert_eq!(rank_to_certainty(-1.0), 0.5);
        assert!((rank_to_certainty(-9.0) - 0.9).abs() < 1e-9);
        assert!(rank_to_certainty(-2.0) < rank_to_certainty(-3.0));
        assert_eq!(rank_to_certainty(f64::NAN), 0.0);
    }

    #[test]
    fn match_expression_quotes_terms() {
        assert_eq!(
            fts_match_expression("Blockchain: governance!").as_deref(),
            Some("\"blockchain\" OR \"governance\"")
        );
        assert!(fts_match_expression("  ").is_none());
    }
}
