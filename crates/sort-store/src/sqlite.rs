//! SQLite-backed repositories. Similarity search loads every vector and ranks in process.

use crate::memory::rank_similar;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sort_types::{
    EmbeddingRecord, EmbeddingRepository, FaceRecord, FaceRepository, RepositoryError,
    SimilarPhoto,
};
use std::path::Path;

/// Embeddings and faces in one SQLite database.
pub struct SqliteStore {
    conn: std::sync::Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`. `":memory:"` gives a private in-memory db.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let conn =
            rusqlite::Connection::open(path).map_err(|e| RepositoryError::Other(e.to_string()))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS embeddings (
                photo_id TEXT PRIMARY KEY,
                vector TEXT NOT NULL,
                model TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS faces (
                id TEXT PRIMARY KEY,
                photo_id TEXT NOT NULL,
                person TEXT,
                x REAL NOT NULL,
                y REAL NOT NULL,
                width REAL NOT NULL,
                height REAL NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_faces_photo ON faces(photo_id);
            "#,
        )
        .map_err(|e| RepositoryError::Other(e.to_string()))?;

        tracing::debug!("sqlite store ready");
        Ok(Self {
            conn: std::sync::Mutex::new(conn),
        })
    }

    fn with_conn<T, F>(&self, f: F) -> Result<T, RepositoryError>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::Other(format!("failed to acquire lock: {}", e)))?;
        f(&conn).map_err(|e| RepositoryError::Other(e.to_string()))
    }

    fn load_vectors(&self) -> Result<Vec<(String, Vec<f32>)>, RepositoryError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT photo_id, vector FROM embeddings")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (id, vector_json) = row?;
                out.push((id, decode_vector(&vector_json)?));
            }
            Ok(out)
        })
    }
}

fn decode_vector(json: &str) -> Result<Vec<f32>, rusqlite::Error> {
    serde_json::from_str(json).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn count_rows(conn: &rusqlite::Connection, table: &str) -> Result<u64, rusqlite::Error> {
    let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
        row.get(0)
    })?;
    Ok(n.max(0) as u64)
}

#[async_trait]
impl EmbeddingRepository for SqliteStore {
    async fn upsert(&self, record: EmbeddingRecord) -> Result<(), RepositoryError> {
        let vector_json = serde_json::to_string(&record.vector)
            .map_err(|e| RepositoryError::Other(e.to_string()))?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO embeddings (photo_id, vector, model, updated_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    record.photo_id,
                    vector_json,
                    record.model,
                    record.updated_at.to_rfc3339()
                ],
            )?;
            Ok(())
        })
    }

    async fn get(&self, photo_id: &str) -> Result<Option<EmbeddingRecord>, RepositoryError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT photo_id, vector, model, updated_at FROM embeddings WHERE photo_id = ?1",
            )?;
            let mut rows = stmt.query(rusqlite::params![photo_id])?;
            let Some(row) = rows.next()? else {
                return Ok(None);
            };
            let vector_json: String = row.get(1)?;
            let updated_at: String = row.get(3)?;
            Ok(Some(EmbeddingRecord {
                photo_id: row.get(0)?,
                vector: decode_vector(&vector_json)?,
                model: row.get(2)?,
                updated_at: parse_timestamp(&updated_at),
            }))
        })
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        self.with_conn(|conn| count_rows(conn, "embeddings"))
    }

    async fn similar(
        &self,
        photo_id: &str,
        top_k: usize,
    ) -> Result<Vec<SimilarPhoto>, RepositoryError> {
        let vectors = self.load_vectors()?;
        let Some((_, query)) = vectors.iter().find(|(id, _)| id == photo_id) else {
            return Ok(Vec::new());
        };
        Ok(rank_similar(
            query,
            photo_id,
            vectors.iter().map(|(id, v)| (id.as_str(), v.as_slice())),
            top_k,
        ))
    }
}

#[async_trait]
impl FaceRepository for SqliteStore {
    async fn add_faces(&self, faces: &[FaceRecord]) -> Result<(), RepositoryError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            for face in faces {
                tx.execute(
                    "INSERT OR REPLACE INTO faces (id, photo_id, person, x, y, width, height) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![
                        face.id,
                        face.photo_id,
                        face.person,
                        face.x as f64,
                        face.y as f64,
                        face.width as f64,
                        face.height as f64
                    ],
                )?;
            }
            tx.commit()
        })
    }

    async fn faces_for_photo(&self, photo_id: &str) -> Result<Vec<FaceRecord>, RepositoryError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, photo_id, person, x, y, width, height FROM faces WHERE photo_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(rusqlite::params![photo_id], |row| {
                Ok(FaceRecord {
                    id: row.get(0)?,
                    photo_id: row.get(1)?,
                    person: row.get(2)?,
                    x: row.get::<_, f64>(3)? as f32,
                    y: row.get::<_, f64>(4)? as f32,
                    width: row.get::<_, f64>(5)? as f32,
                    height: row.get::<_, f64>(6)? as f32,
                })
            })?;
            rows.collect()
        })
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        self.with_conn(|conn| count_rows(conn, "faces"))
    }
}
