use crate::models::{canonicalize, ArticleId, ArticleRecord};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use rusqlite::{params, Connection, Row};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Document store the crawler writes articles into.
///
/// Only key lookups and an equality filter on `processed` are needed, so any
/// document or key-value store can sit behind this.
#[cfg_attr(test, mockall::automock)]
pub trait ArticleStore: Send + Sync {
    /// Every stored article ID
    fn ids(&self) -> Result<Vec<ArticleId>>;

    /// Insert a new record; fails if the ID already exists
    fn insert(&self, record: &ArticleRecord) -> Result<()>;

    /// Look up a record by ID
    fn get(&self, id: &ArticleId) -> Result<Option<ArticleRecord>>;

    /// All records whose `processed` flag equals the argument
    fn find_by_processed(&self, processed: bool) -> Result<Vec<ArticleRecord>>;

    /// Insert or overwrite a record
    fn upsert(&self, record: &ArticleRecord) -> Result<()>;
}

/// SQLite-backed article store
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

/// Column tuple as read from SQLite, before timestamp parsing
type RawArticle = (String, String, String, String, bool, String);

impl Database {
    /// Open (or create) the database file and make sure the schema exists
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        info!("Opening article database at {:?}", path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {:?}", parent))?;
            }
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path),
        };
        db.init_tables()?;
        Ok(db)
    }

    /// Throwaway database, used by tests and dry runs
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        };
        db.init_tables()?;
        Ok(db)
    }

    /// Location of the database file, `None` when in memory
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn init_tables(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS articles (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                content TEXT NOT NULL,
                processed INTEGER NOT NULL DEFAULT 0,
                stored_at TEXT NOT NULL
            )",
            [],
        )
        .context("Failed to create articles table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_articles_processed ON articles(processed)",
            [],
        )
        .context("Failed to create processed index")?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Database connection lock poisoned"))
    }

    fn read_row(row: &Row<'_>) -> rusqlite::Result<RawArticle> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    }

    fn to_record(raw: RawArticle) -> Result<ArticleRecord> {
        let (id, title, url, content, processed, stored_at) = raw;
        let stored_at = DateTime::parse_from_rfc3339(&stored_at)
            .with_context(|| format!("Bad stored_at timestamp for article {}", id))?
            .with_timezone(&Utc);

        Ok(ArticleRecord {
            id: ArticleId::from_raw(id),
            title,
            url: canonicalize(&url),
            content,
            processed,
            stored_at,
        })
    }
}

impl ArticleStore for Database {
    fn ids(&self) -> Result<Vec<ArticleId>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM articles")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .map(|id| id.map(ArticleId::from_raw))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn insert(&self, record: &ArticleRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO articles (id, title, url, content, processed, stored_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                record.id.as_str(),
                record.title,
                record.url.as_str(),
                record.content,
                record.processed,
                record.stored_at.to_rfc3339(),
            ],
        )
        .with_context(|| format!("Failed to insert article {}", record.id))?;
        Ok(())
    }

    fn get(&self, id: &ArticleId) -> Result<Option<ArticleRecord>> {
        let raw = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(
                "SELECT id, title, url, content, processed, stored_at
                 FROM articles WHERE id = ?",
            )?;
            let mut rows = stmt.query(params![id.as_str()])?;
            let raw = match rows.next()? {
                Some(row) => Some(Self::read_row(row)?),
                None => None,
            };
            raw
        };
        raw.map(Self::to_record).transpose()
    }

    fn find_by_processed(&self, processed: bool) -> Result<Vec<ArticleRecord>> {
        let raws = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(
                "SELECT id, title, url, content, processed, stored_at
                 FROM articles WHERE processed = ?
                 ORDER BY stored_at",
            )?;
            let rows = stmt
                .query_map(params![processed], Self::read_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        raws.into_iter().map(Self::to_record).collect()
    }

    fn upsert(&self, record: &ArticleRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO articles (id, title, url, content, processed, stored_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                record.id.as_str(),
                record.title,
                record.url.as_str(),
                record.content,
                record.processed,
                record.stored_at.to_rfc3339(),
            ],
        )
        .with_context(|| format!("Failed to upsert article {}", record.id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(url: &str) -> ArticleRecord {
        ArticleRecord::new("A title long enough", canonicalize(url), "body")
    }

    #[test]
    fn insert_and_get_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let article = record("https://x/2025/01/a");
        db.insert(&article).unwrap();

        let loaded = db.get(&article.id).unwrap().unwrap();
        assert_eq!(loaded.id, article.id);
        assert_eq!(loaded.url, article.url);
        assert!(!loaded.processed);
        assert_eq!(loaded.stored_at.timestamp(), article.stored_at.timestamp());
        assert!(db.get(&ArticleId::from_raw("missing")).unwrap().is_none());
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let article = record("https://x/2025/01/a");
        db.insert(&article).unwrap();
        assert!(db.insert(&article).is_err());
        assert_eq!(db.ids().unwrap().len(), 1);
    }

    #[test]
    fn filters_on_processed_flag() {
        let db = Database::open_in_memory().unwrap();
        let first = record("https://x/2025/01/a");
        let mut second = record("https://x/2025/01/b");
        db.insert(&first).unwrap();
        db.insert(&second).unwrap();

        second.processed = true;
        db.upsert(&second).unwrap();

        let unprocessed = db.find_by_processed(false).unwrap();
        let processed = db.find_by_processed(true).unwrap();
        assert_eq!(unprocessed.len(), 1);
        assert_eq!(unprocessed[0].id, first.id);
        assert_eq!(processed.len(), 1);
        assert_eq!(processed[0].id, second.id);
        assert_eq!(db.ids().unwrap().len(), 2);
    }

    #[test]
    fn survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("articles.db");
        let article = record("https://x/2025/01/a");

        {
            let db = Database::new(&path).unwrap();
            db.insert(&article).unwrap();
            assert_eq!(db.path(), Some(path.as_path()));
        }

        let reopened = Database::new(&path).unwrap();
        assert_eq!(reopened.ids().unwrap(), vec![article.id]);
    }
}
