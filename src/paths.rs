//! Configured path index.
//!
//! A [`PathIndex`] owns the user-declared filesystem roots the assistant may
//! read from. Records and their cached file listings live in SQLite; every
//! mutation runs in a single transaction behind a process-wide write mutex, so
//! concurrent add / update / remove / scan calls are serialised and a failed
//! write leaves the previously committed record set untouched. Reads go
//! straight to the pool and may run concurrently.
//!
//! Removing a record never touches the files underneath it.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{Config, IndexConfig};
use crate::db;
use crate::extract::{self, decode_text, detect_kind};
use crate::migrate;
use crate::models::{ConfiguredPath, FileKind, IndexedFile, PathValidation, SearchHit, UploadedFile};
use crate::walk::{walk_location, WalkedFile};

#[derive(Debug, Error)]
pub enum PathError {
    #[error("path does not exist: {0}")]
    NotFound(String),
    #[error("path is not readable: {0}")]
    NotReadable(String),
    #[error("path is already configured as '{name}': {location}")]
    Duplicate { name: String, location: String },
    #[error("no configured path with id: {0}")]
    UnknownId(String),
    #[error("invalid path name: {0}")]
    InvalidName(String),
    #[error("path store error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("path scan failed: {0}")]
    Scan(String),
}

impl PathError {
    /// True for errors caused by the caller's input rather than the store.
    pub fn is_validation(&self) -> bool {
        !matches!(self, PathError::Database(_) | PathError::Scan(_))
    }
}

/// A file pulled from a configured path for prompt context.
#[derive(Debug, Clone)]
pub struct PathFileContent {
    pub path_name: String,
    pub rel_path: String,
    pub file: UploadedFile,
}

pub struct PathIndex {
    pool: SqlitePool,
    config: IndexConfig,
    write_lock: Mutex<()>,
}

impl PathIndex {
    /// Opens the record store named in `[db]`, creating tables if needed.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        Ok(Self::new(pool, config.index.clone()))
    }

    pub fn new(pool: SqlitePool, config: IndexConfig) -> Self {
        Self {
            pool,
            config,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Checks a location without touching the store. Counting a folder walks
    /// it, so the check runs on the blocking pool.
    pub async fn validate(&self, location: &str) -> Result<PathValidation, PathError> {
        let location = location.to_string();
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || validate_location(&location, &config))
            .await
            .map_err(|e| PathError::Scan(e.to_string()))
    }

    pub async fn add(
        &self,
        name: &str,
        location: &str,
        description: Option<&str>,
    ) -> Result<ConfiguredPath, PathError> {
        let name = checked_name(name)?;
        let canonical = self.checked_location(location).await?;

        let _guard = self.write_lock.lock().await;
        self.ensure_unique(&canonical, None).await?;

        let files = self.walk(&canonical).await?;
        let now = Utc::now().timestamp();
        let record = ConfiguredPath {
            id: Uuid::new_v4().to_string(),
            name,
            location: canonical,
            description: description.map(str::to_string).filter(|d| !d.trim().is_empty()),
            file_count: files.len() as i64,
            total_size: files.iter().map(|f| f.size as i64).sum(),
            last_scanned: Some(now),
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO paths (id, name, location, description, file_count, total_size, last_scanned, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.location)
        .bind(&record.description)
        .bind(record.file_count)
        .bind(record.total_size)
        .bind(record.last_scanned)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?;
        insert_files(&mut tx, &record.id, &files).await?;
        tx.commit().await?;

        info!(id = %record.id, location = %record.location, files = record.file_count, "added configured path");
        Ok(record)
    }

    pub async fn list(&self) -> Result<Vec<ConfiguredPath>, PathError> {
        let rows = sqlx::query("SELECT * FROM paths ORDER BY created_at, name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_path).collect())
    }

    pub async fn get(&self, id: &str) -> Result<ConfiguredPath, PathError> {
        let row = sqlx::query("SELECT * FROM paths WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref()
            .map(row_to_path)
            .ok_or_else(|| PathError::UnknownId(id.to_string()))
    }

    /// Cached file listing from the most recent scan.
    pub async fn files(&self, id: &str) -> Result<Vec<IndexedFile>, PathError> {
        let rows = sqlx::query(
            "SELECT path_id, rel_path, size, modified FROM path_files WHERE path_id = ? ORDER BY rel_path",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| IndexedFile {
                path_id: row.get("path_id"),
                rel_path: row.get("rel_path"),
                size: row.get("size"),
                modified: row.get("modified"),
            })
            .collect())
    }

    /// Re-walks a path and replaces its cached metadata.
    pub async fn scan(&self, id: &str) -> Result<ConfiguredPath, PathError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.get(id).await?;

        let validation = self.validate(&record.location).await?;
        if !validation.exists {
            return Err(PathError::NotFound(record.location));
        }
        if !validation.readable {
            return Err(PathError::NotReadable(record.location));
        }

        let files = self.walk(&record.location).await?;
        let now = Utc::now().timestamp();
        record.file_count = files.len() as i64;
        record.total_size = files.iter().map(|f| f.size as i64).sum();
        record.last_scanned = Some(now);
        record.updated_at = now;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM path_files WHERE path_id = ?")
            .bind(&record.id)
            .execute(&mut *tx)
            .await?;
        insert_files(&mut tx, &record.id, &files).await?;
        sqlx::query(
            "UPDATE paths SET file_count = ?, total_size = ?, last_scanned = ?, updated_at = ? WHERE id = ?",
        )
        .bind(record.file_count)
        .bind(record.total_size)
        .bind(record.last_scanned)
        .bind(record.updated_at)
        .bind(&record.id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(id = %record.id, files = record.file_count, bytes = record.total_size, "scanned configured path");
        Ok(record)
    }

    /// Replaces name, location, and description. A changed location is
    /// validated like [`add`](Self::add) and triggers a rescan.
    pub async fn update(
        &self,
        id: &str,
        name: &str,
        location: &str,
        description: Option<&str>,
    ) -> Result<ConfiguredPath, PathError> {
        let name = checked_name(name)?;
        let canonical = self.checked_location(location).await?;

        let _guard = self.write_lock.lock().await;
        let mut record = self.get(id).await?;
        self.ensure_unique(&canonical, Some(id)).await?;

        let relocated = record.location != canonical;
        let files = if relocated {
            Some(self.walk(&canonical).await?)
        } else {
            None
        };

        let now = Utc::now().timestamp();
        record.name = name;
        record.location = canonical;
        record.description = description.map(str::to_string).filter(|d| !d.trim().is_empty());
        record.updated_at = now;

        let mut tx = self.pool.begin().await?;
        if let Some(files) = &files {
            record.file_count = files.len() as i64;
            record.total_size = files.iter().map(|f| f.size as i64).sum();
            record.last_scanned = Some(now);
            sqlx::query("DELETE FROM path_files WHERE path_id = ?")
                .bind(&record.id)
                .execute(&mut *tx)
                .await?;
            insert_files(&mut tx, &record.id, files).await?;
        }
        sqlx::query(
            r#"
            UPDATE paths SET name = ?, location = ?, description = ?, file_count = ?,
                total_size = ?, last_scanned = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&record.name)
        .bind(&record.location)
        .bind(&record.description)
        .bind(record.file_count)
        .bind(record.total_size)
        .bind(record.last_scanned)
        .bind(record.updated_at)
        .bind(&record.id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(id = %record.id, relocated, "updated configured path");
        Ok(record)
    }

    /// Deletes the record and its cached listing. Files on disk are untouched.
    pub async fn remove(&self, id: &str) -> Result<ConfiguredPath, PathError> {
        let _guard = self.write_lock.lock().await;
        let record = self.get(id).await?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM path_files WHERE path_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM paths WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(id, location = %record.location, "removed configured path");
        Ok(record)
    }

    /// Case-insensitive search over file names and, when enabled, the
    /// contents of text-like files in every configured path.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>, PathError> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let limit = self.config.max_search_results;
        let mut hits = Vec::new();
        for path in self.list().await? {
            for file in self.files(&path.id).await? {
                if hits.len() >= limit {
                    return Ok(hits);
                }
                if file.rel_path.to_lowercase().contains(&needle) {
                    hits.push(SearchHit {
                        path_id: path.id.clone(),
                        path_name: path.name.clone(),
                        file: file.rel_path.clone(),
                        line: None,
                        context: file.rel_path.clone(),
                    });
                }

                if !self.config.search_content || file.size as u64 > self.config.max_search_bytes {
                    continue;
                }
                let abs = resolve_file(&path.location, &file.rel_path);
                if !is_text_like(&abs) {
                    continue;
                }
                let Ok(bytes) = tokio::fs::read(&abs).await else {
                    debug!(file = %abs.display(), "indexed file no longer readable");
                    continue;
                };
                for (line, context) in content_matches(&decode_text(&bytes), &needle) {
                    if hits.len() >= limit {
                        return Ok(hits);
                    }
                    hits.push(SearchHit {
                        path_id: path.id.clone(),
                        path_name: path.name.clone(),
                        file: file.rel_path.clone(),
                        line: Some(line),
                        context,
                    });
                }
            }
        }
        Ok(hits)
    }

    /// Picks the indexed files that best match the question's terms and
    /// extracts them. Names score double; contents of small text-like files
    /// score once per distinct term.
    pub async fn relevant_files(
        &self,
        question: &str,
        limit: usize,
    ) -> Result<Vec<PathFileContent>, PathError> {
        let terms = query_terms(question);
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, i64, ConfiguredPath, IndexedFile)> = Vec::new();
        for path in self.list().await? {
            for file in self.files(&path.id).await? {
                let name = file.rel_path.to_lowercase();
                let mut score = terms.iter().filter(|t| name.contains(t.as_str())).count() * 2;

                let abs = resolve_file(&path.location, &file.rel_path);
                if self.config.search_content
                    && file.size as u64 <= self.config.max_search_bytes
                    && is_text_like(&abs)
                {
                    if let Ok(bytes) = tokio::fs::read(&abs).await {
                        let body = decode_text(&bytes).to_lowercase();
                        score += terms.iter().filter(|t| body.contains(t.as_str())).count();
                    }
                }

                if score > 0 {
                    scored.push((score, file.modified, path.clone(), file));
                }
            }
        }

        scored.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| b.1.cmp(&a.1))
                .then_with(|| a.3.rel_path.cmp(&b.3.rel_path))
        });

        let mut out = Vec::new();
        for (_, _, path, file) in scored.into_iter().take(limit) {
            let abs = resolve_file(&path.location, &file.rel_path);
            match extract::extract_file(&abs) {
                Ok(upload) => out.push(PathFileContent {
                    path_name: path.name.clone(),
                    rel_path: file.rel_path.clone(),
                    file: upload,
                }),
                Err(e) => debug!(file = %abs.display(), error = %e, "skipping unreadable indexed file"),
            }
        }
        Ok(out)
    }

    async fn checked_location(&self, location: &str) -> Result<String, PathError> {
        let validation = self.validate(location).await?;
        if !validation.exists {
            return Err(PathError::NotFound(location.trim().to_string()));
        }
        if !validation.readable {
            return Err(PathError::NotReadable(location.trim().to_string()));
        }
        Ok(canonical_string(Path::new(location.trim())))
    }

    async fn ensure_unique(&self, canonical: &str, except_id: Option<&str>) -> Result<(), PathError> {
        let existing = sqlx::query("SELECT * FROM paths WHERE location = ?")
            .bind(canonical)
            .fetch_optional(&self.pool)
            .await?;
        match existing.as_ref().map(row_to_path) {
            Some(p) if Some(p.id.as_str()) != except_id => Err(PathError::Duplicate {
                name: p.name,
                location: p.location,
            }),
            _ => Ok(()),
        }
    }

    async fn walk(&self, location: &str) -> Result<Vec<WalkedFile>, PathError> {
        let root = PathBuf::from(location);
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || walk_location(&root, &config))
            .await
            .map_err(|e| PathError::Scan(e.to_string()))?
            .map_err(|e| PathError::Scan(e.to_string()))
    }
}

async fn insert_files(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    path_id: &str,
    files: &[WalkedFile],
) -> Result<(), PathError> {
    for file in files {
        sqlx::query("INSERT INTO path_files (path_id, rel_path, size, modified) VALUES (?, ?, ?, ?)")
            .bind(path_id)
            .bind(&file.rel_path)
            .bind(file.size as i64)
            .bind(file.modified)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

fn row_to_path(row: &SqliteRow) -> ConfiguredPath {
    ConfiguredPath {
        id: row.get("id"),
        name: row.get("name"),
        location: row.get("location"),
        description: row.get("description"),
        file_count: row.get("file_count"),
        total_size: row.get("total_size"),
        last_scanned: row.get("last_scanned"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn checked_name(name: &str) -> Result<String, PathError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(PathError::InvalidName("name must not be empty".to_string()));
    }
    if name.chars().count() > 120 {
        return Err(PathError::InvalidName(
            "name must be at most 120 characters".to_string(),
        ));
    }
    Ok(name.to_string())
}

fn canonical_string(path: &Path) -> String {
    path.canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .to_string()
}

/// A configured location may be a single file, in which case its listing
/// holds just that file under its own name.
fn resolve_file(location: &str, rel_path: &str) -> PathBuf {
    let root = Path::new(location);
    if root.is_file() {
        root.to_path_buf()
    } else {
        root.join(rel_path)
    }
}

fn is_text_like(path: &Path) -> bool {
    let has_text_ext = path
        .extension()
        .map(|e| {
            matches!(
                e.to_string_lossy().to_ascii_lowercase().as_str(),
                "csv" | "txt" | "md" | "json" | "log" | "tsv"
            )
        })
        .unwrap_or(false);
    has_text_ext && matches!(detect_kind(&path.to_string_lossy(), &[]), FileKind::Text | FileKind::Csv)
}

/// Pure existence / type / readability check used before add and update.
pub fn validate_location(location: &str, config: &IndexConfig) -> PathValidation {
    let location = location.trim();
    let mut v = PathValidation {
        location: location.to_string(),
        exists: false,
        readable: false,
        is_dir: false,
        is_file: false,
        file_count: None,
        message: String::new(),
    };

    if location.is_empty() {
        v.message = "location must not be empty".to_string();
        return v;
    }

    let path = Path::new(location);
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            v.exists = true;
            v.message = format!("{} exists but is not accessible", location);
            return v;
        }
        Err(_) => {
            v.message = format!("{} does not exist", location);
            return v;
        }
    };

    v.exists = true;
    v.is_dir = metadata.is_dir();
    v.is_file = metadata.is_file();

    if v.is_dir {
        v.readable = std::fs::read_dir(path).is_ok();
        if v.readable {
            let count = walk_location(path, config).map(|f| f.len() as u64).unwrap_or(0);
            v.file_count = Some(count);
            v.message = format!("folder with {} files", count);
        } else {
            v.message = format!("{} is a folder that cannot be read", location);
        }
    } else {
        v.readable = std::fs::File::open(path).is_ok();
        if v.readable {
            v.file_count = Some(1);
            v.message = "single file".to_string();
        } else {
            v.message = format!("{} is a file that cannot be read", location);
        }
    }
    v
}

/// 1-based line numbers and a three-line window for every line containing
/// `needle` (already lower-cased).
fn content_matches(text: &str, needle: &str) -> Vec<(usize, String)> {
    let lines: Vec<&str> = text.lines().collect();
    let mut out = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if line.to_lowercase().contains(needle) {
            let start = i.saturating_sub(1);
            let end = (i + 2).min(lines.len());
            out.push((i + 1, lines[start..end].join("\n")));
        }
    }
    out
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "what", "which", "with", "from", "this", "that", "are", "was", "how",
    "show", "give", "tell", "about", "our", "all", "any", "have", "has", "does", "did", "into",
    "per", "can", "you", "please", "data", "file", "files",
];

/// Lower-cased question words of three or more characters, minus stopwords.
pub fn query_terms(question: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    question
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .map(str::to_lowercase)
        .filter(|t| t.chars().count() >= 3 && !STOPWORDS.contains(&t.as_str()))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}
