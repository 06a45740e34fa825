use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Creates or upgrades the path record store. Idempotent.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // Configured paths
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS paths (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            location TEXT NOT NULL UNIQUE,
            description TEXT,
            file_count INTEGER NOT NULL DEFAULT 0,
            total_size INTEGER NOT NULL DEFAULT 0,
            last_scanned INTEGER,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Cached listing from the last scan
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS path_files (
            path_id TEXT NOT NULL,
            rel_path TEXT NOT NULL,
            size INTEGER NOT NULL,
            modified INTEGER NOT NULL,
            PRIMARY KEY (path_id, rel_path),
            FOREIGN KEY (path_id) REFERENCES paths(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Columns added after the first release; older stores gain them in place.
    add_column_if_missing(pool, "paths", "updated_at", "INTEGER NOT NULL DEFAULT 0").await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_path_files_path_id ON path_files(path_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn add_column_if_missing(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    decl: &str,
) -> Result<()> {
    let exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM pragma_table_info(?) WHERE name = ?",
    )
    .bind(table)
    .bind(column)
    .fetch_one(pool)
    .await?;

    if !exists {
        sqlx::query(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl))
            .execute(pool)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut cfg = Config::minimal();
        cfg.db.path = tmp.path().join("store.sqlite");

        run_migrations(&cfg).await.unwrap();
        run_migrations(&cfg).await.unwrap();

        let pool = db::connect(&cfg).await.unwrap();
        let has_updated: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM pragma_table_info('paths') WHERE name = 'updated_at'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(has_updated);
    }
}
