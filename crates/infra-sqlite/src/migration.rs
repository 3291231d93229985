// Schema migrations, tracked in `schema_version`

use sqlx::SqlitePool;
use tracing::{debug, info};
use workgate_core::error::{AppError, Result};

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "requests table",
    sql: include_str!("../migrations/001_initial_schema.sql"),
}];

fn db_err(e: sqlx::Error) -> AppError {
    AppError::Database(format!("Migration failed: {}", e))
}

/// Bring the schema up to the latest version
///
/// Each migration runs in its own transaction together with its
/// `schema_version` row, so a crash never leaves a half-applied version.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY NOT NULL,
            applied_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await
    .map_err(db_err)?;

    let current: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
        .fetch_one(pool)
        .await
        .map_err(db_err)?;
    debug!(current, latest = MIGRATIONS.len(), "Schema version");

    let pending = MIGRATIONS.iter().filter(|m| m.version > current);
    let mut applied = 0;
    for migration in pending {
        info!(version = migration.version, name = migration.name, "Applying migration");
        let mut tx = pool.begin().await.map_err(db_err)?;
        sqlx::raw_sql(migration.sql)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query(
            "INSERT INTO schema_version (version, applied_at)
             VALUES (?, CAST(strftime('%s', 'now') AS INTEGER) * 1000)",
        )
        .bind(migration.version)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        applied += 1;
    }

    if applied > 0 {
        info!(applied, "Schema up to date");
    }
    Ok(())
}
