//! Connection pool, pragmas and embedded migrations for the local store.

pub mod write_actor;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use diesel::Connection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::{info, warn};

use waypost_core::errors::{DatabaseError, Error, Result};

use crate::errors::StorageError;

pub use write_actor::WriteHandle;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub const DB_FILE_NAME: &str = "waypost.db";

const BUSY_TIMEOUT_MS: u32 = 5_000;
const POOL_MAX_SIZE: u32 = 8;

#[derive(Debug, Clone, Copy)]
struct ConnectionOptions {
    busy_timeout_ms: u32,
}

impl ConnectionOptions {
    // busy_timeout must precede the WAL switch, which needs a lock.
    fn pragmas(&self) -> String {
        format!(
            "PRAGMA busy_timeout = {}; \
             PRAGMA journal_mode = WAL; \
             PRAGMA foreign_keys = ON; \
             PRAGMA synchronous = NORMAL;",
            self.busy_timeout_ms
        )
    }
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(
        &self,
        conn: &mut SqliteConnection,
    ) -> std::result::Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&self.pragmas())
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Creates the data directory if needed and returns the database file path.
pub fn init(app_data_dir: &str) -> Result<String> {
    std::fs::create_dir_all(app_data_dir).map_err(StorageError::from)?;
    let db_path = Path::new(app_data_dir).join(DB_FILE_NAME);
    Ok(db_path.to_string_lossy().to_string())
}

pub fn create_pool(db_path: &str) -> Result<Arc<DbPool>> {
    let manager = ConnectionManager::<SqliteConnection>::new(db_path);
    let pool = Pool::builder()
        .max_size(POOL_MAX_SIZE)
        .connection_timeout(Duration::from_secs(30))
        .connection_customizer(Box::new(ConnectionOptions {
            busy_timeout_ms: BUSY_TIMEOUT_MS,
        }))
        .build(manager)
        .map_err(|e| Error::Database(DatabaseError::PoolCreationFailed(e.to_string())))?;
    Ok(Arc::new(pool))
}

pub fn get_connection(pool: &DbPool) -> Result<DbConnection> {
    Ok(pool.get().map_err(StorageError::from)?)
}

/// Applies every embedded migration not yet recorded in the database.
///
/// Another connection holding a lock makes this wait for the busy timeout,
/// then fail with [`DatabaseError::UpgradeBlocked`].
pub fn run_migrations(db_path: &str) -> Result<()> {
    run_migrations_with_busy_timeout(db_path, BUSY_TIMEOUT_MS)
}

fn run_migrations_with_busy_timeout(db_path: &str, busy_timeout_ms: u32) -> Result<()> {
    let mut conn = SqliteConnection::establish(db_path).map_err(StorageError::from)?;
    let options = ConnectionOptions { busy_timeout_ms };
    conn.batch_execute(&options.pragmas()).map_err(|e| {
        let err = StorageError::from(e).into_migration_error();
        warn!("[Store] Could not prepare database for migration: {}", err);
        err
    })?;

    let applied = conn.run_pending_migrations(MIGRATIONS).map_err(|e| {
        let err = StorageError::Migration(e.to_string()).into_migration_error();
        warn!("[Store] Migration did not complete: {}", err);
        err
    })?;

    if applied.is_empty() {
        info!("[Store] Schema up to date");
    } else {
        for version in &applied {
            info!("[Store] Applied migration {}", version);
        }
    }
    Ok(())
}

/// Latest migration version compiled into this build.
pub fn latest_schema_version() -> Option<String> {
    use diesel::migration::MigrationSource;
    use diesel::sqlite::Sqlite;

    MigrationSource::<Sqlite>::migrations(&MIGRATIONS)
        .ok()?
        .iter()
        .map(|migration| migration.name().version().to_string())
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn migrations_are_idempotent() {
        let dir = tempdir().expect("tempdir");
        let db_path = init(&dir.path().to_string_lossy()).expect("init");
        run_migrations(&db_path).expect("first run");
        run_migrations(&db_path).expect("second run is a no-op");

        let mut conn = SqliteConnection::establish(&db_path).expect("conn");
        let pending = conn.has_pending_migration(MIGRATIONS).expect("check");
        assert!(!pending);
    }

    #[test]
    fn locked_database_blocks_the_upgrade_until_the_busy_timeout() {
        let dir = tempdir().expect("tempdir");
        let db_path = init(&dir.path().to_string_lossy()).expect("init");
        let mut holder = SqliteConnection::establish(&db_path).expect("holder");
        holder.batch_execute("BEGIN EXCLUSIVE;").expect("lock");

        let started = std::time::Instant::now();
        let err = run_migrations_with_busy_timeout(&db_path, 300).expect_err("blocked");
        assert!(started.elapsed() >= Duration::from_millis(250));
        assert!(matches!(
            err,
            Error::Database(DatabaseError::UpgradeBlocked(_))
        ));

        holder.batch_execute("ROLLBACK;").expect("unlock");
        run_migrations_with_busy_timeout(&db_path, 300).expect("runs once unlocked");
    }

    #[test]
    fn schema_version_comes_from_the_newest_migration() {
        let version = latest_schema_version().expect("at least one migration");
        assert!(version.starts_with("2026"));
    }
}
