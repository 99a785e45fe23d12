//! Injectable handle over the local database: one pool for reads, one writer
//! actor for writes.

use std::sync::Arc;

use chrono::Utc;
use diesel::prelude::*;
use log::info;

use waypost_core::errors::{DatabaseError, Error, Result};
use waypost_core::sync::metadata_keys;

use crate::addresses::AddressRepository;
use crate::db::{
    create_pool, get_connection, init, latest_schema_version, run_migrations,
    write_actor::spawn_writer, DbPool, WriteHandle,
};
use crate::errors::StorageError;
use crate::schema::app_metadata;
use crate::sync::{write_metadata, MetadataRepository, SyncQueueRepository};
use crate::utils::quote_identifier;

/// Tables reachable through the generic [`LocalStore::count`] and
/// [`LocalStore::clear`] operations.
pub const STORE_TABLES: [&str; 3] = ["addresses", "sync_queue", "app_metadata"];

fn validate_store_table(table: &str) -> Result<()> {
    if STORE_TABLES.contains(&table) {
        return Ok(());
    }
    Err(Error::Database(DatabaseError::Internal(format!(
        "Unsupported store table '{}'",
        table
    ))))
}

#[derive(diesel::QueryableByName)]
struct CountRow {
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    count: i64,
}

#[derive(Clone)]
pub struct LocalStore {
    pool: Arc<DbPool>,
    writer: WriteHandle,
    db_path: String,
}

impl LocalStore {
    /// Opens (creating if needed) `waypost.db` under `app_data_dir`, applies
    /// pending migrations and records the initialization flags.
    pub async fn open(app_data_dir: &str) -> Result<Self> {
        let db_path = init(app_data_dir)?;
        run_migrations(&db_path)?;
        let pool = create_pool(&db_path)?;
        let writer = spawn_writer(pool.as_ref().clone());

        let schema_version = latest_schema_version();
        let first_open = writer
            .exec(move |conn| {
                if let Some(version) = schema_version {
                    write_metadata(conn, metadata_keys::SCHEMA_VERSION, &version)?;
                }
                let initialized: i64 = app_metadata::table
                    .filter(app_metadata::key.eq(metadata_keys::STORE_INITIALIZED_AT))
                    .count()
                    .get_result(conn)
                    .map_err(StorageError::from)?;
                if initialized > 0 {
                    return Ok(false);
                }
                write_metadata(
                    conn,
                    metadata_keys::STORE_INITIALIZED_AT,
                    &Utc::now().to_rfc3339(),
                )?;
                Ok(true)
            })
            .await?;

        if first_open {
            info!("[Store] Initialized new store at {}", db_path);
        } else {
            info!("[Store] Opened store at {}", db_path);
        }
        Ok(Self {
            pool,
            writer,
            db_path,
        })
    }

    pub fn pool(&self) -> &Arc<DbPool> {
        &self.pool
    }

    pub fn writer(&self) -> &WriteHandle {
        &self.writer
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    pub fn address_repository(&self) -> Arc<AddressRepository> {
        Arc::new(AddressRepository::new(
            self.pool.clone(),
            self.writer.clone(),
        ))
    }

    pub fn queue_repository(&self) -> Arc<SyncQueueRepository> {
        Arc::new(SyncQueueRepository::new(
            self.pool.clone(),
            self.writer.clone(),
        ))
    }

    pub fn metadata_repository(&self) -> Arc<MetadataRepository> {
        Arc::new(MetadataRepository::new(
            self.pool.clone(),
            self.writer.clone(),
        ))
    }

    pub fn count(&self, table: &str) -> Result<i64> {
        validate_store_table(table)?;
        let mut conn = get_connection(&self.pool)?;
        let row = diesel::sql_query(format!(
            "SELECT COUNT(*) AS count FROM {}",
            quote_identifier(table)
        ))
        .get_result::<CountRow>(&mut conn)
        .map_err(StorageError::from)?;
        Ok(row.count)
    }

    /// Deletes every row of `table` in one transaction.
    pub async fn clear(&self, table: &str) -> Result<usize> {
        validate_store_table(table)?;
        let sql = format!("DELETE FROM {}", quote_identifier(table));
        let table = table.to_string();
        let removed = self
            .writer
            .exec(move |conn| {
                Ok(diesel::sql_query(sql)
                    .execute(conn)
                    .map_err(StorageError::from)?)
            })
            .await?;
        info!("[Store] Cleared {} rows from {}", removed, table);
        Ok(removed)
    }

    /// Releases this handle. The writer thread exits once every clone of the
    /// store and every repository built from it has been dropped.
    pub fn close(self) {
        info!("[Store] Closing store at {}", self.db_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use waypost_core::addresses::{AddressRepositoryTrait, NewAddress};
    use waypost_core::sync::MetadataRepositoryTrait;

    #[tokio::test]
    async fn reopening_keeps_the_first_initialization_stamp() {
        let dir = tempdir().expect("tempdir");
        let app_data = dir.path().to_string_lossy().to_string();

        let store = LocalStore::open(&app_data).await.expect("open");
        let metadata = store.metadata_repository();
        let first_stamp = metadata
            .get(metadata_keys::STORE_INITIALIZED_AT)
            .expect("get")
            .expect("stamped");
        assert!(metadata
            .get(metadata_keys::SCHEMA_VERSION)
            .expect("get")
            .is_some());
        drop(metadata);
        store.close();

        let reopened = LocalStore::open(&app_data).await.expect("reopen");
        let second_stamp = reopened
            .metadata_repository()
            .get(metadata_keys::STORE_INITIALIZED_AT)
            .expect("get");
        assert_eq!(second_stamp.as_deref(), Some(first_stamp.as_str()));
    }

    #[tokio::test]
    async fn count_and_clear_work_on_known_tables_only() {
        let dir = tempdir().expect("tempdir");
        let store = LocalStore::open(&dir.path().to_string_lossy())
            .await
            .expect("open");
        store
            .address_repository()
            .create(NewAddress {
                label: "Depot".to_string(),
                street: "Rua 1".to_string(),
                city: "Braga".to_string(),
                ..NewAddress::default()
            })
            .await
            .expect("create");

        assert_eq!(store.count("addresses").expect("count"), 1);
        assert_eq!(store.count("sync_queue").expect("count"), 1);
        assert_eq!(store.clear("sync_queue").await.expect("clear"), 1);
        assert_eq!(store.count("sync_queue").expect("count"), 0);

        assert!(store.count("sqlite_master").is_err());
        assert!(store.clear("addresses; DROP TABLE addresses").await.is_err());
    }
}
