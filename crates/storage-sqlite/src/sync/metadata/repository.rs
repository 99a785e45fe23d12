use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use waypost_core::errors::Result;
use waypost_core::sync::MetadataRepositoryTrait;

use super::model::AppMetadataDB;
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::app_metadata;

/// Upserts one key on the caller's connection.
pub fn write_metadata(conn: &mut SqliteConnection, key: &str, value: &str) -> Result<()> {
    let row = AppMetadataDB {
        key: key.to_string(),
        value: value.to_string(),
        updated_at: Utc::now().naive_utc(),
    };
    diesel::insert_into(app_metadata::table)
        .values(&row)
        .on_conflict(app_metadata::key)
        .do_update()
        .set((
            app_metadata::value.eq(&row.value),
            app_metadata::updated_at.eq(row.updated_at),
        ))
        .execute(conn)
        .map_err(StorageError::from)?;
    Ok(())
}

pub struct MetadataRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl MetadataRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }

    pub fn get_entry(&self, key: &str) -> Result<Option<AppMetadataDB>> {
        let mut conn = get_connection(&self.pool)?;
        Ok(app_metadata::table
            .find(key)
            .first::<AppMetadataDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?)
    }
}

#[async_trait]
impl MetadataRepositoryTrait for MetadataRepository {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get_entry(key)?.map(|row| row.value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.writer
            .exec(move |conn| write_metadata(conn, &key, &value))
            .await
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.writer
            .exec(move |conn| {
                let affected = diesel::delete(app_metadata::table.find(key))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(affected > 0)
            })
            .await
    }
}
