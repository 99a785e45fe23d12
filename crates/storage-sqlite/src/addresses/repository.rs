use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::debug;
use uuid::Uuid;

use waypost_core::addresses::{
    Address, AddressListOptions, AddressRepositoryTrait, AddressUpdate, NewAddress, SyncStatus,
};
use waypost_core::errors::{Error, Result};
use waypost_core::sync::{NewQueueOperation, QueueOperationType, QueueStatus, SyncEntity};

use super::model::AddressDB;
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::addresses;
use crate::schema::sync_queue;
use crate::sync::write_queue_operation;
use crate::utils::enum_to_db;

fn load_address(conn: &mut SqliteConnection, address_id: &str) -> Result<Address> {
    addresses::table
        .find(address_id)
        .first::<AddressDB>(conn)
        .optional()
        .map_err(StorageError::from)?
        .ok_or_else(|| Error::not_found("address", address_id))?
        .try_into()
}

fn save_address(conn: &mut SqliteConnection, address: &Address) -> Result<()> {
    let row = AddressDB::try_from(address)?;
    diesel::update(addresses::table.find(&row.id))
        .set(&row)
        .execute(conn)
        .map_err(StorageError::from)?;
    Ok(())
}

fn stage_operation(
    conn: &mut SqliteConnection,
    operation_type: QueueOperationType,
    address: &Address,
) -> Result<()> {
    write_queue_operation(
        conn,
        NewQueueOperation::new(
            operation_type,
            SyncEntity::Address,
            address.id.clone(),
            serde_json::to_value(address)?,
        ),
    )?;
    Ok(())
}

// Loads, mutates, saves and stages the outbox row on one connection.
fn mutate_address(
    conn: &mut SqliteConnection,
    address_id: &str,
    operation_type: QueueOperationType,
    mutate: impl FnOnce(&mut Address, chrono::NaiveDateTime),
) -> Result<Address> {
    let mut address = load_address(conn, address_id)?;
    let now = Utc::now().naive_utc();
    mutate(&mut address, now);
    address.touch_local(now);
    save_address(conn, &address)?;
    stage_operation(conn, operation_type, &address)?;
    Ok(address)
}

fn rows_to_addresses(rows: Vec<AddressDB>) -> Result<Vec<Address>> {
    rows.into_iter().map(Address::try_from).collect()
}

pub struct AddressRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl AddressRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl AddressRepositoryTrait for AddressRepository {
    fn get_by_id(&self, address_id: &str) -> Result<Address> {
        let mut conn = get_connection(&self.pool)?;
        load_address(&mut conn, address_id)
    }

    fn load_all(&self) -> Result<Vec<Address>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = addresses::table
            .load::<AddressDB>(&mut conn)
            .map_err(StorageError::from)?;
        rows_to_addresses(rows)
    }

    fn list(&self, options: &AddressListOptions) -> Result<Vec<Address>> {
        let mut conn = get_connection(&self.pool)?;
        let mut query = addresses::table.into_boxed();
        if !options.include_inactive {
            query = query.filter(addresses::is_active.eq(true));
        }
        if let Some(status) = options.sync_status {
            query = query.filter(addresses::sync_status.eq(enum_to_db(&status)?));
        }
        let rows = query
            .load::<AddressDB>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(options.apply(rows_to_addresses(rows)?))
    }

    fn find_by_sync_status(&self, status: SyncStatus) -> Result<Vec<Address>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = addresses::table
            .filter(addresses::sync_status.eq(enum_to_db(&status)?))
            .load::<AddressDB>(&mut conn)
            .map_err(StorageError::from)?;
        rows_to_addresses(rows)
    }

    fn find_by_active(&self, is_active: bool) -> Result<Vec<Address>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = addresses::table
            .filter(addresses::is_active.eq(is_active))
            .load::<AddressDB>(&mut conn)
            .map_err(StorageError::from)?;
        rows_to_addresses(rows)
    }

    async fn create(&self, new_address: NewAddress) -> Result<Address> {
        self.writer
            .exec(move |conn| {
                let now = Utc::now().naive_utc();
                let address = Address {
                    id: new_address
                        .id
                        .unwrap_or_else(|| Uuid::now_v7().to_string()),
                    label: new_address.label,
                    street: new_address.street,
                    city: new_address.city,
                    region: new_address.region,
                    postal_code: new_address.postal_code,
                    country: new_address.country,
                    contact_name: new_address.contact_name,
                    phone: new_address.phone,
                    notes: new_address.notes,
                    location: new_address.location,
                    is_active: true,
                    sync_status: SyncStatus::Pending,
                    sync_error: None,
                    created_at: now,
                    updated_at: now,
                    local_updated_at: Some(now),
                    deactivated_at: None,
                    last_synced_at: None,
                };

                diesel::insert_into(addresses::table)
                    .values(AddressDB::try_from(&address)?)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                stage_operation(conn, QueueOperationType::Create, &address)?;
                Ok(address)
            })
            .await
    }

    async fn update(&self, address_id: &str, patch: AddressUpdate) -> Result<Address> {
        let address_id = address_id.to_string();
        self.writer
            .exec(move |conn| {
                mutate_address(conn, &address_id, QueueOperationType::Update, |address, now| {
                    address.apply_update(patch, now)
                })
            })
            .await
    }

    async fn deactivate(&self, address_id: &str) -> Result<Address> {
        let address_id = address_id.to_string();
        self.writer
            .exec(move |conn| {
                mutate_address(
                    conn,
                    &address_id,
                    QueueOperationType::Deactivate,
                    |address, now| {
                        address.is_active = false;
                        address.deactivated_at = Some(now);
                    },
                )
            })
            .await
    }

    async fn activate(&self, address_id: &str) -> Result<Address> {
        let address_id = address_id.to_string();
        self.writer
            .exec(move |conn| {
                mutate_address(
                    conn,
                    &address_id,
                    QueueOperationType::Activate,
                    |address, _now| {
                        address.is_active = true;
                        address.deactivated_at = None;
                    },
                )
            })
            .await
    }

    async fn permanently_delete(&self, address_id: &str) -> Result<()> {
        let address_id = address_id.to_string();
        self.writer
            .exec(move |conn| {
                let exists: i64 = addresses::table
                    .filter(addresses::id.eq(&address_id))
                    .select(count_star())
                    .first(conn)
                    .map_err(StorageError::from)?;
                if exists == 0 {
                    return Err(Error::not_found("address", &address_id));
                }

                // The DELETE must be staged before the row goes away.
                write_queue_operation(
                    conn,
                    NewQueueOperation::new(
                        QueueOperationType::Delete,
                        SyncEntity::Address,
                        address_id.clone(),
                        serde_json::json!({ "id": address_id }),
                    ),
                )?;
                diesel::delete(addresses::table.find(&address_id))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn mark_synced(&self, address_id: &str) -> Result<bool> {
        let address_id = address_id.to_string();
        self.writer
            .exec(move |conn| {
                // Delivered operations are deleted, so any row left is unsettled.
                let queued: i64 = sync_queue::table
                    .filter(sync_queue::entity_id.eq(&address_id))
                    .select(count_star())
                    .first(conn)
                    .map_err(StorageError::from)?;
                if queued > 0 {
                    return Ok(false);
                }

                let affected = diesel::update(addresses::table.find(&address_id))
                    .set((
                        addresses::sync_status.eq(enum_to_db(&SyncStatus::Synced)?),
                        addresses::sync_error.eq::<Option<String>>(None),
                        addresses::last_synced_at.eq(Some(Utc::now().naive_utc())),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                if affected == 0 {
                    return Err(Error::not_found("address", &address_id));
                }
                Ok(true)
            })
            .await
    }

    async fn mark_sync_error(&self, address_id: &str, message: &str) -> Result<()> {
        let address_id = address_id.to_string();
        let message = message.to_string();
        self.writer
            .exec(move |conn| {
                let affected = diesel::update(addresses::table.find(&address_id))
                    .set((
                        addresses::sync_status.eq(enum_to_db(&SyncStatus::Error)?),
                        addresses::sync_error.eq(Some(message)),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                if affected == 0 {
                    return Err(Error::not_found("address", &address_id));
                }
                Ok(())
            })
            .await
    }

    async fn apply_remote_snapshot(&self, address: Address) -> Result<bool> {
        self.writer
            .exec(move |conn| {
                let unsettled_statuses = [
                    enum_to_db(&QueueStatus::Pending)?,
                    enum_to_db(&QueueStatus::InProgress)?,
                    enum_to_db(&QueueStatus::Failed)?,
                ];
                let unsettled: i64 = sync_queue::table
                    .filter(sync_queue::entity_id.eq(&address.id))
                    .filter(sync_queue::status.eq_any(unsettled_statuses))
                    .select(count_star())
                    .first(conn)
                    .map_err(StorageError::from)?;
                if unsettled > 0 {
                    return Ok(false);
                }

                let snapshot = Address {
                    sync_status: SyncStatus::Synced,
                    sync_error: None,
                    local_updated_at: None,
                    last_synced_at: Some(Utc::now().naive_utc()),
                    ..address
                };
                let row = AddressDB::try_from(&snapshot)?;
                diesel::insert_into(addresses::table)
                    .values(&row)
                    .on_conflict(addresses::id)
                    .do_update()
                    .set(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                debug!("[Sync] Applied remote snapshot for address {}", snapshot.id);
                Ok(true)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};
    use waypost_core::addresses::AddressService;
    use waypost_core::sync::SyncQueueRepositoryTrait;
    use waypost_core::utils::geo::GeoPoint;

    use crate::db::{create_pool, init, run_migrations, write_actor::spawn_writer};
    use crate::sync::SyncQueueRepository;

    struct Fixture {
        repo: Arc<AddressRepository>,
        queue: SyncQueueRepository,
        _dir: TempDir,
    }

    fn setup() -> Fixture {
        let dir = tempdir().expect("tempdir");
        let db_path = init(&dir.path().to_string_lossy()).expect("init db");
        run_migrations(&db_path).expect("migrate db");
        let pool = create_pool(&db_path).expect("create pool");
        let writer = spawn_writer(pool.as_ref().clone());
        Fixture {
            repo: Arc::new(AddressRepository::new(pool.clone(), writer.clone())),
            queue: SyncQueueRepository::new(pool, writer),
            _dir: dir,
        }
    }

    fn new_address(label: &str, location: Option<GeoPoint>) -> NewAddress {
        NewAddress {
            label: label.to_string(),
            street: "Avenida da Liberdade 10".to_string(),
            city: "Lisboa".to_string(),
            location,
            ..NewAddress::default()
        }
    }

    fn staged_types(queue: &SyncQueueRepository, entity_id: &str) -> Vec<QueueOperationType> {
        queue
            .by_entity(entity_id)
            .expect("by entity")
            .into_iter()
            .map(|op| op.operation_type)
            .collect()
    }

    #[tokio::test]
    async fn every_mutation_stages_exactly_one_outbox_row() {
        let fx = setup();
        let created = fx
            .repo
            .create(new_address("Office", None))
            .await
            .expect("create");
        assert_eq!(staged_types(&fx.queue, &created.id).len(), 1);

        fx.repo
            .update(
                &created.id,
                AddressUpdate {
                    label: Some("Head office".to_string()),
                    ..AddressUpdate::default()
                },
            )
            .await
            .expect("update");
        fx.repo.deactivate(&created.id).await.expect("deactivate");
        fx.repo.activate(&created.id).await.expect("activate");
        fx.repo
            .permanently_delete(&created.id)
            .await
            .expect("delete");

        assert_eq!(
            staged_types(&fx.queue, &created.id),
            vec![
                QueueOperationType::Create,
                QueueOperationType::Update,
                QueueOperationType::Deactivate,
                QueueOperationType::Activate,
                QueueOperationType::Delete,
            ]
        );
        assert!(fx.repo.get_by_id(&created.id).is_err());
    }

    #[tokio::test]
    async fn deactivate_then_activate_round_trips_visibility() {
        let fx = setup();
        let created = fx
            .repo
            .create(new_address("Kiosk", None))
            .await
            .expect("create");

        let deactivated = fx.repo.deactivate(&created.id).await.expect("deactivate");
        assert!(!deactivated.is_active);
        assert!(deactivated.deactivated_at.is_some());
        assert!(fx
            .repo
            .list(&AddressListOptions::active())
            .expect("list")
            .is_empty());
        assert_eq!(fx.repo.find_by_active(false).expect("inactive").len(), 1);

        let activated = fx.repo.activate(&created.id).await.expect("activate");
        assert!(activated.is_active);
        assert!(activated.deactivated_at.is_none());
        assert_eq!(activated.sync_status, SyncStatus::Pending);
        assert_eq!(
            fx.repo.list(&AddressListOptions::active()).expect("list").len(),
            1
        );
    }

    #[tokio::test]
    async fn address_without_gps_is_listed_and_counted() {
        let fx = setup();
        fx.repo
            .create(new_address("No GPS", None))
            .await
            .expect("create");
        fx.repo
            .create(new_address("With GPS", Some(GeoPoint::new(38.72, -9.14))))
            .await
            .expect("create");

        let service = AddressService::new(fx.repo.clone());
        let listed = service
            .list_addresses(&AddressListOptions::active().with_search("no gps"))
            .expect("list");
        assert_eq!(listed.len(), 1);
        assert!(listed[0].location.is_none());

        let stats = service.aggregate_stats().expect("stats");
        assert_eq!(stats.total, 2);
        assert_eq!(stats.with_gps, 1);
        assert_eq!(stats.without_gps, 1);
        assert_eq!(stats.pending_sync, 2);
    }

    #[tokio::test]
    async fn update_clears_nullable_fields_and_replaces_location() {
        let fx = setup();
        let created = fx
            .repo
            .create(NewAddress {
                phone: Some("+351 21 000 0000".to_string()),
                ..new_address("Shop", Some(GeoPoint::new(38.7, -9.1)))
            })
            .await
            .expect("create");

        fx.repo
            .update(
                &created.id,
                AddressUpdate {
                    phone: Some(None),
                    location: Some(None),
                    ..AddressUpdate::default()
                },
            )
            .await
            .expect("update");

        let stored = fx.repo.get_by_id(&created.id).expect("get");
        assert_eq!(stored.phone, None);
        assert_eq!(stored.location, None);
        assert_eq!(stored.label, "Shop");
    }

    #[tokio::test]
    async fn missing_records_are_not_found_and_stage_nothing() {
        let fx = setup();
        assert!(fx.repo.get_by_id("nope").expect_err("get").is_not_found());
        assert!(fx
            .repo
            .update("nope", AddressUpdate::default())
            .await
            .expect_err("update")
            .is_not_found());
        assert!(fx
            .repo
            .permanently_delete("nope")
            .await
            .expect_err("delete")
            .is_not_found());
        assert!(fx
            .repo
            .mark_synced("nope")
            .await
            .expect_err("mark synced")
            .is_not_found());
        assert_eq!(fx.queue.stats().expect("stats").total, 0);
    }

    #[tokio::test]
    async fn duplicate_create_rolls_back_without_outbox_row() {
        let fx = setup();
        let first = NewAddress {
            id: Some("fixed-id".to_string()),
            ..new_address("First", None)
        };
        fx.repo.create(first.clone()).await.expect("create");
        assert!(fx.repo.create(first).await.is_err());
        assert_eq!(staged_types(&fx.queue, "fixed-id").len(), 1);
    }

    #[tokio::test]
    async fn remote_snapshot_is_skipped_while_local_work_is_unsettled() {
        let fx = setup();
        let created = fx
            .repo
            .create(new_address("Local", None))
            .await
            .expect("create");

        let mut remote = created.clone();
        remote.label = "Remote".to_string();
        assert!(!fx
            .repo
            .apply_remote_snapshot(remote.clone())
            .await
            .expect("apply"));
        assert_eq!(fx.repo.get_by_id(&created.id).expect("get").label, "Local");

        for op in fx.queue.by_entity(&created.id).expect("ops") {
            fx.queue.mark_completed(op.id).await.expect("complete");
        }
        assert!(fx.repo.apply_remote_snapshot(remote).await.expect("apply"));
        let stored = fx.repo.get_by_id(&created.id).expect("get");
        assert_eq!(stored.label, "Remote");
        assert_eq!(stored.sync_status, SyncStatus::Synced);
        assert!(stored.last_synced_at.is_some());
        assert_eq!(fx.queue.stats().expect("stats").total, 0);
    }

    #[tokio::test]
    async fn remote_snapshot_is_skipped_while_an_operation_is_failed() {
        let fx = setup();
        let created = fx
            .repo
            .create(new_address("Rejected", None))
            .await
            .expect("create");
        let op = fx.queue.list_pending().expect("pending").remove(0);
        fx.queue
            .mark_failed_permanently(op.id, "HTTP 422")
            .await
            .expect("fail");

        let mut remote = created.clone();
        remote.label = "Remote".to_string();
        assert!(!fx
            .repo
            .apply_remote_snapshot(remote.clone())
            .await
            .expect("apply"));
        assert_eq!(fx.repo.get_by_id(&created.id).expect("get").label, "Rejected");

        fx.queue.retry(op.id).await.expect("retry");
        fx.queue.mark_completed(op.id).await.expect("complete");
        assert!(fx.repo.apply_remote_snapshot(remote).await.expect("apply"));
    }

    #[tokio::test]
    async fn sync_stamps_are_set_without_touching_the_outbox() {
        let fx = setup();
        let created = fx
            .repo
            .create(new_address("Stamp", None))
            .await
            .expect("create");

        fx.repo
            .mark_sync_error(&created.id, "HTTP 503")
            .await
            .expect("error stamp");
        let errored = fx.repo.get_by_id(&created.id).expect("get");
        assert_eq!(errored.sync_status, SyncStatus::Error);
        assert_eq!(errored.sync_error.as_deref(), Some("HTTP 503"));
        assert_eq!(
            fx.repo
                .find_by_sync_status(SyncStatus::Error)
                .expect("by status")
                .len(),
            1
        );

        for op in fx.queue.by_entity(&created.id).expect("ops") {
            fx.queue.mark_completed(op.id).await.expect("complete");
        }
        assert!(fx.repo.mark_synced(&created.id).await.expect("synced"));
        let synced = fx.repo.get_by_id(&created.id).expect("get");
        assert_eq!(synced.sync_status, SyncStatus::Synced);
        assert!(synced.sync_error.is_none());
        assert!(synced.last_synced_at.is_some());
        assert!(staged_types(&fx.queue, &created.id).is_empty());
    }

    #[tokio::test]
    async fn synced_stamp_is_refused_while_the_outbox_holds_work() {
        let fx = setup();
        let created = fx
            .repo
            .create(new_address("Busy", None))
            .await
            .expect("create");
        let create_op = fx.queue.list_pending().expect("pending").remove(0);
        fx.queue.mark_completed(create_op.id).await.expect("complete");

        // A local edit lands after delivery but before the stamp.
        fx.repo
            .update(
                &created.id,
                AddressUpdate {
                    label: Some("Edited".to_string()),
                    ..AddressUpdate::default()
                },
            )
            .await
            .expect("update");

        assert!(!fx.repo.mark_synced(&created.id).await.expect("mark synced"));
        let stored = fx.repo.get_by_id(&created.id).expect("get");
        assert_eq!(stored.sync_status, SyncStatus::Pending);
        assert!(stored.last_synced_at.is_none());
        assert_eq!(
            staged_types(&fx.queue, &created.id),
            vec![QueueOperationType::Update]
        );
    }
}
