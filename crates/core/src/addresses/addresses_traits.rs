use async_trait::async_trait;

use super::addresses_model::{Address, AddressListOptions, AddressUpdate, NewAddress, SyncStatus};
use crate::errors::Result;

/// Persistence contract for address records.
///
/// Every mutating method must stage the matching outbox operation in the same
/// transaction as the record write. `mark_synced`, `mark_sync_error` and
/// `apply_remote_snapshot` belong to the sync engine and never touch the
/// outbox.
#[async_trait]
pub trait AddressRepositoryTrait: Send + Sync {
    fn get_by_id(&self, address_id: &str) -> Result<Address>;
    fn load_all(&self) -> Result<Vec<Address>>;
    fn list(&self, options: &AddressListOptions) -> Result<Vec<Address>>;
    fn find_by_sync_status(&self, status: SyncStatus) -> Result<Vec<Address>>;
    fn find_by_active(&self, is_active: bool) -> Result<Vec<Address>>;

    async fn create(&self, new_address: NewAddress) -> Result<Address>;
    async fn update(&self, address_id: &str, patch: AddressUpdate) -> Result<Address>;
    async fn deactivate(&self, address_id: &str) -> Result<Address>;
    async fn activate(&self, address_id: &str) -> Result<Address>;
    async fn permanently_delete(&self, address_id: &str) -> Result<()>;

    /// Stamps the record `synced` unless the outbox still holds an operation
    /// for it, in which case nothing is written and `false` is returned. The
    /// check and the stamp share one transaction.
    async fn mark_synced(&self, address_id: &str) -> Result<bool>;
    async fn mark_sync_error(&self, address_id: &str, message: &str) -> Result<()>;
    /// Upserts a pulled record as `synced`. Returns `false` without writing
    /// when the outbox still holds unsettled work for the record; the check
    /// and the write share one transaction.
    async fn apply_remote_snapshot(&self, address: Address) -> Result<bool>;
}
