//! SQLite implementation of the Waypost local store: schema migrations, the
//! single-writer actor, and the repositories behind the core traits.

pub mod addresses;
pub mod db;
pub mod errors;
pub mod schema;
pub mod store;
pub mod sync;
mod utils;

pub use addresses::AddressRepository;
pub use db::{DbConnection, DbPool, WriteHandle};
pub use errors::StorageError;
pub use store::{LocalStore, STORE_TABLES};
pub use sync::{MetadataRepository, SyncQueueRepository};
