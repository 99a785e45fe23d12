mod model;
mod repository;

pub use model::AppMetadataDB;
pub use repository::{write_metadata, MetadataRepository};
