mod model;
mod repository;

pub use model::AddressDB;
pub use repository::AddressRepository;
