//! Address records: domain model, repository contract and service.

mod addresses_model;
mod addresses_service;
mod addresses_traits;

pub use addresses_model::*;
pub use addresses_service::AddressService;
pub use addresses_traits::AddressRepositoryTrait;
