use std::sync::Arc;

use log::debug;

use super::addresses_model::{
    Address, AddressListOptions, AddressStats, AddressUpdate, AddressWithDistance, NewAddress,
};
use super::addresses_traits::AddressRepositoryTrait;
use crate::errors::{Error, Result};
use crate::utils::geo::GeoPoint;

/// Public CRUD and query surface consumed by UI and business layers.
pub struct AddressService {
    repository: Arc<dyn AddressRepositoryTrait>,
}

impl AddressService {
    pub fn new(repository: Arc<dyn AddressRepositoryTrait>) -> Self {
        Self { repository }
    }

    pub async fn create_address(&self, new_address: NewAddress) -> Result<Address> {
        new_address.validate()?;
        self.repository.create(new_address).await
    }

    pub fn list_addresses(&self, options: &AddressListOptions) -> Result<Vec<Address>> {
        self.repository.list(options)
    }

    pub fn get_address(&self, address_id: &str) -> Result<Address> {
        self.repository.get_by_id(address_id)
    }

    pub async fn update_address(&self, address_id: &str, patch: AddressUpdate) -> Result<Address> {
        patch.validate()?;
        self.repository.update(address_id, patch).await
    }

    pub async fn deactivate_address(&self, address_id: &str) -> Result<Address> {
        self.repository.deactivate(address_id).await
    }

    pub async fn activate_address(&self, address_id: &str) -> Result<Address> {
        self.repository.activate(address_id).await
    }

    /// Irreversible. The outbox DELETE is staged by the repository in the same
    /// transaction, ahead of the row removal.
    pub async fn permanently_delete_address(&self, address_id: &str) -> Result<()> {
        self.repository.permanently_delete(address_id).await
    }

    /// Addresses within `radius_km` of the given point, nearest first.
    /// Records without coordinates are never returned.
    pub fn proximity_search(
        &self,
        lat: f64,
        lng: f64,
        radius_km: f64,
        include_inactive: bool,
    ) -> Result<Vec<AddressWithDistance>> {
        let center = GeoPoint::new(lat, lng);
        if !center.is_valid() {
            return Err(Error::invalid_value(
                "center",
                format!("coordinates out of range: lat={}, lng={}", lat, lng),
            ));
        }
        if !radius_km.is_finite() || radius_km < 0.0 {
            return Err(Error::invalid_value(
                "radius_km",
                format!("must be a non-negative number, got {}", radius_km),
            ));
        }

        let options = AddressListOptions {
            include_inactive,
            ..AddressListOptions::default()
        };
        let mut matches: Vec<AddressWithDistance> = self
            .repository
            .list(&options)?
            .into_iter()
            .filter_map(|address| {
                let distance_km = address.location?.distance_km(&center);
                (distance_km <= radius_km).then_some(AddressWithDistance {
                    address,
                    distance_km,
                })
            })
            .collect();
        matches.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));

        debug!(
            "Proximity search ({}, {}) r={}km matched {} addresses",
            lat,
            lng,
            radius_km,
            matches.len()
        );
        Ok(matches)
    }

    pub fn aggregate_stats(&self) -> Result<AddressStats> {
        let addresses = self.repository.list(&AddressListOptions::all())?;
        Ok(AddressStats::from_addresses(&addresses))
    }
}
