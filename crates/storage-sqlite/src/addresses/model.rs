//! Database model for address records.

use chrono::NaiveDateTime;
use diesel::prelude::*;

use waypost_core::addresses::Address;
use waypost_core::errors::Error;
use waypost_core::utils::geo::GeoPoint;

use crate::utils::{enum_from_db, enum_to_db};

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::addresses)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(treat_none_as_null = true)]
pub struct AddressDB {
    pub id: String,
    pub label: String,
    pub street: String,
    pub city: String,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub contact_name: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub is_active: bool,
    pub sync_status: String,
    pub sync_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub local_updated_at: Option<NaiveDateTime>,
    pub deactivated_at: Option<NaiveDateTime>,
    pub last_synced_at: Option<NaiveDateTime>,
}

impl TryFrom<AddressDB> for Address {
    type Error = Error;

    fn try_from(db: AddressDB) -> Result<Self, Self::Error> {
        // A half-written coordinate pair is treated as no location.
        let location = match (db.latitude, db.longitude) {
            (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)),
            _ => None,
        };
        Ok(Address {
            id: db.id,
            label: db.label,
            street: db.street,
            city: db.city,
            region: db.region,
            postal_code: db.postal_code,
            country: db.country,
            contact_name: db.contact_name,
            phone: db.phone,
            notes: db.notes,
            location,
            is_active: db.is_active,
            sync_status: enum_from_db(&db.sync_status)?,
            sync_error: db.sync_error,
            created_at: db.created_at,
            updated_at: db.updated_at,
            local_updated_at: db.local_updated_at,
            deactivated_at: db.deactivated_at,
            last_synced_at: db.last_synced_at,
        })
    }
}

impl TryFrom<&Address> for AddressDB {
    type Error = Error;

    fn try_from(address: &Address) -> Result<Self, Self::Error> {
        Ok(AddressDB {
            id: address.id.clone(),
            label: address.label.clone(),
            street: address.street.clone(),
            city: address.city.clone(),
            region: address.region.clone(),
            postal_code: address.postal_code.clone(),
            country: address.country.clone(),
            contact_name: address.contact_name.clone(),
            phone: address.phone.clone(),
            notes: address.notes.clone(),
            latitude: address.location.map(|p| p.lat),
            longitude: address.location.map(|p| p.lng),
            is_active: address.is_active,
            sync_status: enum_to_db(&address.sync_status)?,
            sync_error: address.sync_error.clone(),
            created_at: address.created_at,
            updated_at: address.updated_at,
            local_updated_at: address.local_updated_at,
            deactivated_at: address.deactivated_at,
            last_synced_at: address.last_synced_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row() -> AddressDB {
        let ts = NaiveDate::from_ymd_opt(2026, 3, 2)
            .and_then(|d| d.and_hms_opt(8, 0, 0))
            .expect("timestamp");
        AddressDB {
            id: "a-1".to_string(),
            label: "Depot".to_string(),
            street: "Rua Nova 5".to_string(),
            city: "Porto".to_string(),
            region: None,
            postal_code: Some("4000-001".to_string()),
            country: None,
            contact_name: None,
            phone: None,
            notes: None,
            latitude: Some(41.15),
            longitude: None,
            is_active: true,
            sync_status: "synced".to_string(),
            sync_error: None,
            created_at: ts,
            updated_at: ts,
            local_updated_at: None,
            deactivated_at: None,
            last_synced_at: Some(ts),
        }
    }

    #[test]
    fn location_requires_both_coordinates() {
        let address = Address::try_from(row()).expect("convert");
        assert!(address.location.is_none());

        let mut complete = row();
        complete.longitude = Some(-8.61);
        let address = Address::try_from(complete.clone()).expect("convert");
        assert_eq!(address.location, Some(GeoPoint::new(41.15, -8.61)));
        assert_eq!(AddressDB::try_from(&address).expect("back"), complete);
    }

    #[test]
    fn unknown_sync_status_is_an_error() {
        let mut bad = row();
        bad.sync_status = "maybe".to_string();
        assert!(Address::try_from(bad).is_err());
    }
}
