//! Address domain models.

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::{Error, Result, ValidationError};
use crate::utils::geo::GeoPoint;

/// Per-record marker of whether local state has been accepted remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Synced,
    Error,
}

/// Domain model representing a stored address record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
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
    pub location: Option<GeoPoint>,
    pub is_active: bool,
    pub sync_status: SyncStatus,
    pub sync_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub local_updated_at: Option<NaiveDateTime>,
    pub deactivated_at: Option<NaiveDateTime>,
    pub last_synced_at: Option<NaiveDateTime>,
}

impl Address {
    /// Timestamp used for "most recent first" ordering.
    pub fn recency(&self) -> NaiveDateTime {
        self.local_updated_at.unwrap_or(self.updated_at)
    }

    fn field(&self, field: AddressSearchField) -> Option<&str> {
        match field {
            AddressSearchField::Label => Some(self.label.as_str()),
            AddressSearchField::Street => Some(self.street.as_str()),
            AddressSearchField::City => Some(self.city.as_str()),
            AddressSearchField::Region => self.region.as_deref(),
            AddressSearchField::PostalCode => self.postal_code.as_deref(),
            AddressSearchField::Country => self.country.as_deref(),
            AddressSearchField::ContactName => self.contact_name.as_deref(),
            AddressSearchField::Phone => self.phone.as_deref(),
            AddressSearchField::Notes => self.notes.as_deref(),
        }
    }

    /// Case-insensitive substring match; `needle` must already be lowercase.
    pub fn matches_search(&self, needle: &str, fields: &[AddressSearchField]) -> bool {
        fields.iter().any(|field| {
            self.field(*field)
                .map(|value| value.to_lowercase().contains(needle))
                .unwrap_or(false)
        })
    }

    /// Merges `patch` over this record and re-stamps it as a pending local edit.
    pub fn apply_update(&mut self, patch: AddressUpdate, now: NaiveDateTime) {
        if let Some(label) = patch.label {
            self.label = label;
        }
        if let Some(street) = patch.street {
            self.street = street;
        }
        if let Some(city) = patch.city {
            self.city = city;
        }
        if let Some(region) = patch.region {
            self.region = region;
        }
        if let Some(postal_code) = patch.postal_code {
            self.postal_code = postal_code;
        }
        if let Some(country) = patch.country {
            self.country = country;
        }
        if let Some(contact_name) = patch.contact_name {
            self.contact_name = contact_name;
        }
        if let Some(phone) = patch.phone {
            self.phone = phone;
        }
        if let Some(notes) = patch.notes {
            self.notes = notes;
        }
        if let Some(location) = patch.location {
            self.location = location;
        }
        self.touch_local(now);
    }

    /// Stamps a local mutation: both timestamps move and the record goes back
    /// to `pending`.
    pub fn touch_local(&mut self, now: NaiveDateTime) {
        self.updated_at = now;
        self.local_updated_at = Some(now);
        self.sync_status = SyncStatus::Pending;
        self.sync_error = None;
    }
}

/// Input model for creating a new address.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAddress {
    pub id: Option<String>,
    pub label: String,
    pub street: String,
    pub city: String,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub contact_name: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
    pub location: Option<GeoPoint>,
}

impl NewAddress {
    pub fn validate(&self) -> Result<()> {
        require_non_empty("label", &self.label)?;
        require_non_empty("street", &self.street)?;
        require_non_empty("city", &self.city)?;
        if let Some(id) = &self.id {
            require_non_empty("id", id)?;
        }
        if let Some(location) = &self.location {
            validate_location(location)?;
        }
        Ok(())
    }
}

/// Partial update. Absent fields are kept; for nullable fields an explicit
/// `null` clears the stored value. `location` is always replaced whole.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressUpdate {
    pub label: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub region: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub postal_code: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub country: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub contact_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub location: Option<Option<GeoPoint>>,
}

impl AddressUpdate {
    pub fn validate(&self) -> Result<()> {
        if let Some(label) = &self.label {
            require_non_empty("label", label)?;
        }
        if let Some(street) = &self.street {
            require_non_empty("street", street)?;
        }
        if let Some(city) = &self.city {
            require_non_empty("city", city)?;
        }
        if let Some(Some(location)) = &self.location {
            validate_location(location)?;
        }
        Ok(())
    }
}

// Distinguishes a missing key (None) from an explicit null (Some(None)).
fn double_option<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(ValidationError::MissingField(
            field.to_string(),
        )));
    }
    Ok(())
}

fn validate_location(location: &GeoPoint) -> Result<()> {
    if !location.is_valid() {
        return Err(Error::invalid_value(
            "location",
            format!(
                "coordinates out of range: lat={}, lng={}",
                location.lat, location.lng
            ),
        ));
    }
    Ok(())
}

/// Fields eligible for text search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressSearchField {
    Label,
    Street,
    City,
    Region,
    PostalCode,
    Country,
    ContactName,
    Phone,
    Notes,
}

/// Searched when the caller does not name any fields.
pub const DEFAULT_SEARCH_FIELDS: [AddressSearchField; 5] = [
    AddressSearchField::Label,
    AddressSearchField::Street,
    AddressSearchField::City,
    AddressSearchField::PostalCode,
    AddressSearchField::ContactName,
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressListOptions {
    pub include_inactive: bool,
    pub search: Option<String>,
    #[serde(default)]
    pub search_fields: Vec<AddressSearchField>,
    pub sync_status: Option<SyncStatus>,
}

impl AddressListOptions {
    pub fn active() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            include_inactive: true,
            ..Self::default()
        }
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    /// Applies the search, status and activity filters, then sorts by
    /// recency, newest first.
    pub fn apply(&self, addresses: Vec<Address>) -> Vec<Address> {
        let needle = self
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);
        let fields: &[AddressSearchField] = if self.search_fields.is_empty() {
            &DEFAULT_SEARCH_FIELDS
        } else {
            &self.search_fields
        };

        let mut filtered: Vec<Address> = addresses
            .into_iter()
            .filter(|a| self.include_inactive || a.is_active)
            .filter(|a| self.sync_status.map_or(true, |s| a.sync_status == s))
            .filter(|a| {
                needle
                    .as_deref()
                    .map_or(true, |n| a.matches_search(n, fields))
            })
            .collect();
        filtered.sort_by(|a, b| b.recency().cmp(&a.recency()));
        filtered
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressWithDistance {
    pub address: Address,
    pub distance_km: f64,
}

/// Counters shown by dashboards and the "sync issues" surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressStats {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    #[serde(rename = "withGPS")]
    pub with_gps: usize,
    #[serde(rename = "withoutGPS")]
    pub without_gps: usize,
    pub pending_sync: usize,
    pub synced: usize,
    pub sync_errors: usize,
}

impl AddressStats {
    pub fn from_addresses(addresses: &[Address]) -> Self {
        addresses.iter().fold(Self::default(), |mut stats, address| {
            stats.total += 1;
            if address.is_active {
                stats.active += 1;
            } else {
                stats.inactive += 1;
            }
            if address.location.is_some() {
                stats.with_gps += 1;
            } else {
                stats.without_gps += 1;
            }
            match address.sync_status {
                SyncStatus::Pending => stats.pending_sync += 1,
                SyncStatus::Synced => stats.synced += 1,
                SyncStatus::Error => stats.sync_errors += 1,
            }
            stats
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn ts(minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .and_then(|d| d.and_hms_opt(9, minute, 0))
            .expect("valid timestamp")
    }

    fn address(id: &str, label: &str, city: &str, minute: u32) -> Address {
        Address {
            id: id.to_string(),
            label: label.to_string(),
            street: "1 Main St".to_string(),
            city: city.to_string(),
            region: None,
            postal_code: None,
            country: None,
            contact_name: None,
            phone: None,
            notes: None,
            location: None,
            is_active: true,
            sync_status: SyncStatus::Pending,
            sync_error: None,
            created_at: ts(minute),
            updated_at: ts(minute),
            local_updated_at: Some(ts(minute)),
            deactivated_at: None,
            last_synced_at: None,
        }
    }

    #[test]
    fn list_filters_case_insensitively_and_sorts_newest_first() {
        let mut inactive = address("c", "Depot Lisboa", "Lisboa", 3);
        inactive.is_active = false;
        let rows = vec![
            address("a", "Warehouse", "Porto", 1),
            address("b", "WAREHOUSE north", "Braga", 2),
            inactive,
        ];

        let found = AddressListOptions::active()
            .with_search("wareHOUSE")
            .apply(rows.clone());
        let ids: Vec<_> = found.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);

        let all = AddressListOptions::all().apply(rows);
        let ids: Vec<_> = all.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn recency_falls_back_to_updated_at() {
        let mut pulled = address("p", "Pulled", "Faro", 0);
        pulled.local_updated_at = None;
        pulled.updated_at = ts(0) + Duration::minutes(30);
        let local = address("l", "Local", "Faro", 10);

        let sorted = AddressListOptions::all().apply(vec![local, pulled]);
        assert_eq!(sorted[0].id, "p");
    }

    #[test]
    fn search_respects_selected_fields() {
        let mut row = address("a", "Shop", "Coimbra", 1);
        row.notes = Some("back door code 1234".to_string());

        let default_fields = AddressListOptions::all().with_search("door");
        assert!(default_fields.apply(vec![row.clone()]).is_empty());

        let mut notes_only = AddressListOptions::all().with_search("DOOR");
        notes_only.search_fields = vec![AddressSearchField::Notes];
        assert_eq!(notes_only.apply(vec![row]).len(), 1);
    }

    #[test]
    fn update_replaces_location_whole_and_clears_nullable_fields() {
        let mut row = address("a", "Shop", "Coimbra", 1);
        row.phone = Some("555".to_string());
        row.location = Some(GeoPoint::new(40.2, -8.4));
        row.sync_status = SyncStatus::Synced;

        let patch: AddressUpdate = serde_json::from_value(serde_json::json!({
            "phone": null,
            "location": { "lat": 41.0, "lng": -8.6 }
        }))
        .expect("patch");
        row.apply_update(patch, ts(20));

        assert_eq!(row.phone, None);
        assert_eq!(row.location, Some(GeoPoint::new(41.0, -8.6)));
        assert_eq!(row.label, "Shop");
        assert_eq!(row.sync_status, SyncStatus::Pending);
        assert_eq!(row.local_updated_at, Some(ts(20)));
        assert_eq!(row.updated_at, ts(20));
    }

    #[test]
    fn half_specified_location_is_rejected_by_deserialization() {
        let patch = serde_json::from_value::<AddressUpdate>(serde_json::json!({
            "location": { "lat": 41.0 }
        }));
        assert!(patch.is_err());
    }

    #[test]
    fn validation_rejects_blank_required_fields_and_bad_coordinates() {
        let blank = NewAddress {
            label: " ".to_string(),
            street: "x".to_string(),
            city: "y".to_string(),
            ..NewAddress::default()
        };
        assert!(matches!(blank.validate(), Err(Error::Validation(_))));

        let bad_location = AddressUpdate {
            location: Some(Some(GeoPoint::new(123.0, 0.0))),
            ..AddressUpdate::default()
        };
        assert!(bad_location.validate().is_err());

        let cleared = AddressUpdate {
            location: Some(None),
            ..AddressUpdate::default()
        };
        assert!(cleared.validate().is_ok());
    }

    #[test]
    fn stats_count_every_bucket() {
        let mut with_gps = address("a", "A", "X", 1);
        with_gps.location = Some(GeoPoint::new(1.0, 1.0));
        with_gps.sync_status = SyncStatus::Synced;
        let mut failed = address("b", "B", "X", 2);
        failed.is_active = false;
        failed.sync_status = SyncStatus::Error;
        let pending = address("c", "C", "X", 3);

        let stats = AddressStats::from_addresses(&[with_gps, failed, pending]);
        assert_eq!(
            stats,
            AddressStats {
                total: 3,
                active: 2,
                inactive: 1,
                with_gps: 1,
                without_gps: 2,
                pending_sync: 1,
                synced: 1,
                sync_errors: 1,
            }
        );
    }
}
