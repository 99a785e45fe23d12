use chrono::NaiveDateTime;
use diesel::prelude::*;

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone)]
#[diesel(primary_key(key))]
#[diesel(table_name = crate::schema::app_metadata)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AppMetadataDB {
    pub key: String,
    pub value: String,
    pub updated_at: NaiveDateTime,
}
