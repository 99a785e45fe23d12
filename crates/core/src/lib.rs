//! Domain models, service layer and sync orchestration for the Waypost
//! offline-first data layer. Storage and transport live in sibling crates and
//! plug in through the traits defined here.

pub mod addresses;
pub mod errors;
pub mod sync;
pub mod utils;

pub use errors::{Error, Result};
