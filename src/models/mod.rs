pub mod address;
pub mod transaction;

pub use address::{normalize_address, validate_address, AddressError};
pub use transaction::{BlockRef, Notification, Transaction, WatchedAddress};
