//! Pure helpers that turn discovered names and addresses into store keys.

pub mod address;
pub mod keys;

pub use address::{select_addresses, MultiAddressStrategy};
pub use keys::KeyPathBuilder;
