pub mod pages;
pub mod zones;

pub use pages::{BASE_CURRENCY_ID, GearAllowlist};
