pub mod fleet;
pub mod fleet_store;
pub mod governor;
pub mod intent;
pub mod policy;
pub mod reconciler;
pub mod types;
