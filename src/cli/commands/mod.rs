pub mod catalog;
pub mod entitlement;
pub mod migrate;
pub mod tenant;
