pub mod cli;
pub mod config;
pub mod database;
pub mod entitlement;
pub mod migration;
pub mod services;

#[cfg(test)]
pub mod testing;
