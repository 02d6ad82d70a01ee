pub mod connection;
pub mod manager;
pub mod models;

pub use connection::{PgConnectionFactory, PgSchemaConnection};
pub use manager::{DatabaseError, DatabaseManager};
