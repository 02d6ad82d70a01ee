use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Connection credentials for a database server shared by several tenants
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCredential {
    pub server_id: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub secret: String,
}

impl ServerCredential {
    /// Physical server identity; two registry rows may point at the same host
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Password-free DSN for logs
    pub fn display_dsn(&self, database: &str) -> String {
        format!("postgres://{}@{}:{}/{}", self.user, self.host, self.port, database)
    }
}

impl fmt::Debug for ServerCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerCredential")
            .field("server_id", &self.server_id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ServerRow {
    pub id: String,
    pub host: String,
    pub port: i32,
    pub user: String,
    pub secret: String,
}

impl TryFrom<ServerRow> for ServerCredential {
    type Error = String;

    fn try_from(row: ServerRow) -> Result<Self, Self::Error> {
        let port = u16::try_from(row.port)
            .map_err(|_| format!("server '{}' has invalid port {}", row.id, row.port))?;

        Ok(ServerCredential {
            server_id: row.id,
            host: row.host,
            port,
            user: row.user,
            secret: row.secret,
        })
    }
}
