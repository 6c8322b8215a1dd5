use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub retention_default_days: i64,
}

impl AppConfig {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://consent.db".to_string());

        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()?;

        let retention_default_days = env::var("RETENTION_DEFAULT_DAYS")
            .unwrap_or_else(|_| "365".to_string())
            .parse()?;

        Ok(AppConfig {
            database_url,
            server_host,
            server_port,
            retention_default_days,
        })
    }
}
