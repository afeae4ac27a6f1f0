use serde::Deserialize;
use service_core::config::Config as CommonConfig;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FacturacionConfig {
    pub common: CommonConfig,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
}

impl FacturacionConfig {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let port = env::var("FACTURACION_PORT")
            .unwrap_or_else(|_| "3010".to_string())
            .parse()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid FACTURACION_PORT: {}", e)))?;

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| AppError::ConfigError(anyhow::anyhow!("DATABASE_URL must be set")))?;
        let max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);
        let min_connections = env::var("DATABASE_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .unwrap_or(1);

        let log_level = env::var("LOG_LEVEL")
            .unwrap_or_else(|_| "info,facturacion_service=debug,sqlx=warn".to_string());
        let otlp_endpoint = env::var("OTLP_ENDPOINT").ok();

        Ok(Self {
            common: CommonConfig { port },
            service_name: "facturacion-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level,
            otlp_endpoint,
            database: DatabaseConfig {
                url: database_url,
                max_connections,
                min_connections,
            },
        })
    }
}
