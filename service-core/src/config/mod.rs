use crate::error::AppError;
use serde::Deserialize;

/// Settings shared by every service binary in the workspace.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let port = match std::env::var("APP_PORT") {
            Ok(raw) => raw.parse().map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Invalid APP_PORT '{}': {}", raw, e))
            })?,
            Err(_) => default_port(),
        };

        Ok(Self { port })
    }
}
