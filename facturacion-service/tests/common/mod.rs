//! Common test utilities for facturacion-service integration tests.
//!
//! Each spawned app gets its own freshly created database (from
//! `TEST_DATABASE_URL`), so tests are isolated without tenant scoping. When
//! the variable is unset the suite skips cleanly.

use facturacion_service::config::{DatabaseConfig, FacturacionConfig};
use facturacion_service::Application;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use service_core::config::Config as CommonConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, Executor, PgConnection, PgPool};
use std::str::FromStr;
use std::sync::Once;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,facturacion_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    /// Direct pool into the test database, for assertions and for inducing
    /// drift the reconciler must repair.
    pub db: PgPool,
}

/// Swap the database name in a postgres connection string.
fn with_database(base_url: &str, db_name: &str) -> String {
    match base_url.rsplit_once('/') {
        Some((prefix, _)) => format!("{}/{}", prefix, db_name),
        None => format!("{}/{}", base_url, db_name),
    }
}

impl TestApp {
    /// Spawn the application against a fresh database, or `None` when no
    /// test database is configured.
    pub async fn spawn() -> Option<TestApp> {
        init_tracing();

        let base_url = match std::env::var("TEST_DATABASE_URL") {
            Ok(url) => url,
            Err(_) => {
                eprintln!("TEST_DATABASE_URL not set; skipping integration test");
                return None;
            }
        };

        let db_name = format!("facturacion_test_{}", Uuid::new_v4().simple());
        let mut admin = PgConnection::connect(&base_url)
            .await
            .expect("Failed to connect to test database server");
        admin
            .execute(format!(r#"CREATE DATABASE "{}""#, db_name).as_str())
            .await
            .expect("Failed to create test database");

        let database_url = with_database(&base_url, &db_name);

        let config = FacturacionConfig {
            common: CommonConfig { port: 0 },
            service_name: "facturacion-service-test".to_string(),
            service_version: "test".to_string(),
            log_level: "debug".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: database_url.clone(),
                max_connections: 5,
                min_connections: 1,
            },
        };

        let app = Application::build(config)
            .await
            .expect("Failed to build application");
        let port = app.port();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        let db = PgPoolOptions::new()
            .max_connections(2)
            .connect(&database_url)
            .await
            .expect("Failed to connect assertion pool");

        Some(TestApp {
            address: format!("http://127.0.0.1:{}", port),
            client: reqwest::Client::new(),
            db,
        })
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> (reqwest::StatusCode, Value) {
        let response = self
            .client
            .post(format!("{}{}", self.address, path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request");
        let status = response.status();
        let value = response.json().await.unwrap_or(Value::Null);
        (status, value)
    }

    pub async fn put_json(&self, path: &str, body: &Value) -> (reqwest::StatusCode, Value) {
        let response = self
            .client
            .put(format!("{}{}", self.address, path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request");
        let status = response.status();
        let value = response.json().await.unwrap_or(Value::Null);
        (status, value)
    }

    pub async fn delete(&self, path: &str) -> (reqwest::StatusCode, Value) {
        let response = self
            .client
            .delete(format!("{}{}", self.address, path))
            .send()
            .await
            .expect("Failed to execute request");
        let status = response.status();
        let value = response.json().await.unwrap_or(Value::Null);
        (status, value)
    }

    pub async fn get_json(&self, path: &str) -> (reqwest::StatusCode, Value) {
        let response = self
            .client
            .get(format!("{}{}", self.address, path))
            .send()
            .await
            .expect("Failed to execute request");
        let status = response.status();
        let value = response.json().await.unwrap_or(Value::Null);
        (status, value)
    }

    // ---------------------------------------------------------------------
    // Fixture helpers
    // ---------------------------------------------------------------------

    pub async fn create_test_client(&self, name: &str) -> Uuid {
        let (status, body) = self
            .post_json(
                "/clients",
                &json!({ "name": name, "rnc": "131223344" }),
            )
            .await;
        assert_eq!(status, reqwest::StatusCode::CREATED, "client: {}", body);
        Uuid::from_str(body["client_id"].as_str().unwrap()).unwrap()
    }

    pub async fn create_test_product(&self, name: &str, stock: &str, price: &str) -> Uuid {
        let (status, body) = self
            .post_json(
                "/products",
                &json!({
                    "name": name,
                    "stock": stock,
                    "min_stock": "0",
                    "unit_price": price,
                    "unit_cost": "0"
                }),
            )
            .await;
        assert_eq!(status, reqwest::StatusCode::CREATED, "product: {}", body);
        Uuid::from_str(body["product_id"].as_str().unwrap()).unwrap()
    }

    /// Create an invoice for one product line and return the envelope data.
    pub async fn create_simple_invoice(
        &self,
        client_id: Uuid,
        product_id: Uuid,
        quantity: &str,
        unit_price: &str,
    ) -> Value {
        let (status, body) = self
            .post_json(
                "/invoices",
                &json!({
                    "client_id": client_id,
                    "fiscal_type": "B02",
                    "issue_date": "2025-03-10",
                    "due_date": "2025-04-10",
                    "items": [{
                        "product_id": product_id,
                        "quantity": quantity,
                        "unit_price": unit_price
                    }]
                }),
            )
            .await;
        assert_eq!(status, reqwest::StatusCode::OK, "invoice: {}", body);
        assert_eq!(body["success"], json!(true), "invoice: {}", body);
        body["data"].clone()
    }

    pub async fn product_stock(&self, product_id: Uuid) -> Decimal {
        let (_, body) = self.get_json(&format!("/products/{}", product_id)).await;
        dec(&body["stock"])
    }
}

/// Parse a decimal out of a JSON field regardless of representation.
pub fn dec(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).expect("invalid decimal string"),
        Value::Number(n) => Decimal::from_str(&n.to_string()).expect("invalid decimal number"),
        other => panic!("expected decimal, got {:?}", other),
    }
}
