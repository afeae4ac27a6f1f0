//! Database pool wrapper and read paths for facturacion-service.

use crate::dtos::{
    CreateClientRequest, CreateProductRequest, InvoiceListQuery, MovementListQuery,
    UpdateProductRequest,
};
use crate::models::{
    Client, CreditNote, CreditNoteItem, InventoryMovement, Invoice, InvoiceItem, Payment, Product,
};
use crate::services::metrics::DB_QUERY_DURATION;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "facturacion-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Clients
    // -------------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn get_client(&self, client_id: Uuid) -> Result<Option<Client>, AppError> {
        let client = sqlx::query_as::<_, Client>(
            r#"
            SELECT client_id, name, rnc, email, phone, address, created_utc
            FROM clients
            WHERE client_id = $1
            "#,
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get client: {}", e)))?;

        Ok(client)
    }

    #[instrument(skip(self, input))]
    pub async fn create_client(&self, input: &CreateClientRequest) -> Result<Client, AppError> {
        let client = sqlx::query_as::<_, Client>(
            r#"
            INSERT INTO clients (client_id, name, rnc, email, phone, address)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING client_id, name, rnc, email, phone, address, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.name)
        .bind(&input.rnc)
        .bind(&input.email)
        .bind(&input.phone)
        .bind(&input.address)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create client: {}", e)))?;

        info!(client_id = %client.client_id, "Client created");

        Ok(client)
    }

    #[instrument(skip(self))]
    pub async fn list_clients(&self) -> Result<Vec<Client>, AppError> {
        let clients = sqlx::query_as::<_, Client>(
            r#"
            SELECT client_id, name, rnc, email, phone, address, created_utc
            FROM clients
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list clients: {}", e)))?;

        Ok(clients)
    }

    // -------------------------------------------------------------------------
    // Products
    // -------------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn get_product(&self, product_id: Uuid) -> Result<Option<Product>, AppError> {
        let product = sqlx::query_as::<_, Product>(
            r#"
            SELECT product_id, name, description, stock, min_stock, unit_price, unit_cost, created_utc
            FROM products
            WHERE product_id = $1
            "#,
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get product: {}", e)))?;

        Ok(product)
    }

    #[instrument(skip(self, input))]
    pub async fn create_product(&self, input: &CreateProductRequest) -> Result<Product, AppError> {
        let product = sqlx::query_as::<_, Product>(
            r#"
            INSERT INTO products (product_id, name, description, stock, min_stock, unit_price, unit_cost)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING product_id, name, description, stock, min_stock, unit_price, unit_cost, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.stock)
        .bind(input.min_stock)
        .bind(input.unit_price)
        .bind(input.unit_cost)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create product: {}", e)))?;

        info!(product_id = %product.product_id, name = %product.name, "Product created");

        Ok(product)
    }

    /// Update product master data. The stock quantity is deliberately not
    /// editable here; it only moves through the stock ledger.
    #[instrument(skip(self, input))]
    pub async fn update_product(
        &self,
        product_id: Uuid,
        input: &UpdateProductRequest,
    ) -> Result<Option<Product>, AppError> {
        let product = sqlx::query_as::<_, Product>(
            r#"
            UPDATE products
            SET name = COALESCE($2, name),
                description = COALESCE($3, description),
                min_stock = COALESCE($4, min_stock),
                unit_price = COALESCE($5, unit_price),
                unit_cost = COALESCE($6, unit_cost)
            WHERE product_id = $1
            RETURNING product_id, name, description, stock, min_stock, unit_price, unit_cost, created_utc
            "#,
        )
        .bind(product_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.min_stock)
        .bind(input.unit_price)
        .bind(input.unit_cost)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update product: {}", e)))?;

        Ok(product)
    }

    #[instrument(skip(self))]
    pub async fn list_products(&self) -> Result<Vec<Product>, AppError> {
        let products = sqlx::query_as::<_, Product>(
            r#"
            SELECT product_id, name, description, stock, min_stock, unit_price, unit_cost, created_utc
            FROM products
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list products: {}", e)))?;

        Ok(products)
    }

    /// Products at or below their minimum stock threshold.
    #[instrument(skip(self))]
    pub async fn list_low_stock_products(&self) -> Result<Vec<Product>, AppError> {
        let products = sqlx::query_as::<_, Product>(
            r#"
            SELECT product_id, name, description, stock, min_stock, unit_price, unit_cost, created_utc
            FROM products
            WHERE stock <= min_stock
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list low-stock products: {}", e))
        })?;

        Ok(products)
    }

    // -------------------------------------------------------------------------
    // Invoice read paths
    // -------------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, invoice_number, ncf, fiscal_type, client_id, client_name, client_rnc,
                issue_date, due_date, status, subtotal, discount_pct, tax, total, paid_amount,
                credit_total, notes, created_utc, updated_utc
            FROM invoices
            WHERE invoice_id = $1
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        timer.observe_duration();

        Ok(invoice)
    }

    /// List invoices, newest first, optionally filtered by period, status and
    /// client.
    #[instrument(skip(self, filter))]
    pub async fn list_invoices(&self, filter: &InvoiceListQuery) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let invoices = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, invoice_number, ncf, fiscal_type, client_id, client_name, client_rnc,
                issue_date, due_date, status, subtotal, discount_pct, tax, total, paid_amount,
                credit_total, notes, created_utc, updated_utc
            FROM invoices
            WHERE ($1::date IS NULL OR issue_date >= $1)
              AND ($2::date IS NULL OR issue_date <= $2)
              AND ($3::varchar IS NULL OR status = $3)
              AND ($4::uuid IS NULL OR client_id = $4)
            ORDER BY issue_date DESC, invoice_number DESC
            "#,
        )
        .bind(filter.from)
        .bind(filter.to)
        .bind(&filter.status)
        .bind(filter.client_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list invoices: {}", e)))?;

        timer.observe_duration();

        Ok(invoices)
    }

    #[instrument(skip(self))]
    pub async fn get_invoice_items(&self, invoice_id: Uuid) -> Result<Vec<InvoiceItem>, AppError> {
        let items = sqlx::query_as::<_, InvoiceItem>(
            r#"
            SELECT item_id, invoice_id, product_id, product_name, quantity, unit_price,
                discount_pct, subtotal, total, sort_order
            FROM invoice_items
            WHERE invoice_id = $1
            ORDER BY sort_order
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice items: {}", e))
        })?;

        Ok(items)
    }

    // -------------------------------------------------------------------------
    // Payment / credit-note read paths
    // -------------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, AppError> {
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, invoice_id, invoice_number, amount, method, payment_date,
                reference, notes, created_utc
            FROM payments
            WHERE payment_id = $1
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get payment: {}", e)))?;

        Ok(payment)
    }

    #[instrument(skip(self))]
    pub async fn list_invoice_payments(&self, invoice_id: Uuid) -> Result<Vec<Payment>, AppError> {
        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, invoice_id, invoice_number, amount, method, payment_date,
                reference, notes, created_utc
            FROM payments
            WHERE invoice_id = $1
            ORDER BY payment_date, created_utc
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list payments: {}", e)))?;

        Ok(payments)
    }

    #[instrument(skip(self))]
    pub async fn get_credit_note(
        &self,
        credit_note_id: Uuid,
    ) -> Result<Option<CreditNote>, AppError> {
        let note = sqlx::query_as::<_, CreditNote>(
            r#"
            SELECT credit_note_id, credit_note_number, ncf, invoice_id, invoice_number,
                invoice_ncf, client_id, client_name, client_rnc, issue_date, reason,
                subtotal, tax, total, notes, created_utc, updated_utc
            FROM credit_notes
            WHERE credit_note_id = $1
            "#,
        )
        .bind(credit_note_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get credit note: {}", e))
        })?;

        Ok(note)
    }

    #[instrument(skip(self))]
    pub async fn list_invoice_credit_notes(
        &self,
        invoice_id: Uuid,
    ) -> Result<Vec<CreditNote>, AppError> {
        let notes = sqlx::query_as::<_, CreditNote>(
            r#"
            SELECT credit_note_id, credit_note_number, ncf, invoice_id, invoice_number,
                invoice_ncf, client_id, client_name, client_rnc, issue_date, reason,
                subtotal, tax, total, notes, created_utc, updated_utc
            FROM credit_notes
            WHERE invoice_id = $1
            ORDER BY created_utc
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list credit notes: {}", e))
        })?;

        Ok(notes)
    }

    #[instrument(skip(self))]
    pub async fn get_credit_note_items(
        &self,
        credit_note_id: Uuid,
    ) -> Result<Vec<CreditNoteItem>, AppError> {
        let items = sqlx::query_as::<_, CreditNoteItem>(
            r#"
            SELECT item_id, credit_note_id, product_id, product_name, quantity, unit_price,
                discount_pct, subtotal, total
            FROM credit_note_items
            WHERE credit_note_id = $1
            ORDER BY product_name
            "#,
        )
        .bind(credit_note_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get credit note items: {}", e))
        })?;

        Ok(items)
    }

    // -------------------------------------------------------------------------
    // Inventory movements
    // -------------------------------------------------------------------------

    #[instrument(skip(self, filter))]
    pub async fn list_movements(
        &self,
        filter: &MovementListQuery,
    ) -> Result<Vec<InventoryMovement>, AppError> {
        let movements = sqlx::query_as::<_, InventoryMovement>(
            r#"
            SELECT movement_id, product_id, product_name, movement_type, quantity,
                movement_date, reference, notes, created_utc
            FROM inventory_movements
            WHERE ($1::uuid IS NULL OR product_id = $1)
              AND ($2::varchar IS NULL OR reference = $2)
            ORDER BY created_utc DESC
            "#,
        )
        .bind(filter.product_id)
        .bind(&filter.reference)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list movements: {}", e)))?;

        Ok(movements)
    }
}
