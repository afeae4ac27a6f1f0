//! Application startup and lifecycle management.

use crate::config::FacturacionConfig;
use crate::handlers;
use crate::services::{
    get_metrics, init_metrics, CreditNoteEngine, Database, InvoiceLedger, PaymentReconciler,
};
use axum::{
    extract::{MatchedPath, Request},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use service_core::error::AppError;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Signal fired after every successful mutation; the UI layer subscribes to
/// drop its cached views.
#[derive(Debug, Clone)]
pub struct ViewInvalidation {
    pub scope: &'static str,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub invoices: InvoiceLedger,
    pub payments: PaymentReconciler,
    pub credit_notes: CreditNoteEngine,
    pub config: FacturacionConfig,
    view_events: broadcast::Sender<ViewInvalidation>,
}

impl AppState {
    /// Fire the view-invalidation hook. Nobody listening is fine.
    pub fn invalidate_views(&self, scope: &'static str) {
        let _ = self.view_events.send(ViewInvalidation { scope });
    }

    pub fn subscribe_views(&self) -> broadcast::Receiver<ViewInvalidation> {
        self.view_events.subscribe()
    }
}

/// Health check endpoint for liveness probes.
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "facturacion-service",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// Readiness check endpoint.
async fn readiness_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ready" })))
}

/// Prometheus metrics endpoint.
async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Count requests per matched route and status code.
async fn track_metrics(request: Request, next: Next) -> Response {
    let route = match request.extensions().get::<MatchedPath>() {
        Some(matched) => matched.as_str().to_string(),
        None => request.uri().path().to_string(),
    };
    let response = next.run(request).await;
    crate::services::metrics::HTTP_REQUESTS_TOTAL
        .with_label_values(&[&route, response.status().as_str()])
        .inc();
    response
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_endpoint))
        .route(
            "/invoices",
            post(handlers::invoices::create_invoice).get(handlers::invoices::list_invoices),
        )
        .route(
            "/invoices/:id",
            get(handlers::invoices::get_invoice)
                .put(handlers::invoices::update_invoice)
                .delete(handlers::invoices::delete_invoice),
        )
        .route("/payments", post(handlers::payments::create_payment))
        .route(
            "/payments/:id",
            axum::routing::put(handlers::payments::update_payment)
                .delete(handlers::payments::delete_payment),
        )
        .route(
            "/credit-notes",
            post(handlers::credit_notes::create_credit_note),
        )
        .route(
            "/credit-notes/:id",
            get(handlers::credit_notes::get_credit_note)
                .put(handlers::credit_notes::update_credit_note)
                .delete(handlers::credit_notes::delete_credit_note),
        )
        .route(
            "/products",
            post(handlers::products::create_product).get(handlers::products::list_products),
        )
        .route("/products/low-stock", get(handlers::products::list_low_stock))
        .route(
            "/products/:id",
            get(handlers::products::get_product).put(handlers::products::update_product),
        )
        .route(
            "/clients",
            post(handlers::clients::create_client).get(handlers::clients::list_clients),
        )
        .route("/clients/:id", get(handlers::clients::get_client))
        .route(
            "/inventory/adjustments",
            post(handlers::inventory::adjust_stock),
        )
        .route(
            "/inventory/movements",
            get(handlers::inventory::list_movements),
        )
        .route(
            "/maintenance/reconcile",
            post(handlers::maintenance::reconcile_invoices),
        )
        .route_layer(axum::middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: FacturacionConfig) -> Result<Self, AppError> {
        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await?;

        db.run_migrations().await?;
        init_metrics();

        let (view_events, _) = broadcast::channel(64);

        let state = AppState {
            invoices: InvoiceLedger::new(db.clone()),
            payments: PaymentReconciler::new(db.clone()),
            credit_notes: CreditNoteEngine::new(db.clone()),
            db,
            config: config.clone(),
            view_events,
        };

        // Port 0 binds a random free port, used by the test harness.
        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("facturacion-service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get the application state.
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let app = router(self.state);
        axum::serve(self.listener, app).await
    }
}
