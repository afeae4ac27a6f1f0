//! Service layer: the database pool, the fiscal ledger components and the
//! metrics registry.

pub mod credit_notes;
pub mod database;
pub mod invoices;
pub mod metrics;
pub mod payments;
pub mod sequence;
pub mod stock;

pub use credit_notes::CreditNoteEngine;
pub use database::Database;
pub use invoices::InvoiceLedger;
pub use metrics::{get_metrics, init_metrics};
pub use payments::PaymentReconciler;
