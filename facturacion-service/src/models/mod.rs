//! Domain models for facturacion-service.

mod client;
mod credit_note;
mod invoice;
mod movement;
mod payment;
mod product;

pub use client::Client;
pub use credit_note::{CreditNote, CreditNoteItem};
pub use invoice::{
    compute_invoice_totals, compute_item_amounts, FiscalDocType, Invoice, InvoiceItem,
    InvoiceStatus, InvoiceTotals, ItemAmounts,
};
pub use movement::{InventoryMovement, MovementType};
pub use payment::Payment;
pub use product::Product;
