//! Reconciliation sweep integration tests: drift repair and idempotence.

mod common;

use common::{dec, TestApp};
use rust_decimal_macros::dec as d;
use serde_json::json;

#[tokio::test]
async fn reconcile_repairs_induced_drift_and_is_idempotent() {
    let Some(app) = TestApp::spawn().await else { return };

    let client_id = app.create_test_client("Cliente Deriva").await;
    let product_id = app.create_test_product("Batería", "10", "100.00").await;

    let invoice = app
        .create_simple_invoice(client_id, product_id, "1", "100.00")
        .await;
    let invoice_id = invoice["invoice_id"].as_str().unwrap().to_string();

    let (_, payment) = app
        .post_json(
            "/payments",
            &json!({
                "invoice_id": invoice_id,
                "amount": "50.00",
                "method": "Efectivo",
                "payment_date": "2025-03-12"
            }),
        )
        .await;
    assert_eq!(payment["success"], json!(true));

    // Corrupt the cached totals behind the ledger's back.
    sqlx::query(
        "UPDATE invoices SET paid_amount = 999, credit_total = 999, status = 'Pagada'",
    )
    .execute(&app.db)
    .await
    .unwrap();

    let (status, body) = app.post_json("/maintenance/reconcile", &json!({})).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["success"], json!(true), "reconcile: {}", body);
    assert_eq!(body["data"]["invoices_repaired"], json!(1));

    // Ground truth restored: one payment of 50, no credit notes.
    let (_, state) = app.get_json(&format!("/invoices/{}", invoice_id)).await;
    assert_eq!(dec(&state["paid_amount"]), d!(50));
    assert_eq!(dec(&state["credit_total"]), d!(0));
    assert_eq!(state["status"], json!("Parcial"));

    // A second sweep finds nothing to repair.
    let (_, body) = app.post_json("/maintenance/reconcile", &json!({})).await;
    assert_eq!(body["data"]["invoices_repaired"], json!(0));
    assert_eq!(body["data"]["invoices_checked"], json!(1));
}

#[tokio::test]
async fn reconcile_accounts_for_credit_notes() {
    let Some(app) = TestApp::spawn().await else { return };

    let client_id = app.create_test_client("Cliente Crédito").await;
    let product_id = app.create_test_product("Cargador", "10", "100.00").await;

    let invoice = app
        .create_simple_invoice(client_id, product_id, "2", "100.00")
        .await;
    let invoice_id = invoice["invoice_id"].as_str().unwrap().to_string();

    let (_, note) = app
        .post_json(
            "/credit-notes",
            &json!({
                "invoice_id": invoice_id,
                "reason": "Devolución",
                "issue_date": "2025-03-13",
                "items": [{ "product_id": product_id, "quantity": "1", "unit_price": "100.00" }]
            }),
        )
        .await;
    assert_eq!(note["success"], json!(true));

    // Wipe the caches entirely; the sweep must rebuild the credit
    // contribution so the status distinguishes credit from payment.
    sqlx::query("UPDATE invoices SET paid_amount = 0, credit_total = 0, status = 'Pendiente'")
        .execute(&app.db)
        .await
        .unwrap();

    let (_, body) = app.post_json("/maintenance/reconcile", &json!({})).await;
    assert_eq!(body["success"], json!(true));

    let (_, state) = app.get_json(&format!("/invoices/{}", invoice_id)).await;
    assert_eq!(dec(&state["paid_amount"]), d!(118));
    assert_eq!(dec(&state["credit_total"]), d!(118));
    assert_eq!(state["status"], json!("Nota de Crédito Parcial"));
}

#[tokio::test]
async fn reconcile_on_a_clean_ledger_changes_nothing() {
    let Some(app) = TestApp::spawn().await else { return };

    let client_id = app.create_test_client("Cliente Limpio").await;
    let product_id = app.create_test_product("Regleta", "10", "20.00").await;
    app.create_simple_invoice(client_id, product_id, "1", "20.00")
        .await;

    let (_, body) = app.post_json("/maintenance/reconcile", &json!({})).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["invoices_checked"], json!(1));
    assert_eq!(body["data"]["invoices_repaired"], json!(0));
}
