//! Invoice ledger integration tests: creation totals and numbering, stock
//! consistency, edits, cascading deletes and concurrent creation.

mod common;

use common::{dec, TestApp};
use rust_decimal_macros::dec as d;
use serde_json::json;

#[tokio::test]
async fn create_invoice_computes_totals_and_allocates_numbers() {
    let Some(app) = TestApp::spawn().await else { return };

    let client_id = app.create_test_client("Ferretería El Sol").await;
    let product_id = app.create_test_product("Cemento", "10", "100.00").await;

    let invoice = app
        .create_simple_invoice(client_id, product_id, "1", "100.00")
        .await;

    assert_eq!(invoice["invoice_number"], json!("FAC-000001"));
    assert_eq!(invoice["ncf"], json!("B0200000001"));
    assert_eq!(invoice["status"], json!("Pendiente"));
    assert_eq!(dec(&invoice["subtotal"]), d!(100));
    assert_eq!(dec(&invoice["tax"]), d!(18));
    assert_eq!(dec(&invoice["total"]), d!(118));
    assert_eq!(dec(&invoice["paid_amount"]), d!(0));

    // Client identity is snapshotted onto the document.
    assert_eq!(invoice["client_name"], json!("Ferretería El Sol"));

    // Stock moved and the sale left exactly one audit row.
    assert_eq!(app.product_stock(product_id).await, d!(9));
    let (_, movements) = app
        .get_json("/inventory/movements?reference=FAC-000001")
        .await;
    let movements = movements.as_array().unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0]["movement_type"], json!("SALIDA"));
    assert_eq!(dec(&movements[0]["quantity"]), d!(1));
}

#[tokio::test]
async fn invoice_numbers_are_sequential() {
    let Some(app) = TestApp::spawn().await else { return };

    let client_id = app.create_test_client("Cliente Secuencia").await;
    let product_id = app.create_test_product("Tornillos", "100", "5.00").await;

    let first = app
        .create_simple_invoice(client_id, product_id, "1", "5.00")
        .await;
    let second = app
        .create_simple_invoice(client_id, product_id, "1", "5.00")
        .await;

    assert_eq!(first["invoice_number"], json!("FAC-000001"));
    assert_eq!(second["invoice_number"], json!("FAC-000002"));
    assert_eq!(first["ncf"], json!("B0200000001"));
    assert_eq!(second["ncf"], json!("B0200000002"));
}

#[tokio::test]
async fn sin_comprobante_invoice_carries_no_ncf() {
    let Some(app) = TestApp::spawn().await else { return };

    let client_id = app.create_test_client("Cliente Interno").await;
    let product_id = app.create_test_product("Arena", "10", "50.00").await;

    let (status, body) = app
        .post_json(
            "/invoices",
            &json!({
                "client_id": client_id,
                "fiscal_type": "SIN",
                "issue_date": "2025-03-10",
                "items": [{ "product_id": product_id, "quantity": "2", "unit_price": "50.00" }]
            }),
        )
        .await;

    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert!(body["data"]["ncf"].is_null());
    assert_eq!(body["data"]["fiscal_type"], json!("SIN"));
}

#[tokio::test]
async fn insufficient_stock_rejects_whole_invoice_naming_items() {
    let Some(app) = TestApp::spawn().await else { return };

    let client_id = app.create_test_client("Cliente Corto").await;
    let scarce = app.create_test_product("Varilla", "2", "300.00").await;
    let plenty = app.create_test_product("Alambre", "50", "20.00").await;

    let (status, body) = app
        .post_json(
            "/invoices",
            &json!({
                "client_id": client_id,
                "issue_date": "2025-03-10",
                "items": [
                    { "product_id": scarce, "quantity": "5", "unit_price": "300.00" },
                    { "product_id": plenty, "quantity": "10", "unit_price": "20.00" }
                ]
            }),
        )
        .await;

    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["success"], json!(false));
    let message = body["message"].as_str().unwrap();
    assert!(message.contains("Varilla"), "message: {}", message);

    // Nothing was applied: both stocks intact, no invoice, no movements.
    assert_eq!(app.product_stock(scarce).await, d!(2));
    assert_eq!(app.product_stock(plenty).await, d!(50));
    let (_, invoices) = app.get_json("/invoices").await;
    assert_eq!(invoices.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn update_replaces_items_and_regenerates_movements() {
    let Some(app) = TestApp::spawn().await else { return };

    let client_id = app.create_test_client("Cliente Edición").await;
    let first = app.create_test_product("Pintura", "20", "25.00").await;
    let second = app.create_test_product("Brocha", "30", "10.00").await;

    let (_, created) = app
        .post_json(
            "/invoices",
            &json!({
                "client_id": client_id,
                "issue_date": "2025-03-10",
                "items": [
                    { "product_id": first, "quantity": "4", "unit_price": "25.00" },
                    { "product_id": second, "quantity": "2", "unit_price": "10.00" }
                ]
            }),
        )
        .await;
    let invoice_id = created["data"]["invoice_id"].as_str().unwrap().to_string();
    let invoice_number = created["data"]["invoice_number"].as_str().unwrap().to_string();
    let original_ncf = created["data"]["ncf"].as_str().unwrap().to_string();

    assert_eq!(app.product_stock(first).await, d!(16));
    assert_eq!(app.product_stock(second).await, d!(28));

    // Replace the two lines with a single heavier line of the first product.
    let (status, updated) = app
        .put_json(
            &format!("/invoices/{}", invoice_id),
            &json!({
                "client_id": client_id,
                "issue_date": "2025-03-11",
                "items": [
                    { "product_id": first, "quantity": "10", "unit_price": "25.00" }
                ]
            }),
        )
        .await;

    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(updated["success"], json!(true), "update: {}", updated);

    // Old effect reverted, new effect applied.
    assert_eq!(app.product_stock(first).await, d!(10));
    assert_eq!(app.product_stock(second).await, d!(30));

    // The fiscal identity never changes on edit.
    assert_eq!(
        updated["data"]["invoice_number"].as_str().unwrap(),
        invoice_number
    );
    assert_eq!(updated["data"]["ncf"].as_str().unwrap(), original_ncf);

    // No duplicate movements: one row per current item under the reference.
    let (_, movements) = app
        .get_json(&format!("/inventory/movements?reference={}", invoice_number))
        .await;
    assert_eq!(movements.as_array().unwrap().len(), 1);
    assert_eq!(dec(&movements.as_array().unwrap()[0]["quantity"]), d!(10));
}

#[tokio::test]
async fn create_then_delete_round_trips_stock() {
    let Some(app) = TestApp::spawn().await else { return };

    let client_id = app.create_test_client("Cliente Redondo").await;
    let product_id = app.create_test_product("Blocks", "40", "35.00").await;

    let invoice = app
        .create_simple_invoice(client_id, product_id, "15", "35.00")
        .await;
    let invoice_id = invoice["invoice_id"].as_str().unwrap();
    assert_eq!(app.product_stock(product_id).await, d!(25));

    let (status, body) = app.delete(&format!("/invoices/{}", invoice_id)).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["success"], json!(true));

    assert_eq!(app.product_stock(product_id).await, d!(40));

    // The audit trail for the deleted document is gone too.
    let (_, movements) = app
        .get_json("/inventory/movements?reference=FAC-000001")
        .await;
    assert_eq!(movements.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn delete_cascades_payments_and_credit_notes() {
    let Some(app) = TestApp::spawn().await else { return };

    let client_id = app.create_test_client("Cliente Cascada").await;
    let product_id = app.create_test_product("Lámina", "50", "100.00").await;

    let invoice = app
        .create_simple_invoice(client_id, product_id, "1", "100.00")
        .await;
    let invoice_id = invoice["invoice_id"].as_str().unwrap().to_string();

    // One payment of 50 and a credit note for part of the line.
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
    assert_eq!(payment["success"], json!(true), "payment: {}", payment);

    let (_, note) = app
        .post_json(
            "/credit-notes",
            &json!({
                "invoice_id": invoice_id,
                "reason": "Mercancía defectuosa",
                "issue_date": "2025-03-13",
                "items": [{ "product_id": product_id, "quantity": "0.5", "unit_price": "100.00" }]
            }),
        )
        .await;
    assert_eq!(note["success"], json!(true), "credit note: {}", note);

    // The credit note re-subtracted stock: 50 - 1 - 0.5.
    assert_eq!(app.product_stock(product_id).await, d!(48.5));

    let (status, body) = app.delete(&format!("/invoices/{}", invoice_id)).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["success"], json!(true), "delete: {}", body);

    // Both child documents are gone and stock reflects full reversal.
    let payments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payments")
        .fetch_one(&app.db)
        .await
        .unwrap();
    let notes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM credit_notes")
        .fetch_one(&app.db)
        .await
        .unwrap();
    assert_eq!(payments, 0);
    assert_eq!(notes, 0);
    assert_eq!(app.product_stock(product_id).await, d!(50));
}

#[tokio::test]
async fn sequence_reuses_slot_after_delete() {
    let Some(app) = TestApp::spawn().await else { return };

    let client_id = app.create_test_client("Cliente Resync").await;
    let product_id = app.create_test_product("Cable", "100", "10.00").await;

    let first = app
        .create_simple_invoice(client_id, product_id, "1", "10.00")
        .await;
    assert_eq!(first["invoice_number"], json!("FAC-000001"));

    let (_, body) = app
        .delete(&format!("/invoices/{}", first["invoice_id"].as_str().unwrap()))
        .await;
    assert_eq!(body["success"], json!(true));

    // The delete resynchronized the cursors, so the vacated number is
    // reissued instead of leaving a hole.
    let second = app
        .create_simple_invoice(client_id, product_id, "1", "10.00")
        .await;
    assert_eq!(second["invoice_number"], json!("FAC-000001"));
    assert_eq!(second["ncf"], json!("B0200000001"));
}

#[tokio::test]
async fn overdue_is_derived_at_read_time_only() {
    let Some(app) = TestApp::spawn().await else { return };

    let client_id = app.create_test_client("Cliente Atrasado").await;
    let product_id = app.create_test_product("Foco", "10", "5.00").await;

    let (_, body) = app
        .post_json(
            "/invoices",
            &json!({
                "client_id": client_id,
                "issue_date": "2020-01-10",
                "due_date": "2020-02-10",
                "items": [{ "product_id": product_id, "quantity": "1", "unit_price": "5.00" }]
            }),
        )
        .await;
    assert_eq!(body["success"], json!(true));

    let (_, invoices) = app.get_json("/invoices").await;
    let row = &invoices.as_array().unwrap()[0];
    // The stored status stays Pendiente; only the read path says Vencida.
    assert_eq!(row["status"], json!("Pendiente"));
    assert_eq!(row["display_status"], json!("Vencida"));
}

#[tokio::test]
async fn concurrent_creates_against_low_stock_let_exactly_one_through() {
    let Some(app) = TestApp::spawn().await else { return };

    let client_id = app.create_test_client("Cliente Carrera").await;
    let product_id = app.create_test_product("Inversor", "5", "900.00").await;

    let payload = json!({
        "client_id": client_id,
        "issue_date": "2025-03-10",
        "items": [{ "product_id": product_id, "quantity": "5", "unit_price": "900.00" }]
    });

    let (first, second) = tokio::join!(
        app.post_json("/invoices", &payload),
        app.post_json("/invoices", &payload)
    );

    let successes = [&first.1, &second.1]
        .iter()
        .filter(|body| body["success"] == json!(true))
        .count();
    assert_eq!(successes, 1, "one and only one create may win: {:?} / {:?}", first.1, second.1);

    let loser = if first.1["success"] == json!(true) {
        &second.1
    } else {
        &first.1
    };
    assert!(
        loser["message"].as_str().unwrap().contains("Insufficient stock"),
        "loser: {}",
        loser
    );

    // Never over-sold.
    assert_eq!(app.product_stock(product_id).await, d!(0));
}
