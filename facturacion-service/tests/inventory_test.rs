//! Stock ledger integration tests: manual adjustments and the movement
//! audit trail.

mod common;

use common::{dec, TestApp};
use rust_decimal_macros::dec as d;
use serde_json::json;

#[tokio::test]
async fn entrada_restocks_and_logs_a_movement() {
    let Some(app) = TestApp::spawn().await else { return };

    let product_id = app.create_test_product("Cemento", "10", "100.00").await;

    let (status, body) = app
        .post_json(
            "/inventory/adjustments",
            &json!({
                "product_id": product_id,
                "movement_type": "ENTRADA",
                "quantity": "25",
                "movement_date": "2025-03-10",
                "reference": "COMPRA-0099",
                "notes": "Reposición de almacén"
            }),
        )
        .await;

    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["success"], json!(true), "adjustment: {}", body);
    assert_eq!(app.product_stock(product_id).await, d!(35));

    let (_, movements) = app
        .get_json("/inventory/movements?reference=COMPRA-0099")
        .await;
    let movements = movements.as_array().unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0]["movement_type"], json!("ENTRADA"));
    assert_eq!(dec(&movements[0]["quantity"]), d!(25));
}

#[tokio::test]
async fn salida_validates_availability() {
    let Some(app) = TestApp::spawn().await else { return };

    let product_id = app.create_test_product("Yeso", "3", "40.00").await;

    let (status, body) = app
        .post_json(
            "/inventory/adjustments",
            &json!({
                "product_id": product_id,
                "movement_type": "SALIDA",
                "quantity": "5",
                "movement_date": "2025-03-10"
            }),
        )
        .await;

    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["success"], json!(false));
    assert!(body["message"].as_str().unwrap().contains("Yeso"));
    assert_eq!(app.product_stock(product_id).await, d!(3));
}

#[tokio::test]
async fn ajuste_sets_the_absolute_count() {
    let Some(app) = TestApp::spawn().await else { return };

    let product_id = app.create_test_product("Clavos", "17", "2.00").await;

    let (_, body) = app
        .post_json(
            "/inventory/adjustments",
            &json!({
                "product_id": product_id,
                "movement_type": "AJUSTE",
                "quantity": "12",
                "movement_date": "2025-03-10",
                "notes": "Conteo físico"
            }),
        )
        .await;

    assert_eq!(body["success"], json!(true), "adjustment: {}", body);
    assert_eq!(app.product_stock(product_id).await, d!(12));

    // The movement records the signed delta of the correction.
    assert_eq!(dec(&body["data"]["quantity"]), d!(-5));
}

#[tokio::test]
async fn movements_filter_by_product() {
    let Some(app) = TestApp::spawn().await else { return };

    let first = app.create_test_product("Tubo", "10", "15.00").await;
    let second = app.create_test_product("Codo", "10", "5.00").await;

    for product in [first, second] {
        let (_, body) = app
            .post_json(
                "/inventory/adjustments",
                &json!({
                    "product_id": product,
                    "movement_type": "ENTRADA",
                    "quantity": "1",
                    "movement_date": "2025-03-10"
                }),
            )
            .await;
        assert_eq!(body["success"], json!(true));
    }

    let (_, movements) = app
        .get_json(&format!("/inventory/movements?product_id={}", first))
        .await;
    let movements = movements.as_array().unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0]["product_name"], json!("Tubo"));
}

#[tokio::test]
async fn low_stock_listing_uses_minimum_threshold() {
    let Some(app) = TestApp::spawn().await else { return };

    let low = app.create_test_product("Soldadura", "10", "8.00").await;
    app.create_test_product("Guantes", "10", "3.00").await;

    // Raise the threshold above current stock for one product only.
    let (status, _) = app
        .put_json(
            &format!("/products/{}", low),
            &json!({ "min_stock": "15" }),
        )
        .await;
    assert_eq!(status, reqwest::StatusCode::OK);

    let (_, body) = app.get_json("/products/low-stock").await;
    let products = body.as_array().unwrap();
    assert_eq!(products.len(), 1);
    assert_eq!(products[0]["name"], json!("Soldadura"));
}
