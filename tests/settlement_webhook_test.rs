//! Payment notifications: signature checks, terminal-state handling and
//! once-only stock reconciliation under concurrent settlements.

mod common;

use std::time::Duration;

use axum::http::{Method, StatusCode};
use common::{signed_notification, wait_until, TestApp};
use sea_orm::EntityTrait;
use serde_json::json;
use storefront_checkout::entities::log_entry;

#[tokio::test]
async fn forged_signature_is_rejected_and_order_untouched() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let address = app.seed_address(customer).await;
    let product = app.seed_product("Kopi Toraja", 10_000, 5).await;
    let order_id = app.seed_order(customer, address, product, 2, "pending").await;

    let mut body = signed_notification(order_id, "settlement", 29_000, None);
    body["gross_amount"] = json!("1.00");
    let response = app
        .request(Method::POST, "/api/v1/payments/notification", Some(body), None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let order = app.order(order_id).await;
    assert!(!order.is_paid);
    assert_eq!(order.transaction_status, "pending");
    assert_eq!(app.stock(product).await, 5);
}

#[tokio::test]
async fn malformed_notification_is_a_bad_request() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/notification",
            Some(json!({"transaction_status": "settlement"})),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_order_is_acknowledged() {
    let app = TestApp::new().await;
    let response = app.notify(4242, "settlement", 10_000).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn redelivered_settlement_deducts_stock_once() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let address = app.seed_address(customer).await;
    let product = app.seed_product("Madu Hutan", 10_000, 5).await;
    let order_id = app.seed_order(customer, address, product, 2, "pending").await;

    assert_eq!(app.notify(order_id, "settlement", 29_000).await.status(), StatusCode::OK);
    let a = &app;
    wait_until(move || async move { a.order(order_id).await.stock_reconciled }).await;

    assert_eq!(app.notify(order_id, "settlement", 29_000).await.status(), StatusCode::OK);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(app.stock(product).await, 3);
    let order = app.order(order_id).await;
    assert!(order.is_paid);
    assert!(!order.need_refund);
}

#[tokio::test]
async fn late_expiry_does_not_reopen_a_paid_order() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let address = app.seed_address(customer).await;
    let product = app.seed_product("Rendang Kaleng", 10_000, 5).await;
    let order_id = app.seed_order(customer, address, product, 1, "pending").await;

    app.notify(order_id, "settlement", 19_000).await;
    let a = &app;
    wait_until(move || async move { a.order(order_id).await.stock_reconciled }).await;

    let response = app.notify(order_id, "expire", 19_000).await;
    assert_eq!(response.status(), StatusCode::OK);

    let order = app.order(order_id).await;
    assert!(order.is_paid);
    assert!(!order.is_cancelled);
    assert_eq!(order.transaction_status, "settlement");
}

#[tokio::test]
async fn challenged_capture_waits_for_the_fraud_decision() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let address = app.seed_address(customer).await;
    let product = app.seed_product("Batik Tulis", 10_000, 5).await;
    let order_id = app.seed_order(customer, address, product, 1, "pending").await;

    let challenged = signed_notification(order_id, "capture", 19_000, Some("challenge"));
    let response = app
        .request(Method::POST, "/api/v1/payments/notification", Some(challenged), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let order = app.order(order_id).await;
    assert_eq!(order.transaction_status, "capture");
    assert!(!order.is_paid);

    app.notify(order_id, "deny", 19_000).await;
    let order = app.order(order_id).await;
    assert!(order.is_cancelled);
    assert!(!order.is_paid);
    assert_eq!(order.transaction_status, "deny");
    assert_eq!(app.stock(product).await, 5);
}

#[tokio::test]
async fn payment_for_a_voided_order_is_flagged_for_refund() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let address = app.seed_address(customer).await;
    let product = app.seed_product("Songket", 10_000, 5).await;
    let order_id = app.seed_order(customer, address, product, 1, "pending").await;

    app.notify(order_id, "expire", 19_000).await;
    let response = app.notify(order_id, "settlement", 19_000).await;
    assert_eq!(response.status(), StatusCode::OK);

    let order = app.order(order_id).await;
    assert!(order.is_cancelled);
    assert!(!order.is_paid);
    assert_eq!(order.transaction_status, "expire");

    let a = &app;
    wait_until(move || async move {
        log_entry::Entity::find()
            .all(&*a.db)
            .await
            .unwrap()
            .iter()
            .any(|entry| entry.info.contains("refund required"))
    })
    .await;
    assert_eq!(app.stock(product).await, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_settlements_never_oversell() {
    let app = TestApp::new().await;
    let product = app.seed_product("Kain Ulos", 10_000, 4).await;

    let first_customer = app.seed_customer().await;
    let first_address = app.seed_address(first_customer).await;
    let second_customer = app.seed_customer().await;
    let second_address = app.seed_address(second_customer).await;
    let first = app
        .seed_order(first_customer, first_address, product, 3, "pending")
        .await;
    let second = app
        .seed_order(second_customer, second_address, product, 3, "pending")
        .await;

    let (a, b) = tokio::join!(
        app.notify(first, "settlement", 39_000),
        app.notify(second, "settlement", 39_000),
    );
    assert_eq!(a.status(), StatusCode::OK);
    assert_eq!(b.status(), StatusCode::OK);

    let handle = &app;
    wait_until(move || async move {
        handle.order(first).await.stock_reconciled && handle.order(second).await.stock_reconciled
    })
    .await;

    let orders = [app.order(first).await, app.order(second).await];
    let refunded: Vec<_> = orders.iter().filter(|o| o.need_refund).collect();
    assert_eq!(refunded.len(), 1);
    assert_eq!(refunded[0].transaction_status, "deny");
    assert_eq!(refunded[0].status_description, "insufficient stock for Seeded product");
    assert_eq!(app.stock(product).await, 1);
}

#[tokio::test]
async fn refund_after_settlement_is_mirrored_without_reopening() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let address = app.seed_address(customer).await;
    let product = app.seed_product("Tenun Ikat", 10_000, 5).await;
    let order_id = app.seed_order(customer, address, product, 1, "pending").await;

    app.notify(order_id, "settlement", 19_000).await;
    let a = &app;
    wait_until(move || async move { a.order(order_id).await.stock_reconciled }).await;

    let response = app.notify(order_id, "refund", 19_000).await;
    assert_eq!(response.status(), StatusCode::OK);

    let order = app.order(order_id).await;
    assert_eq!(order.transaction_status, "refund");
    assert!(order.is_paid);
    assert!(!order.is_cancelled);
    assert_eq!(app.stock(product).await, 4);

    // A late lifecycle status is still refused after the mirror.
    app.notify(order_id, "expire", 19_000).await;
    let order = app.order(order_id).await;
    assert_eq!(order.transaction_status, "refund");
    assert!(!order.is_cancelled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_settlements_deduct_once() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let address = app.seed_address(customer).await;
    let product = app.seed_product("Kopi Gayo", 10_000, 5).await;
    let order_id = app.seed_order(customer, address, product, 2, "pending").await;

    let (a, b, c) = tokio::join!(
        app.notify(order_id, "settlement", 29_000),
        app.notify(order_id, "settlement", 29_000),
        app.notify(order_id, "settlement", 29_000),
    );
    assert_eq!(a.status(), StatusCode::OK);
    assert_eq!(b.status(), StatusCode::OK);
    assert_eq!(c.status(), StatusCode::OK);

    let handle = &app;
    wait_until(move || async move { handle.order(order_id).await.stock_reconciled }).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(app.stock(product).await, 3);
    let order = app.order(order_id).await;
    assert!(order.is_paid);
    assert!(!order.need_refund);
    assert_eq!(order.transaction_status, "settlement");
}
