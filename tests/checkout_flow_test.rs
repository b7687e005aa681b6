//! End-to-end checkout: cart selection, freight quote, order placement,
//! payment settlement and the stock deduction that follows it.

mod common;

use axum::http::{Method, StatusCode};
use common::{response_json, wait_until, TestApp, AREA_ID};
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use serde_json::json;
use storefront_checkout::entities::{log_entry, order_item};

#[tokio::test]
async fn checkout_then_settlement_deducts_stock() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let address = app.seed_address(customer).await;
    let product = app.seed_product("Kopi Arabika 250g", 10_000, 5).await;

    let added = app
        .request_as(
            customer,
            Method::POST,
            "/api/v1/cart",
            Some(json!({"product_id": product, "quantity": 2})),
        )
        .await;
    assert_eq!(added.status(), StatusCode::CREATED);

    let checked = app
        .request_as(
            customer,
            Method::PATCH,
            "/api/v1/cart/check",
            Some(json!({"product_id": product, "state": true})),
        )
        .await;
    assert_eq!(checked.status(), StatusCode::NO_CONTENT);

    let items = app
        .request_as(customer, Method::GET, "/api/v1/checkout/items", None)
        .await;
    assert_eq!(items.status(), StatusCode::OK);
    let items = response_json(items).await;
    assert_eq!(items["data"][0]["quantity"], 2);
    assert_eq!(items["data"][0]["price"], 10_000);

    let freight = app
        .request_as(
            customer,
            Method::GET,
            &format!("/api/v1/checkout/freight?address_id={}", address),
            None,
        )
        .await;
    assert_eq!(freight.status(), StatusCode::OK);
    let freight = response_json(freight).await;
    let options = freight["data"].as_array().unwrap();
    let regular = options
        .iter()
        .find(|o| o["product_code"] == "anteraja-REG")
        .expect("anteraja regular offered");
    assert_eq!(regular["rates"], 9000);

    {
        let shipment = app.freight.last_cart_shipment.lock().unwrap().clone().unwrap();
        assert_eq!(shipment.area_id, AREA_ID);
        assert_eq!(shipment.weight, dec!(1.0));
        assert_eq!(shipment.volume, dec!(2000));
    }

    let placed = app
        .request_as(
            customer,
            Method::POST,
            "/api/v1/checkout",
            Some(json!({"courier_code": "anteraja-REG", "address_id": address})),
        )
        .await;
    assert_eq!(placed.status(), StatusCode::OK);
    let placed = response_json(placed).await;

    let orders = app.orders_of(customer).await;
    assert_eq!(orders.len(), 1);
    let order = &orders[0];
    assert_eq!(order.item_cost, 20_000);
    assert_eq!(order.freight_cost, 9000);
    assert_eq!(order.gross_amount, 29_000);
    assert_eq!(order.courier_code, "anteraja-REG");
    assert_eq!(order.transaction_status, "");
    assert_eq!(
        placed["data"]["token"],
        format!("tok-storefront-{}", order.id)
    );

    {
        let request = app.gateway.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.transaction_details.gross_amount, 29_000);
        assert_eq!(
            request.transaction_details.order_id,
            format!("storefront-{}", order.id)
        );
        assert_eq!(request.item_details.len(), 2);
        let freight_item = request.item_details.last().unwrap();
        assert_eq!(freight_item.name, "anteraja-REG");
        assert_eq!(freight_item.price, 9000);
        assert_eq!(request.customer_details.first_name, "Sari");
    }

    let order_id = order.id;
    let a = &app;
    wait_until(move || async move {
        a.cart_lines(customer).await.is_empty() && a.order(order_id).await.payment_token.is_some()
    })
    .await;

    let detail = response_json(
        app.request_as(customer, Method::GET, &format!("/api/v1/orders/{}", order_id), None)
            .await,
    )
    .await;
    assert_eq!(
        detail["data"]["payment_redirect_url"],
        format!("https://pay.example.test/storefront-{}", order_id)
    );
    assert_eq!(detail["data"]["items"][0]["name"], "Kopi Arabika 250g");

    let notified = app.notify(order_id, "settlement", 29_000).await;
    assert_eq!(notified.status(), StatusCode::OK);

    wait_until(move || async move { a.order(order_id).await.stock_reconciled }).await;
    let settled = app.order(order_id).await;
    assert!(settled.is_paid);
    assert!(!settled.need_refund);
    assert_eq!(settled.transaction_status, "settlement");
    assert_eq!(settled.payment_type, "bank_transfer");
    assert_eq!(app.stock(product).await, 3);
}

#[tokio::test]
async fn gateway_failure_leaves_no_order_and_keeps_cart() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let address = app.seed_address(customer).await;
    let product = app.seed_product("Teh Melati", 12_500, 10).await;
    app.seed_cart_line(customer, product, 1, true).await;
    app.gateway.fail_create(true);

    let response = app
        .request_as(
            customer,
            Method::POST,
            "/api/v1/checkout",
            Some(json!({"courier_code": "sicepat-BEST", "address_id": address})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = response_json(response).await;
    assert_eq!(body["message"], "Upstream service error");

    assert_eq!(app.gateway.creates(), 1);
    assert!(app.orders_of(customer).await.is_empty());
    assert!(order_item::Entity::find().all(&*app.db).await.unwrap().is_empty());

    let lines = app.cart_lines(customer).await;
    assert_eq!(lines.len(), 1);
    assert!(lines[0].checked);

    let a = &app;
    wait_until(move || async move {
        log_entry::Entity::find()
            .all(&*a.db)
            .await
            .unwrap()
            .iter()
            .any(|entry| entry.log_level == "ERROR" && entry.info.contains("checkout failed"))
    })
    .await;
}

#[tokio::test]
async fn unknown_courier_is_rejected_before_the_gateway() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let address = app.seed_address(customer).await;
    let product = app.seed_product("Gula Aren", 8_000, 10).await;
    app.seed_cart_line(customer, product, 1, true).await;

    let response = app
        .request_as(
            customer,
            Method::POST,
            "/api/v1/checkout",
            Some(json!({"courier_code": "jne-YES", "address_id": address})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = response_json(response).await;
    assert_eq!(body["message"], "invalid courier code");

    assert_eq!(app.gateway.creates(), 0);
    assert!(app.orders_of(customer).await.is_empty());
}

#[tokio::test]
async fn missing_address_outranks_empty_cart() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let stranger = app.seed_customer().await;
    let strangers_address = app.seed_address(stranger).await;

    let response = app
        .request_as(
            customer,
            Method::GET,
            &format!("/api/v1/checkout/freight?address_id={}", strangers_address),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response_json(response).await["message"], "address not found");

    let response = app
        .request_as(
            customer,
            Method::POST,
            "/api/v1/checkout",
            Some(json!({"courier_code": "anteraja-REG", "address_id": strangers_address})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response_json(response).await["message"], "address not found");
    assert_eq!(app.freight.cart_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn nothing_checked_is_a_conflict() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let address = app.seed_address(customer).await;
    let product = app.seed_product("Keripik Singkong", 6_000, 10).await;
    app.seed_cart_line(customer, product, 2, false).await;

    let response = app
        .request_as(
            customer,
            Method::GET,
            &format!("/api/v1/checkout/freight?address_id={}", address),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(
        response_json(response).await["message"],
        "you haven't selected any item in the cart"
    );

    let response = app
        .request_as(customer, Method::GET, "/api/v1/checkout/items", None)
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn lines_beyond_stock_are_left_out_of_the_order_but_cleared() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let address = app.seed_address(customer).await;
    let plenty = app.seed_product("Sambal Roa", 25_000, 10).await;
    let scarce = app.seed_product("Dodol Garut", 15_000, 1).await;
    app.seed_cart_line(customer, plenty, 1, true).await;
    app.seed_cart_line(customer, scarce, 3, true).await;
    let unchecked = app.seed_product("Bakpia Pathok", 20_000, 10).await;
    app.seed_cart_line(customer, unchecked, 1, false).await;

    let placed = app
        .request_as(
            customer,
            Method::POST,
            "/api/v1/checkout",
            Some(json!({"courier_code": "anteraja-REG", "address_code": address})),
        )
        .await;
    assert_eq!(placed.status(), StatusCode::OK);

    let orders = app.orders_of(customer).await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].item_cost, 25_000);
    assert_eq!(orders[0].gross_amount, 34_000);

    let items = order_item::Entity::find().all(&*app.db).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].product_id, plenty);

    // Every checked line leaves the cart, ordered or not; unchecked ones stay.
    let a = &app;
    wait_until(move || async move { a.cart_lines(customer).await.len() == 1 }).await;
    assert_eq!(app.cart_lines(customer).await[0].product_id, unchecked);
    assert!(!app.cart_lines(customer).await[0].checked);
}

#[tokio::test]
async fn unroutable_destination_is_not_found() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let address = app.seed_address(customer).await;
    let product = app.seed_product("Bika Ambon", 30_000, 4).await;
    app.seed_cart_line(customer, product, 1, true).await;
    app.freight.set_no_route(true);

    let response = app
        .request_as(
            customer,
            Method::GET,
            &format!("/api/v1/checkout/freight?address_id={}", address),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        response_json(response).await["message"],
        "there are no rates available for this route"
    );
}

#[tokio::test]
async fn checkout_requires_a_token() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({"courier_code": "anteraja-REG", "address_id": uuid::Uuid::new_v4()})),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
