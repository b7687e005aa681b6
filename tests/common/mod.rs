#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use serde_json::{json, Value};
use storefront_checkout::{
    app_router,
    auth::{AuthConfig, AuthService},
    cache::{CacheBackend, InMemoryCache},
    config::AppConfig,
    db,
    entities::{
        cart_item, customer, customer_address, inventory, order, order_item, product,
        shipping_area,
    },
    handlers::AppServices,
    services::{
        freight::{CartShipment, FreightError, FreightQuoter, ProductShipment, RateTable, ServiceRate},
        payment_gateway::{
            notification_signature, GatewayError, PaymentGateway, PaymentIntent, SnapRequest,
        },
    },
    AppState,
};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

pub const SERVER_KEY: &str = "SB-test-server-key";
pub const ORDER_PREFIX: &str = "storefront";
pub const AREA_ID: i32 = 7;

/// Courier-rate service stand-in with call counters.
pub struct FakeFreight {
    table: Mutex<RateTable>,
    no_route: AtomicBool,
    pub cart_calls: AtomicUsize,
    pub product_calls: AtomicUsize,
    pub last_cart_shipment: Mutex<Option<CartShipment>>,
}

impl FakeFreight {
    fn new() -> Self {
        Self {
            table: Mutex::new(RateTable {
                anteraja: vec![ServiceRate {
                    product_code: "REG".into(),
                    product_name: "Regular".into(),
                    etd: "2-3".into(),
                    rates: 9000,
                }],
                sicepat: vec![ServiceRate {
                    product_code: "BEST".into(),
                    product_name: "Besok Sampai".into(),
                    etd: "1".into(),
                    rates: 15000,
                }],
            }),
            no_route: AtomicBool::new(false),
            cart_calls: AtomicUsize::new(0),
            product_calls: AtomicUsize::new(0),
            last_cart_shipment: Mutex::new(None),
        }
    }

    pub fn set_no_route(&self, value: bool) {
        self.no_route.store(value, Ordering::SeqCst);
    }

    fn answer(&self) -> Result<RateTable, FreightError> {
        if self.no_route.load(Ordering::SeqCst) {
            return Err(FreightError::NoRoute);
        }
        Ok(self.table.lock().unwrap().clone())
    }
}

#[async_trait]
impl FreightQuoter for FakeFreight {
    async fn quote_cart(&self, shipment: &CartShipment) -> Result<RateTable, FreightError> {
        self.cart_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_cart_shipment.lock().unwrap() = Some(shipment.clone());
        self.answer()
    }

    async fn quote_product(&self, _shipment: &ProductShipment) -> Result<RateTable, FreightError> {
        self.product_calls.fetch_add(1, Ordering::SeqCst);
        self.answer()
    }
}

/// Payment gateway stand-in with call counters and failure switches.
pub struct FakeGateway {
    fail_create: AtomicBool,
    fail_cancel: AtomicBool,
    pub create_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
    pub last_request: Mutex<Option<SnapRequest>>,
}

impl FakeGateway {
    fn new() -> Self {
        Self {
            fail_create: AtomicBool::new(false),
            fail_cancel: AtomicBool::new(false),
            create_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn fail_create(&self, value: bool) {
        self.fail_create.store(value, Ordering::SeqCst);
    }

    pub fn fail_cancel(&self, value: bool) {
        self.fail_cancel.store(value, Ordering::SeqCst);
    }

    pub fn creates(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_intent(&self, request: &SnapRequest) -> Result<PaymentIntent, GatewayError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                status: 500,
                messages: vec!["sandbox unavailable".into()],
            });
        }
        let reference = &request.transaction_details.order_id;
        Ok(PaymentIntent {
            token: format!("tok-{}", reference),
            redirect_url: format!("https://pay.example.test/{}", reference),
        })
    }

    async fn cancel_transaction(&self, _order_ref: &str) -> Result<(), GatewayError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(GatewayError::CancelRefused {
                status_code: "404".into(),
                status_message: "Transaction doesn't exist.".into(),
            });
        }
        Ok(())
    }
}

/// Application over a file-backed SQLite database with fake remote services.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub db: Arc<DatabaseConnection>,
    pub cache: Arc<InMemoryCache>,
    pub freight: Arc<FakeFreight>,
    pub gateway: Arc<FakeGateway>,
    auth: Arc<AuthService>,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("storefront.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "redis://127.0.0.1:6379".to_string(),
            "test_secret_key_for_testing_purposes_only_32chars".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 5;
        cfg.db_min_connections = 1;
        cfg.payment.server_key = SERVER_KEY.to_string();
        cfg.payment.order_id_prefix = ORDER_PREFIX.to_string();

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let cache = Arc::new(InMemoryCache::new());
        let freight = Arc::new(FakeFreight::new());
        let gateway = Arc::new(FakeGateway::new());
        let auth = Arc::new(AuthService::new(AuthConfig::from_app_config(&cfg)));

        let services = AppServices::new(
            db_arc.clone(),
            cache.clone() as Arc<dyn CacheBackend>,
            freight.clone(),
            gateway.clone(),
            &cfg,
        );

        let state = AppState {
            db: db_arc.clone(),
            config: Arc::new(cfg),
            services,
            cache: cache.clone(),
            auth: auth.clone(),
        };

        Self {
            router: app_router(state.clone()),
            state,
            db: db_arc,
            cache,
            freight,
            gateway,
            auth,
            _dir: dir,
        }
    }

    pub fn token_for(&self, customer_id: Uuid) -> String {
        self.auth.issue_token(customer_id).expect("issue token")
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Authenticated request as `customer_id`.
    pub async fn request_as(
        &self,
        customer_id: Uuid,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> Response {
        let token = self.token_for(customer_id);
        self.request(method, uri, body, Some(&token)).await
    }

    /// Posts a notification the way the gateway does, signed with the
    /// configured server key.
    pub async fn notify(&self, order_id: i64, status: &str, gross_amount: i64) -> Response {
        let body = signed_notification(order_id, status, gross_amount, None);
        self.request(Method::POST, "/api/v1/payments/notification", Some(body), None)
            .await
    }

    pub async fn seed_area(&self) {
        if shipping_area::Entity::find_by_id(AREA_ID)
            .one(&*self.db)
            .await
            .unwrap()
            .is_some()
        {
            return;
        }
        shipping_area::ActiveModel {
            id: Set(AREA_ID),
            full_name: Set("Bandung, Jawa Barat".into()),
        }
        .insert(&*self.db)
        .await
        .expect("seed shipping area");
    }

    pub async fn seed_customer(&self) -> Uuid {
        let id = Uuid::new_v4();
        customer::ActiveModel {
            id: Set(id),
            first_name: Set("Sari".into()),
            last_name: Set("Wulandari".into()),
            email: Set(format!("{}@example.test", id.simple())),
            phone_number: Set(Some("081234567890".into())),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("seed customer");
        id
    }

    pub async fn seed_address(&self, customer_id: Uuid) -> Uuid {
        self.seed_area().await;
        let id = Uuid::new_v4();
        customer_address::ActiveModel {
            id: Set(id),
            customer_id: Set(customer_id),
            recipient_name: Set("Sari Wulandari".into()),
            phone_number: Set("081234567890".into()),
            full_address: Set("Jl. Braga No. 12".into()),
            shipping_area_id: Set(AREA_ID),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("seed address");
        id
    }

    /// Product of 0.5 kg and 10x10x10 cm with the given price and stock.
    pub async fn seed_product(&self, name: &str, price: i64, stock: i32) -> Uuid {
        let id = Uuid::new_v4();
        product::ActiveModel {
            id: Set(id),
            name: Set(name.into()),
            description: Set(format!("{} description", name)),
            price: Set(price),
            weight: Set(dec!(0.5)),
            length: Set(dec!(10)),
            width: Set(dec!(10)),
            height: Set(dec!(10)),
            deleted_at: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("seed product");
        inventory::ActiveModel {
            product_id: Set(id),
            quantity: Set(stock),
        }
        .insert(&*self.db)
        .await
        .expect("seed inventory");
        id
    }

    pub async fn seed_cart_line(&self, customer_id: Uuid, product_id: Uuid, quantity: i32, checked: bool) {
        cart_item::ActiveModel {
            customer_id: Set(customer_id),
            product_id: Set(product_id),
            quantity: Set(quantity),
            checked: Set(checked),
            updated_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("seed cart line");
    }

    /// Order with one line, written directly to the store.
    pub async fn seed_order(
        &self,
        customer_id: Uuid,
        address_id: Uuid,
        product_id: Uuid,
        quantity: i32,
        transaction_status: &str,
    ) -> i64 {
        let now = Utc::now();
        let order = order::ActiveModel {
            customer_id: Set(customer_id),
            address_id: Set(address_id),
            courier_code: Set("anteraja-REG".into()),
            freight_cost: Set(9000),
            item_cost: Set(10_000 * i64::from(quantity)),
            gross_amount: Set(10_000 * i64::from(quantity) + 9000),
            payment_token: Set(Some("tok".into())),
            payment_redirect_url: Set(Some("https://pay.example.test/tok".into())),
            transaction_status: Set(transaction_status.into()),
            payment_type: Set(String::new()),
            status_description: Set(String::new()),
            is_paid: Set(false),
            is_cancelled: Set(false),
            need_refund: Set(false),
            stock_reconciled: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .expect("seed order");

        order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(product_id),
            on_buy_name: Set("Seeded product".into()),
            on_buy_description: Set(String::new()),
            on_buy_price: Set(10_000),
            on_buy_weight: Set(Decimal::ONE),
            quantity: Set(quantity),
        }
        .insert(&*self.db)
        .await
        .expect("seed order item");
        order.id
    }

    pub async fn order(&self, order_id: i64) -> order::Model {
        order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .unwrap()
            .expect("order exists")
    }

    pub async fn stock(&self, product_id: Uuid) -> i32 {
        inventory::Entity::find_by_id(product_id)
            .one(&*self.db)
            .await
            .unwrap()
            .expect("inventory row exists")
            .quantity
    }

    pub async fn orders_of(&self, customer_id: Uuid) -> Vec<order::Model> {
        use sea_orm::{ColumnTrait, QueryFilter};
        order::Entity::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .all(&*self.db)
            .await
            .unwrap()
    }

    pub async fn cart_lines(&self, customer_id: Uuid) -> Vec<cart_item::Model> {
        use sea_orm::{ColumnTrait, QueryFilter};
        cart_item::Entity::find()
            .filter(cart_item::Column::CustomerId.eq(customer_id))
            .all(&*self.db)
            .await
            .unwrap()
    }
}

pub fn signed_notification(
    order_id: i64,
    status: &str,
    gross_amount: i64,
    fraud_status: Option<&str>,
) -> Value {
    let reference = format!("{}-{}", ORDER_PREFIX, order_id);
    let gross = format!("{}.00", gross_amount);
    let signature = notification_signature(&reference, "200", &gross, SERVER_KEY);
    let mut body = json!({
        "transaction_status": status,
        "status_code": "200",
        "signature_key": signature,
        "order_id": reference,
        "gross_amount": gross,
        "payment_type": "bank_transfer",
    });
    if let Some(fraud) = fraud_status {
        body["fraud_status"] = json!(fraud);
    }
    body
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Polls `check` until it holds; background work after a response is
/// not awaited by the handler.
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
