use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, DatabaseBackend as DbBackend, Set, Statement,
};
use serde_json::Value;
use storefront_api::{
    config::AppConfig,
    db::{self, DbConfig},
    entities::{discount, product_variant},
    errors::ServiceError,
    events::EventSender,
    gateway::{
        PaymentDetail, PaymentGateway, PreapprovalDetail, PreferenceHandle, PreferenceRequest,
    },
    handlers::AppServices,
    services::NotificationService,
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

/// Programmable stand-in for the payment gateway. Tests register payment and
/// preapproval details up front; reconciliation then fetches them exactly as
/// it would from the real gateway.
#[derive(Default)]
pub struct MockGateway {
    pub payments: Mutex<HashMap<String, PaymentDetail>>,
    pub preapprovals: Mutex<HashMap<String, PreapprovalDetail>>,
    pub preference_requests: Mutex<Vec<PreferenceRequest>>,
    pub fail_preference: AtomicBool,
}

impl MockGateway {
    pub fn set_payment(&self, detail: PaymentDetail) {
        self.payments
            .lock()
            .unwrap()
            .insert(detail.id.clone(), detail);
    }

    pub fn set_preapproval(&self, detail: PreapprovalDetail) {
        self.preapprovals
            .lock()
            .unwrap()
            .insert(detail.id.clone(), detail);
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_preference(
        &self,
        request: &PreferenceRequest,
    ) -> Result<PreferenceHandle, ServiceError> {
        if self.fail_preference.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalServiceError(
                "preference creation refused".to_string(),
            ));
        }
        self.preference_requests
            .lock()
            .unwrap()
            .push(request.clone());
        Ok(PreferenceHandle {
            preference_id: format!("pref-{}", request.external_reference),
            redirect_url: format!(
                "https://gateway.test/checkout/{}",
                request.external_reference
            ),
        })
    }

    async fn get_payment(&self, payment_id: &str) -> Result<PaymentDetail, ServiceError> {
        self.payments
            .lock()
            .unwrap()
            .get(payment_id)
            .cloned()
            .ok_or_else(|| {
                ServiceError::ExternalServiceError(format!("payment {} not found", payment_id))
            })
    }

    async fn get_preapproval(
        &self,
        preapproval_id: &str,
    ) -> Result<PreapprovalDetail, ServiceError> {
        self.preapprovals
            .lock()
            .unwrap()
            .get(preapproval_id)
            .cloned()
            .ok_or_else(|| {
                ServiceError::ExternalServiceError(format!(
                    "preapproval {} not found",
                    preapproval_id
                ))
            })
    }
}

const BOOTSTRAP_SQL: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS customers (
        id TEXT PRIMARY KEY NOT NULL,
        email TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        phone TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT
    );"#,
    r#"CREATE TABLE IF NOT EXISTS customer_addresses (
        id TEXT PRIMARY KEY NOT NULL,
        customer_id TEXT NOT NULL,
        street TEXT NOT NULL,
        city TEXT NOT NULL,
        province TEXT NOT NULL,
        postal_code TEXT NOT NULL,
        country TEXT NOT NULL,
        created_at TEXT NOT NULL
    );"#,
    r#"CREATE TABLE IF NOT EXISTS product_variants (
        id TEXT PRIMARY KEY NOT NULL,
        sku TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        price REAL NOT NULL,
        stock INTEGER NOT NULL,
        in_stock INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT
    );"#,
    r#"CREATE TABLE IF NOT EXISTS discounts (
        id TEXT PRIMARY KEY NOT NULL,
        code TEXT NOT NULL UNIQUE,
        description TEXT,
        discount_type TEXT NOT NULL,
        value REAL NOT NULL,
        min_purchase REAL,
        max_uses INTEGER,
        used_count INTEGER NOT NULL,
        starts_at TEXT,
        ends_at TEXT,
        active INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT
    );"#,
    r#"CREATE TABLE IF NOT EXISTS orders (
        id TEXT PRIMARY KEY NOT NULL,
        order_number TEXT NOT NULL UNIQUE,
        customer_id TEXT NOT NULL,
        status TEXT NOT NULL,
        payment_status TEXT NOT NULL,
        payment_method TEXT NOT NULL,
        subtotal REAL NOT NULL,
        shipping_cost REAL NOT NULL,
        discount_amount REAL NOT NULL,
        total REAL NOT NULL,
        discount_code TEXT,
        notes TEXT,
        gateway_payment_id TEXT,
        gateway_preference_id TEXT,
        shipping_address_id TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT,
        version INTEGER NOT NULL
    );"#,
    r#"CREATE TABLE IF NOT EXISTS order_items (
        id TEXT PRIMARY KEY NOT NULL,
        order_id TEXT NOT NULL,
        variant_id TEXT NOT NULL,
        name TEXT NOT NULL,
        unit_price REAL NOT NULL,
        quantity INTEGER NOT NULL,
        line_total REAL NOT NULL,
        created_at TEXT NOT NULL
    );"#,
    r#"CREATE TABLE IF NOT EXISTS subscriptions (
        id TEXT PRIMARY KEY NOT NULL,
        customer_id TEXT NOT NULL,
        plan TEXT NOT NULL,
        billing_cycle TEXT NOT NULL,
        status TEXT NOT NULL,
        price REAL NOT NULL,
        preapproval_id TEXT,
        external_reference TEXT NOT NULL UNIQUE,
        next_payment_date TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT
    );"#,
];

/// Test harness: in-process router backed by a throwaway SQLite database and
/// a [`MockGateway`].
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<MockGateway>,
    db_file: String,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::build(None).await
    }

    /// Harness with webhook signature verification enabled.
    pub async fn with_webhook_secret(secret: &str) -> Self {
        Self::build(Some(secret.to_string())).await
    }

    async fn build(webhook_secret: Option<String>) -> Self {
        let db_file = format!("storefront_test_{}.db", Uuid::new_v4().simple());
        let _ = std::fs::remove_file(&db_file);

        let mut cfg = AppConfig::new(
            format!("sqlite://{db_file}?mode=rwc"),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
            "https://gateway.test".to_string(),
            "test-token".to_string(),
        );
        cfg.webhook_secret = webhook_secret;
        cfg.checkout_return_url = Some("https://shop.test/checkout/result".to_string());

        let pool = db::establish_connection_with_config(&DbConfig {
            url: cfg.database_url.clone(),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            acquire_timeout: Duration::from_secs(5),
        })
        .await
        .expect("failed to create test database");

        for sql in BOOTSTRAP_SQL {
            pool.execute(Statement::from_string(DbBackend::Sqlite, (*sql).to_string()))
                .await
                .expect("bootstrap test schema");
        }

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(storefront_api::events::process_events(
            event_rx,
            Arc::new(NotificationService::new(None)),
        ));

        let gateway = Arc::new(MockGateway::default());
        let services = AppServices::new(
            db_arc.clone(),
            gateway.clone(),
            event_sender.clone(),
            cfg.checkout_return_url.clone(),
        );

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        let router = storefront_api::app_router(state.clone());

        Self {
            router,
            state,
            gateway,
            db_file,
            _event_task: event_task,
        }
    }

    /// Send a JSON request against the router.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request_with_headers(method, uri, body, &[]).await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("serialize request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn seed_variant(
        &self,
        sku: &str,
        price: Decimal,
        stock: i32,
    ) -> product_variant::Model {
        product_variant::ActiveModel {
            id: Set(Uuid::new_v4()),
            sku: Set(sku.to_string()),
            name: Set(format!("Variant {}", sku)),
            price: Set(price),
            stock: Set(stock),
            in_stock: Set(stock > 0),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product variant")
    }

    pub async fn seed_discount(&self, model: discount::ActiveModel) -> discount::Model {
        model.insert(&*self.state.db).await.expect("seed discount")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
        let _ = std::fs::remove_file(&self.db_file);
    }
}

/// Read a response body as JSON.
pub async fn response_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response body")
}

#[allow(dead_code)]
pub fn assert_status(response: &axum::response::Response, expected: StatusCode) {
    assert_eq!(response.status(), expected);
}
