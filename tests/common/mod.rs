#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use sea_orm::{DatabaseConnection, EntityTrait};
use serde_json::Value;
use storefront_checkout::{
    api_v1_routes,
    auth::{Claims, JwtVerifier},
    config::AppConfig,
    db::{self, DbConfig},
    entities::{order, voucher::DiscountType},
    errors::PaymentError,
    events::{self, EventSender},
    models::{CartLine, NewVoucher, ProductStock, Scope, Voucher},
    services::{
        payments::{ChargeReceipt, ChargeRequest, PaymentGateway},
        CheckoutSettings, OrderProcessor,
    },
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";
pub const SHIPPING_FEE: i64 = 30_000;

/// What the scripted gateway answers to a charge.
#[derive(Debug, Clone)]
pub enum ChargeOutcome {
    Approve,
    Decline(String),
    NoReference,
    Unavailable,
}

/// Payment provider double that records every call.
pub struct ScriptedGateway {
    outcome: Mutex<ChargeOutcome>,
    delay: Mutex<Option<Duration>>,
    issued: AtomicUsize,
    pub charges: Mutex<Vec<ChargeRequest>>,
    pub refunds: Mutex<Vec<(String, i64)>>,
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self {
            outcome: Mutex::new(ChargeOutcome::Approve),
            delay: Mutex::new(None),
            issued: AtomicUsize::new(0),
            charges: Mutex::new(Vec::new()),
            refunds: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedGateway {
    pub fn set_outcome(&self, outcome: ChargeOutcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn charges(&self) -> Vec<ChargeRequest> {
        self.charges.lock().unwrap().clone()
    }

    pub fn refunds(&self) -> Vec<(String, i64)> {
        self.refunds.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn charge(&self, request: ChargeRequest) -> Result<ChargeReceipt, PaymentError> {
        self.charges.lock().unwrap().push(request);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.outcome.lock().unwrap().clone();
        match outcome {
            ChargeOutcome::Approve => {
                let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(ChargeReceipt {
                    success: true,
                    reference: Some(format!("ch_{n}")),
                    message: None,
                })
            }
            ChargeOutcome::Decline(message) => Ok(ChargeReceipt {
                success: false,
                reference: None,
                message: Some(message),
            }),
            ChargeOutcome::NoReference => Ok(ChargeReceipt {
                success: true,
                reference: None,
                message: None,
            }),
            ChargeOutcome::Unavailable => Err(PaymentError::GatewayUnavailable("down".into())),
        }
    }

    async fn refund(&self, reference: &str, amount: i64) -> Result<(), PaymentError> {
        self.refunds
            .lock()
            .unwrap()
            .push((reference.to_string(), amount));
        Ok(())
    }
}

/// Fresh, migrated in-memory database. One connection, so every table lives
/// in the same SQLite memory instance.
pub async fn test_db() -> Arc<DatabaseConnection> {
    let pool = db::establish_connection_with_config(&DbConfig {
        url: "sqlite::memory:".into(),
        max_connections: 1,
        min_connections: 1,
        ..Default::default()
    })
    .await
    .expect("failed to open test database");
    db::run_migrations(&pool)
        .await
        .expect("failed to migrate test database");
    Arc::new(pool)
}

pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::new(
        "sqlite::memory:".to_string(),
        JWT_SECRET.to_string(),
        "test".to_string(),
    );
    cfg.shipping_fee = SHIPPING_FEE;
    cfg.free_shipping_threshold = None;
    cfg.trending_top_n = 3;
    cfg.payment_timeout_secs = 2;
    cfg
}

/// Application state over an in-memory database and a scripted gateway.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<ScriptedGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_payment_timeout(Duration::from_secs(2)).await
    }

    pub async fn with_payment_timeout(payment_timeout: Duration) -> Self {
        let cfg = test_config();
        let db = test_db().await;

        let (tx, rx) = mpsc::channel(cfg.event_channel_capacity);
        let event_task = tokio::spawn(events::process_events(rx));
        let event_sender = EventSender::new(tx);

        let gateway = Arc::new(ScriptedGateway::default());
        let mut settings = CheckoutSettings::from(&cfg);
        settings.payment_timeout = payment_timeout;

        let processor = OrderProcessor::new(
            db.clone(),
            gateway.clone(),
            event_sender,
            settings,
        );

        let state = AppState {
            db,
            verifier: Arc::new(JwtVerifier::from_config(&cfg)),
            processor: Arc::new(processor),
        };
        let router = Router::new()
            .nest("/api/v1", api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            gateway,
            _event_task: event_task,
        }
    }

    pub fn processor(&self) -> &OrderProcessor {
        &self.state.processor
    }

    pub async fn seed_product(&self, name: &str, category: &str, stock: i32) -> ProductStock {
        self.processor()
            .products()
            .insert(name, category, stock)
            .await
            .expect("failed to seed product")
    }

    pub async fn seed_voucher(&self, input: NewVoucher) -> Voucher {
        self.processor()
            .vouchers()
            .create(input)
            .await
            .expect("failed to seed voucher")
    }

    pub async fn stock_of(&self, product_id: Uuid) -> i32 {
        self.processor()
            .products()
            .find(product_id)
            .await
            .unwrap()
            .expect("product vanished")
            .stock_quantity
    }

    pub async fn orders(&self) -> Vec<order::Model> {
        order::Entity::find()
            .all(self.state.db.as_ref())
            .await
            .unwrap()
    }

    /// Sends a request through the router and returns the status and JSON body.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }
}

/// A bearer token the checkout service accepts for `user_id`.
pub fn token_for(user_id: Uuid) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (Utc::now() + ChronoDuration::hours(1)).timestamp(),
        iat: Some(Utc::now().timestamp()),
        iss: "storefront-auth".to_string(),
        aud: "storefront-checkout".to_string(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

pub fn line(product_id: Uuid, price: i64, quantity: i32) -> CartLine {
    CartLine {
        product_id,
        name: "Test item".to_string(),
        price,
        quantity,
        color: None,
        size: None,
        image: None,
    }
}

/// An active, unlimited voucher valid from yesterday to tomorrow.
pub fn voucher(code: &str, discount_type: DiscountType, value: i64) -> NewVoucher {
    NewVoucher {
        code: code.to_string(),
        description: String::new(),
        discount_type,
        discount_value: value,
        max_discount: None,
        min_purchase: None,
        start_date: Utc::now() - ChronoDuration::days(1),
        end_date: Utc::now() + ChronoDuration::days(1),
        is_active: true,
        usage_limit: None,
        usage_count: 0,
        applicable_products: Scope::All,
        applicable_categories: Scope::All,
    }
}
