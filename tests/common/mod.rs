#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use order_intake::api::{
    ApiResponse, AuthState, CheckData, ConsoleApi, Credentials, ExistingOrder, ExportFile,
    ImageFile, OrderApi, OrderList, OrderQuery, Registration, SessionUser,
};
use order_intake::error::ApiError;
use order_intake::order::Order;
use order_intake::ClientConfig;
use parking_lot::Mutex;
use serde_json::{json, Value};

/// Scripted answer for one call.
pub enum Reply<T> {
    Respond(ApiResponse<T>),
    Fail(ApiError),
    After(Duration, ApiResponse<T>),
    Hang,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Recognize(String),
    Check(String),
    Create(String),
    Login(String),
    Register(String),
    Logout,
    CheckAuth,
    List,
    Update(Option<i64>),
    BatchDelete(Vec<i64>),
    Export,
}

type Queue<T> = Mutex<VecDeque<Reply<T>>>;

/// In-memory backend. Empty queues fall back to a happy-path answer.
#[derive(Default)]
pub struct FakeApi {
    pub recognize: Queue<Value>,
    pub check: Queue<CheckData>,
    pub create: Queue<Value>,
    pub login: Queue<SessionUser>,
    pub auth: Queue<AuthState>,
    pub list: Queue<OrderList>,
    pub update: Queue<Value>,
    pub delete: Queue<Value>,
    pub calls: Mutex<Vec<Call>>,
    pub created: Mutex<Vec<Order>>,
}

impl FakeApi {
    pub fn push_recognize(&self, reply: Reply<Value>) {
        self.recognize.lock().push_back(reply);
    }

    pub fn push_check(&self, reply: Reply<CheckData>) {
        self.check.lock().push_back(reply);
    }

    pub fn push_create(&self, reply: Reply<Value>) {
        self.create.lock().push_back(reply);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

fn next<T>(queue: &Queue<T>, fallback: impl FnOnce() -> Reply<T>) -> Reply<T> {
    queue.lock().pop_front().unwrap_or_else(fallback)
}

async fn resolve<T>(reply: Reply<T>) -> Result<ApiResponse<T>, ApiError> {
    match reply {
        Reply::Respond(response) => Ok(response),
        Reply::Fail(err) => Err(err),
        Reply::After(delay, response) => {
            tokio::time::sleep(delay).await;
            Ok(response)
        }
        Reply::Hang => std::future::pending().await,
    }
}

pub fn ok<T>(data: T) -> Reply<T> {
    Reply::Respond(ApiResponse::ok(data))
}

pub fn fail<T>(code: i64, msg: Option<&str>, data: Option<T>) -> Reply<T> {
    Reply::Respond(ApiResponse::failure(code, msg, data))
}

pub fn ocr(order_code: &str) -> Value {
    json!({
        "order_code": order_code,
        "product_name": "Widget",
        "payment_method": "已付款",
        "img_path": "/media/orders/shot.jpg",
        "img_filename": "shot.jpg"
    })
}

pub fn not_found() -> CheckData {
    CheckData {
        exists: false,
        order: None,
    }
}

pub fn exists(uploader: &str) -> CheckData {
    CheckData {
        exists: true,
        order: Some(ExistingOrder {
            order_code: None,
            upload_user: Some(uploader.to_string()),
        }),
    }
}

pub fn jpeg(size: usize) -> ImageFile {
    ImageFile::new("shot.jpg", "image/jpeg", vec![0xFF; size])
}

pub fn config() -> ClientConfig {
    ClientConfig::development()
}

impl OrderApi for FakeApi {
    async fn recognize(&self, image: &ImageFile) -> Result<ApiResponse<Value>, ApiError> {
        self.record(Call::Recognize(image.name.clone()));
        let reply = next(&self.recognize, || ok(ocr("GB1001")));
        resolve(reply).await
    }

    async fn check_order(&self, order_code: &str) -> Result<ApiResponse<CheckData>, ApiError> {
        self.record(Call::Check(order_code.to_string()));
        let reply = next(&self.check, || ok(not_found()));
        resolve(reply).await
    }

    async fn create_order(&self, order: &Order) -> Result<ApiResponse<Value>, ApiError> {
        self.record(Call::Create(order.order_code.clone()));
        let reply = next(&self.create, || ok(json!({ "id": 1 })));
        let result = resolve(reply).await;
        if matches!(&result, Ok(r) if r.is_success()) {
            self.created.lock().push(order.clone());
        }
        result
    }
}

impl ConsoleApi for FakeApi {
    async fn login(&self, credentials: &Credentials) -> Result<ApiResponse<SessionUser>, ApiError> {
        self.record(Call::Login(credentials.username.clone()));
        let username = credentials.username.clone();
        let reply = next(&self.login, || {
            ok(SessionUser {
                username,
                is_superuser: false,
            })
        });
        resolve(reply).await
    }

    async fn register(&self, registration: &Registration) -> Result<ApiResponse<Value>, ApiError> {
        self.record(Call::Register(registration.username.clone()));
        Ok(ApiResponse::ok(Value::Null))
    }

    async fn logout(&self) -> Result<ApiResponse<Value>, ApiError> {
        self.record(Call::Logout);
        Ok(ApiResponse::ok(Value::Null))
    }

    async fn check_auth(&self) -> Result<ApiResponse<AuthState>, ApiError> {
        self.record(Call::CheckAuth);
        let reply = next(&self.auth, || {
            ok(AuthState {
                authenticated: false,
                user: None,
            })
        });
        resolve(reply).await
    }

    async fn list_orders(&self, _query: &OrderQuery) -> Result<ApiResponse<OrderList>, ApiError> {
        self.record(Call::List);
        let reply = next(&self.list, || ok(OrderList::default()));
        resolve(reply).await
    }

    async fn update_order(&self, order: &Order) -> Result<ApiResponse<Value>, ApiError> {
        self.record(Call::Update(order.id));
        let reply = next(&self.update, || ok(Value::Null));
        resolve(reply).await
    }

    async fn batch_delete(&self, order_ids: &[i64]) -> Result<ApiResponse<Value>, ApiError> {
        self.record(Call::BatchDelete(order_ids.to_vec()));
        let reply = next(&self.delete, || ok(Value::Null));
        resolve(reply).await
    }

    async fn export(&self, _query: &OrderQuery, dest_dir: &Path) -> Result<ExportFile, ApiError> {
        self.record(Call::Export);
        let path: PathBuf = dest_dir.join("orders.xlsx");
        let bytes = b"PK\x03\x04fake-xlsx";
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| ApiError::Io {
                operation: "export",
                source,
            })?;
        Ok(ExportFile {
            filename: "orders.xlsx".into(),
            path,
            bytes_written: bytes.len() as u64,
        })
    }
}

pub fn orders(n: usize) -> OrderList {
    OrderList {
        orders: (0..n)
            .map(|i| Order {
                id: Some(i as i64 + 1),
                order_code: format!("GB{i:04}"),
                ..Order::default()
            })
            .collect(),
        pagination: None,
    }
}
