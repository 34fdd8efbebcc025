//! 测试用的 Consul agent 替身
//!
//! 只实现客户端会调用的接口；阻塞查询在索引未变化时按 `wait` 挂起，最多 300ms。

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::Notify;

pub const LOCAL_DC: &str = "dc1";

const MAX_BLOCK: Duration = Duration::from_millis(300);

fn parse_wait(wait: &str) -> Option<Duration> {
    if let Some(ms) = wait.strip_suffix("ms") {
        return ms.parse().ok().map(Duration::from_millis);
    }
    wait.strip_suffix('s')?.parse().ok().map(Duration::from_secs)
}

#[derive(Default)]
pub struct FakeConsul {
    /// 数据中心 -> 服务 ID -> 注册请求体
    services: Mutex<HashMap<String, HashMap<String, Value>>>,
    index: AtomicU64,
    changed: Notify,
    pub registrations: AtomicUsize,
    pub deregistrations: AtomicUsize,
    pub ttl_updates: AtomicUsize,
    pub fail_ttl: AtomicBool,
    pub fail_health: AtomicBool,
}

impl FakeConsul {
    fn bump(&self) {
        self.index.fetch_add(1, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    pub fn index(&self) -> u64 {
        self.index.load(Ordering::SeqCst)
    }

    /// 直接写入某个数据中心
    pub fn insert(&self, dc: &str, registration: Value) {
        let id = registration["ID"].as_str().unwrap_or_default().to_string();
        self.services
            .lock()
            .unwrap()
            .entry(dc.to_string())
            .or_default()
            .insert(id, registration);
        self.bump();
    }

    pub fn remove(&self, dc: &str, id: &str) {
        if let Some(services) = self.services.lock().unwrap().get_mut(dc) {
            services.remove(id);
        }
        self.bump();
    }

    pub fn registration(&self, id: &str) -> Option<Value> {
        self.services
            .lock()
            .unwrap()
            .get(LOCAL_DC)
            .and_then(|services| services.get(id).cloned())
    }

    fn entries(&self, dc: &str, name: &str) -> Vec<Value> {
        let services = self.services.lock().unwrap();
        let mut entries: Vec<Value> = services
            .get(dc)
            .map(|services| {
                services
                    .values()
                    .filter(|r| r["Name"] == name)
                    .map(|r| {
                        json!({
                            "Service": {
                                "ID": r["ID"],
                                "Service": r["Name"],
                                "Tags": r["Tags"],
                                "Meta": r["Meta"],
                                "Address": r.get("Address").cloned().unwrap_or(json!("")),
                                "Port": r.get("Port").cloned().unwrap_or(json!(0)),
                                "TaggedAddresses": r["TaggedAddresses"],
                            }
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by(|a, b| a["Service"]["ID"].as_str().cmp(&b["Service"]["ID"].as_str()));
        entries
    }
}

type Shared = Arc<FakeConsul>;

fn with_index(index: u64, body: Value) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("X-Consul-Index", HeaderValue::from(index));
    (StatusCode::OK, headers, Json(body)).into_response()
}

async fn register(State(consul): State<Shared>, Json(body): Json<Value>) -> StatusCode {
    consul.registrations.fetch_add(1, Ordering::SeqCst);
    consul.insert(LOCAL_DC, body);
    StatusCode::OK
}

async fn deregister(State(consul): State<Shared>, Path(id): Path<String>) -> Response {
    let removed = consul
        .services
        .lock()
        .unwrap()
        .get_mut(LOCAL_DC)
        .and_then(|services| services.remove(&id));
    if removed.is_none() {
        return (StatusCode::NOT_FOUND, format!("Unknown service ID {:?}", id)).into_response();
    }
    consul.deregistrations.fetch_add(1, Ordering::SeqCst);
    consul.bump();
    StatusCode::OK.into_response()
}

async fn update_check(State(consul): State<Shared>, Path(_id): Path<String>) -> StatusCode {
    consul.ttl_updates.fetch_add(1, Ordering::SeqCst);
    if consul.fail_ttl.load(Ordering::SeqCst) {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

async fn health_service(
    State(consul): State<Shared>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if consul.fail_health.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "unavailable").into_response();
    }
    let wait_index: u64 = params.get("index").and_then(|i| i.parse().ok()).unwrap_or(0);
    if wait_index > 0 && wait_index == consul.index() {
        let wait = params
            .get("wait")
            .and_then(|w| parse_wait(w))
            .unwrap_or(MAX_BLOCK)
            .min(MAX_BLOCK);
        let _ = tokio::time::timeout(wait, consul.changed.notified()).await;
    }
    let dc = params.get("dc").map(String::as_str).unwrap_or(LOCAL_DC);
    with_index(consul.index(), Value::Array(consul.entries(dc, &name)))
}

async fn datacenters() -> Json<Value> {
    Json(json!([LOCAL_DC, "dc2"]))
}

async fn catalog_services(State(consul): State<Shared>) -> Response {
    let services = consul.services.lock().unwrap();
    let mut catalog = serde_json::Map::new();
    for registration in services.values().flat_map(|s| s.values()) {
        if let Some(name) = registration["Name"].as_str() {
            catalog.insert(name.to_string(), registration["Tags"].clone());
        }
    }
    let index = consul.index();
    drop(services);
    with_index(index, Value::Object(catalog))
}

/// 启动替身 agent，返回共享状态与地址
pub async fn start() -> (Shared, String) {
    let consul: Shared = Arc::new(FakeConsul::default());
    consul.index.store(1, Ordering::SeqCst);
    let app = Router::new()
        .route("/v1/agent/service/register", put(register))
        .route("/v1/agent/service/deregister/{id}", put(deregister))
        .route("/v1/agent/check/update/{id}", put(update_check))
        .route("/v1/health/service/{name}", get(health_service))
        .route("/v1/catalog/datacenters", get(datacenters))
        .route("/v1/catalog/services", get(catalog_services))
        .with_state(consul.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (consul, format!("http://{}", addr))
}

/// 轮询直到条件成立或超时
pub async fn eventually<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
