//! Consul HTTP API 封装
//!
//! 只覆盖服务发现需要的 agent / health / catalog 接口。阻塞查询通过 `index` + `wait`
//! 参数实现，新的索引从 `X-Consul-Index` 响应头读取。

use reqwest::Client as HttpClient;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{DiscoveryError, Result};

const INDEX_HEADER: &str = "X-Consul-Index";
const TOKEN_HEADER: &str = "X-Consul-Token";

/// 服务注册请求体
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentServiceRegistration {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Tags")]
    pub tags: Vec<String>,
    #[serde(rename = "Address", skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(rename = "Port", skip_serializing_if = "is_zero")]
    pub port: u16,
    #[serde(rename = "Meta")]
    pub meta: HashMap<String, String>,
    #[serde(rename = "TaggedAddresses")]
    pub tagged_addresses: HashMap<String, ServiceAddress>,
    #[serde(rename = "Checks", skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<AgentServiceCheck>,
}

fn is_zero(port: &u16) -> bool {
    *port == 0
}

/// 带标签的服务地址
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceAddress {
    #[serde(rename = "Address", default)]
    pub address: String,
    #[serde(rename = "Port", default)]
    pub port: u16,
}

/// 健康检查定义（TCP / HTTP / TTL）
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentServiceCheck {
    #[serde(rename = "CheckID", default, skip_serializing_if = "Option::is_none")]
    pub check_id: Option<String>,
    #[serde(rename = "TCP", default, skip_serializing_if = "Option::is_none")]
    pub tcp: Option<String>,
    #[serde(rename = "HTTP", default, skip_serializing_if = "Option::is_none")]
    pub http: Option<String>,
    #[serde(rename = "TTL", default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    #[serde(rename = "Interval", default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(rename = "Timeout", default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(
        rename = "DeregisterCriticalServiceAfter",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub deregister_critical_service_after: Option<String>,
}

/// `/v1/health/service/:name` 返回的条目
#[allow(non_snake_case)]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceEntry {
    #[serde(default)]
    pub Service: AgentService,
}

/// 注册中心中的服务定义
#[allow(non_snake_case)]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentService {
    #[serde(default)]
    pub ID: String,
    #[serde(default)]
    pub Service: String,
    #[serde(default, deserialize_with = "null_default")]
    pub Tags: Vec<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub Meta: HashMap<String, String>,
    #[serde(default)]
    pub Address: String,
    #[serde(default)]
    pub Port: u16,
    #[serde(default, deserialize_with = "null_default")]
    pub TaggedAddresses: HashMap<String, ServiceAddress>,
}

/// Consul 对空集合常返回 `null`
fn null_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// 阻塞查询参数
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub datacenter: Option<String>,
    pub wait_index: u64,
    pub wait_time: Option<Duration>,
}

/// 查询元信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryMeta {
    pub last_index: u64,
}

/// Consul HTTP 客户端
#[derive(Clone)]
pub struct ConsulApi {
    http_client: HttpClient,
    base_url: String,
    token: Option<String>,
}

impl ConsulApi {
    /// 创建新的 Consul API 客户端
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http_client: HttpClient::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    /// 基础地址
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header(TOKEN_HEADER, token),
            None => request,
        }
    }

    /// 注册服务
    pub async fn service_register(&self, registration: &AgentServiceRegistration) -> Result<()> {
        let request = self
            .http_client
            .put(self.url("/v1/agent/service/register"))
            .json(registration);
        let resp = self.authorize(request).send().await?;
        ensure_success(resp).await?;
        Ok(())
    }

    /// 注销服务
    pub async fn service_deregister(&self, service_id: &str) -> Result<()> {
        let request = self
            .http_client
            .put(self.url(&format!("/v1/agent/service/deregister/{}", service_id)));
        let resp = self.authorize(request).send().await?;
        ensure_success(resp).await?;
        Ok(())
    }

    /// 将 TTL 检查标记为 passing
    pub async fn update_ttl(&self, check_id: &str, output: &str) -> Result<()> {
        let body = serde_json::json!({
            "Status": "passing",
            "Output": output,
        });
        let request = self
            .http_client
            .put(self.url(&format!("/v1/agent/check/update/{}", check_id)))
            .json(&body);
        let resp = self.authorize(request).send().await?;
        ensure_success(resp).await?;
        Ok(())
    }

    /// 健康服务查询（阻塞查询）
    pub async fn health_service(
        &self,
        service: &str,
        passing_only: bool,
        opts: &QueryOptions,
    ) -> Result<(Vec<ServiceEntry>, QueryMeta)> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if passing_only {
            query.push(("passing", "1".to_string()));
        }
        push_query_options(&mut query, opts);

        let request = self
            .http_client
            .get(self.url(&format!("/v1/health/service/{}", service)))
            .query(&query);
        let resp = ensure_success(self.authorize(request).send().await?).await?;
        let meta = query_meta(&resp);
        let entries: Vec<ServiceEntry> = serde_json::from_slice(&resp.bytes().await?)?;
        Ok((entries, meta))
    }

    /// 列出所有已知数据中心
    pub async fn catalog_datacenters(&self) -> Result<Vec<String>> {
        let request = self.http_client.get(self.url("/v1/catalog/datacenters"));
        let resp = ensure_success(self.authorize(request).send().await?).await?;
        Ok(serde_json::from_slice(&resp.bytes().await?)?)
    }

    /// 列出目录中的服务名及其标签
    pub async fn catalog_services(
        &self,
        opts: &QueryOptions,
    ) -> Result<(HashMap<String, Vec<String>>, QueryMeta)> {
        let mut query: Vec<(&str, String)> = Vec::new();
        push_query_options(&mut query, opts);

        let request = self
            .http_client
            .get(self.url("/v1/catalog/services"))
            .query(&query);
        let resp = ensure_success(self.authorize(request).send().await?).await?;
        let meta = query_meta(&resp);
        let services = serde_json::from_slice(&resp.bytes().await?)?;
        Ok((services, meta))
    }
}

fn push_query_options(query: &mut Vec<(&str, String)>, opts: &QueryOptions) {
    if let Some(dc) = &opts.datacenter {
        query.push(("dc", dc.clone()));
    }
    if opts.wait_index > 0 {
        query.push(("index", opts.wait_index.to_string()));
    }
    if let Some(wait) = opts.wait_time {
        let wait = if wait.subsec_millis() == 0 && wait.as_secs() > 0 {
            format!("{}s", wait.as_secs())
        } else {
            format!("{}ms", wait.as_millis().max(1))
        };
        query.push(("wait", wait));
    }
}

fn query_meta(resp: &reqwest::Response) -> QueryMeta {
    let last_index = resp
        .headers()
        .get(INDEX_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);
    QueryMeta { last_index }
}

async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(DiscoveryError::Status {
        status: status.as_u16(),
        body,
    })
}
