//! Consul 注册中心客户端
//!
//! 负责实例的注册/注销（含 TCP 健康检查与 TTL 心跳）以及阻塞式服务查询，
//! 支持单数据中心与多数据中心两种模式。

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::join_all;
use http::Uri;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::api::{
    AgentServiceCheck, AgentServiceRegistration, ConsulApi, QueryMeta, QueryOptions,
    ServiceAddress, ServiceEntry,
};
use crate::config::{DatacenterMode, RegistryConfig};
use crate::error::{DiscoveryError, Result};
use crate::registry::ServiceInstance;

/// 阻塞查询的最长等待时间
pub const WAIT_TIME: Duration = Duration::from_secs(55);

/// 单个阻塞请求在等待时间之外最多额外允许的耗时
const REQUEST_GRACE: Duration = Duration::from_secs(5);

/// TCP 健康检查超时
const CHECK_TIMEOUT: &str = "5s";

/// 仅携带网络信息、不代表协议 endpoint 的地址标签
const NETWORK_ADDRESS_TAGS: [&str; 4] = ["lan_ipv4", "wan_ipv4", "lan_ipv6", "wan_ipv6"];

/// 将注册中心条目转换为服务实例的函数
pub type ServiceResolver = Arc<dyn Fn(&[ServiceEntry]) -> Vec<ServiceInstance> + Send + Sync>;

/// TTL 心跳检查 ID
pub fn ttl_check_id(service_id: &str) -> String {
    format!("service:{}:ttl:1", service_id)
}

/// 默认的实例解析函数
///
/// - `version=<v>` 标签作为版本
/// - 每个协议标签地址作为一个 endpoint（跳过 lan/wan ipv4/ipv6 网络地址）
/// - 没有任何协议地址时，用主地址和端口合成 `grpc://host:port`
pub fn default_resolver(entries: &[ServiceEntry]) -> Vec<ServiceInstance> {
    entries
        .iter()
        .map(|entry| {
            let service = &entry.Service;
            let version = service
                .Tags
                .iter()
                .filter_map(|tag| tag.split_once('='))
                .filter(|(key, _)| *key == "version")
                .map(|(_, value)| value.to_string())
                .last()
                .unwrap_or_default();

            // 按协议名排序，保证同一快照的 endpoint 顺序稳定
            let tagged: BTreeMap<&String, &ServiceAddress> =
                service.TaggedAddresses.iter().collect();
            let mut endpoints: Vec<String> = tagged
                .into_iter()
                .filter(|(scheme, _)| !NETWORK_ADDRESS_TAGS.contains(&scheme.as_str()))
                .map(|(_, addr)| addr.address.clone())
                .collect();
            if endpoints.is_empty() && !service.Address.is_empty() && service.Port != 0 {
                endpoints.push(format!(
                    "grpc://{}",
                    join_host_port(&service.Address, service.Port)
                ));
            }

            ServiceInstance {
                id: service.ID.clone(),
                name: service.Service.clone(),
                version,
                metadata: service.Meta.clone(),
                endpoints,
            }
        })
        .collect()
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// 拆分 endpoint 为 (协议, 主机, 端口)
fn split_endpoint(endpoint: &str) -> Result<(String, String, u16)> {
    let uri: Uri = endpoint
        .parse()
        .map_err(|e| DiscoveryError::invalid_endpoint(endpoint, e))?;
    let scheme = uri
        .scheme_str()
        .ok_or_else(|| DiscoveryError::invalid_endpoint(endpoint, "missing scheme"))?
        .to_string();
    let host = uri
        .host()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| DiscoveryError::invalid_endpoint(endpoint, "missing host"))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    let port = uri
        .port_u16()
        .ok_or_else(|| DiscoveryError::invalid_endpoint(endpoint, "missing port"))?;
    Ok((scheme, host, port))
}

struct Heartbeat {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Consul 注册中心客户端
pub struct Client {
    api: ConsulApi,
    resolver: ServiceResolver,
    datacenter: Option<String>,
    mode: DatacenterMode,
    wait_time: Duration,
    healthcheck_interval: u64,
    deregister_critical_service_after: u64,
    heartbeat: bool,
    service_checks: Vec<AgentServiceCheck>,
    root: CancellationToken,
    heartbeats: Mutex<HashMap<String, Heartbeat>>,
}

impl Client {
    /// 创建新的客户端（默认：单数据中心、10s 检查间隔、600s 注销阈值、开启心跳）
    pub fn new(api: ConsulApi) -> Self {
        let defaults = RegistryConfig::default();
        Self {
            api,
            resolver: Arc::new(default_resolver),
            datacenter: None,
            mode: DatacenterMode::Single,
            wait_time: WAIT_TIME,
            healthcheck_interval: defaults.healthcheck_interval,
            deregister_critical_service_after: defaults.deregister_critical_service_after,
            heartbeat: defaults.heartbeat,
            service_checks: Vec::new(),
            root: CancellationToken::new(),
            heartbeats: Mutex::new(HashMap::new()),
        }
    }

    /// 从配置创建客户端
    pub fn from_config(config: &RegistryConfig) -> Self {
        let api = ConsulApi::new(config.address.clone(), config.token.clone());
        let mut client = Self::new(api)
            .with_datacenter_mode(config.datacenter_mode)
            .with_healthcheck_interval(config.healthcheck_interval)
            .with_deregister_critical_service_after(config.deregister_critical_service_after)
            .with_heartbeat(config.heartbeat);
        client.datacenter = config.datacenter.clone();
        client
    }

    /// 指定单数据中心模式查询的数据中心
    pub fn with_datacenter(mut self, datacenter: impl Into<String>) -> Self {
        self.datacenter = Some(datacenter.into());
        self
    }

    pub fn with_datacenter_mode(mut self, mode: DatacenterMode) -> Self {
        self.mode = mode;
        self
    }

    /// 阻塞查询的最长等待时间（默认 [`WAIT_TIME`]）
    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    pub fn with_healthcheck_interval(mut self, secs: u64) -> Self {
        self.healthcheck_interval = secs.max(1);
        self
    }

    pub fn with_deregister_critical_service_after(mut self, secs: u64) -> Self {
        self.deregister_critical_service_after = secs;
        self
    }

    pub fn with_heartbeat(mut self, enable: bool) -> Self {
        self.heartbeat = enable;
        self
    }

    /// 附加自定义健康检查（仅在启用健康检查时提交）
    pub fn with_service_checks(mut self, checks: Vec<AgentServiceCheck>) -> Self {
        self.service_checks = checks;
        self
    }

    /// 替换实例解析函数
    pub fn with_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&[ServiceEntry]) -> Vec<ServiceInstance> + Send + Sync + 'static,
    {
        self.resolver = Arc::new(resolver);
        self
    }

    /// 底层 API
    pub fn api(&self) -> &ConsulApi {
        &self.api
    }

    /// 注册服务实例
    ///
    /// 开启心跳时会启动后台任务定期上报 TTL；任务在 [`Client::deregister`] 或
    /// [`Client::shutdown`] 取消后注销实例并退出。
    pub async fn register(&self, instance: &ServiceInstance, enable_health_check: bool) -> Result<()> {
        let registration = self.build_registration(instance, enable_health_check)?;
        self.api.service_register(&registration).await?;
        info!(
            service = %instance.name,
            instance_id = %instance.id,
            endpoints = ?instance.endpoints,
            "✅ Service registered"
        );

        if self.heartbeat {
            self.spawn_heartbeat(registration);
        }
        Ok(())
    }

    fn build_registration(
        &self,
        instance: &ServiceInstance,
        enable_health_check: bool,
    ) -> Result<AgentServiceRegistration> {
        let mut tagged_addresses = HashMap::new();
        let mut check_addresses = Vec::new();
        for endpoint in &instance.endpoints {
            let (scheme, host, port) = split_endpoint(endpoint)?;
            tagged_addresses.insert(
                scheme,
                ServiceAddress {
                    address: endpoint.clone(),
                    port,
                },
            );
            check_addresses.push((host, port));
        }

        let mut registration = AgentServiceRegistration {
            id: instance.id.clone(),
            name: instance.name.clone(),
            tags: vec![format!("version={}", instance.version)],
            meta: instance.metadata.clone(),
            tagged_addresses,
            ..Default::default()
        };
        if let Some((host, port)) = check_addresses.first() {
            registration.address = host.clone();
            registration.port = *port;
        }

        let deregister_after = Some(format!("{}s", self.deregister_critical_service_after));
        if enable_health_check {
            for (host, port) in &check_addresses {
                registration.checks.push(AgentServiceCheck {
                    tcp: Some(join_host_port(host, *port)),
                    interval: Some(format!("{}s", self.healthcheck_interval)),
                    timeout: Some(CHECK_TIMEOUT.to_string()),
                    deregister_critical_service_after: deregister_after.clone(),
                    ..Default::default()
                });
            }
            registration.checks.extend(self.service_checks.iter().cloned());
        }
        if self.heartbeat {
            registration.checks.push(AgentServiceCheck {
                check_id: Some(ttl_check_id(&instance.id)),
                ttl: Some(format!("{}s", self.healthcheck_interval * 2)),
                deregister_critical_service_after: deregister_after,
                ..Default::default()
            });
        }
        Ok(registration)
    }

    fn spawn_heartbeat(&self, registration: AgentServiceRegistration) {
        let token = self.root.child_token();
        let service_id = registration.id.clone();
        let handle = tokio::spawn(heartbeat_loop(
            self.api.clone(),
            registration,
            Duration::from_secs(self.healthcheck_interval),
            token.clone(),
        ));

        let previous = self
            .heartbeats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(service_id, Heartbeat { token, handle });
        // 同一 ID 重复注册：旧任务直接终止，不能触发注销
        if let Some(previous) = previous {
            previous.handle.abort();
        }
    }

    /// 注销服务实例
    ///
    /// 先取消该实例的心跳任务并等待其退出，再发起注销；实例已不存在（404）不视为错误。
    pub async fn deregister(&self, service_id: &str) -> Result<()> {
        let heartbeat = self
            .heartbeats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(service_id);
        if let Some(heartbeat) = heartbeat {
            heartbeat.token.cancel();
            if let Err(e) = heartbeat.handle.await {
                warn!(instance_id = %service_id, error = %e, "Heartbeat task ended abnormally");
            }
        }

        match self.api.service_deregister(service_id).await {
            Ok(()) => {
                info!(instance_id = %service_id, "✅ Service deregistered");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(instance_id = %service_id, "Service already deregistered");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// 取消所有心跳任务并等待它们完成注销
    pub async fn shutdown(&self) {
        self.root.cancel();
        let handles: Vec<JoinHandle<()>> = self
            .heartbeats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, heartbeat)| heartbeat.handle)
            .collect();
        join_all(handles).await;
    }

    /// 阻塞查询服务实例
    ///
    /// 返回实例列表和新的索引；`wait_index` 为 0 时立即返回。
    /// 错误直接返回给调用方，不在此层重试。
    pub async fn service(
        &self,
        name: &str,
        wait_index: u64,
        passing_only: bool,
    ) -> Result<(Vec<ServiceInstance>, u64)> {
        if self.mode == DatacenterMode::Multi {
            return self.multi_dc_service(name, wait_index, passing_only).await;
        }

        let opts = QueryOptions {
            datacenter: self.datacenter.clone(),
            wait_index,
            wait_time: Some(self.wait_time),
        };
        let (entries, meta) = self.blocking_health(name, passing_only, &opts).await?;
        Ok(((self.resolver)(entries.as_slice()), meta.last_index))
    }

    /// 单次阻塞查询，超过等待时间加余量仍未返回视为传输错误
    ///
    /// 多数据中心模式下每个数据中心各自计时。
    async fn blocking_health(
        &self,
        name: &str,
        passing_only: bool,
        opts: &QueryOptions,
    ) -> Result<(Vec<ServiceEntry>, QueryMeta)> {
        let bound = self.wait_time + (self.wait_time / 2).min(REQUEST_GRACE);
        timeout(bound, self.api.health_service(name, passing_only, opts))
            .await
            .map_err(|_| {
                DiscoveryError::Transport(format!(
                    "blocking query for {} timed out after {:?}",
                    name, bound
                ))
            })?
    }

    /// 依次查询所有数据中心并合并
    ///
    /// 返回最后一个数据中心的索引作为整体的续查索引；
    /// 这是近似值，只在各数据中心变更频率相近时准确。
    async fn multi_dc_service(
        &self,
        name: &str,
        wait_index: u64,
        passing_only: bool,
    ) -> Result<(Vec<ServiceInstance>, u64)> {
        let mut opts = QueryOptions {
            datacenter: None,
            wait_index,
            wait_time: Some(self.wait_time),
        };
        let datacenters = self.api.catalog_datacenters().await?;

        let mut instances = Vec::new();
        for dc in datacenters {
            opts.datacenter = Some(dc.clone());
            let (entries, meta) = self.blocking_health(name, passing_only, &opts).await?;
            let mut resolved = (self.resolver)(entries.as_slice());
            for instance in &mut resolved {
                instance.metadata.insert("dc".to_string(), dc.clone());
            }
            instances.extend(resolved);
            opts.wait_index = meta.last_index;
        }
        Ok((instances, opts.wait_index))
    }
}

/// 心跳任务
///
/// 定期把 TTL 检查标记为 passing；上报失败时随机等待 0~4 秒后重新注册（无限重试）；
/// 取消后注销实例并退出。
async fn heartbeat_loop(
    api: ConsulApi,
    registration: AgentServiceRegistration,
    period: Duration,
    token: CancellationToken,
) {
    let service_id = registration.id.clone();
    let check_id = ttl_check_id(&service_id);

    tokio::select! {
        _ = token.cancelled() => {
            deregister_on_exit(&api, &service_id).await;
            return;
        }
        _ = sleep(Duration::from_secs(1)) => {}
    }
    match api.update_ttl(&check_id, "pass").await {
        Ok(()) => debug!(instance_id = %service_id, "💓 Initial heartbeat sent"),
        Err(e) => error!(instance_id = %service_id, error = %e, "❌ Failed to send initial heartbeat"),
    }

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = api.update_ttl(&check_id, "pass") => result,
        };
        let Err(e) = result else {
            debug!(instance_id = %service_id, "💓 Heartbeat sent");
            continue;
        };
        error!(
            instance_id = %service_id,
            error = %e,
            "❌ Update ttl heartbeat to consul failed"
        );

        let jitter = Duration::from_secs(rand::thread_rng().gen_range(0..5));
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = sleep(jitter) => {}
        }
        match api.service_register(&registration).await {
            Ok(()) => warn!(instance_id = %service_id, "Re-registration of service succeeded"),
            Err(e) => error!(instance_id = %service_id, error = %e, "Re-registration of service failed"),
        }
    }

    deregister_on_exit(&api, &service_id).await;
}

async fn deregister_on_exit(api: &ConsulApi, service_id: &str) {
    match api.service_deregister(service_id).await {
        Ok(()) => info!(instance_id = %service_id, "🛑 Heartbeat task stopped, service deregistered"),
        Err(e) if e.is_not_found() => info!(instance_id = %service_id, "🛑 Heartbeat task stopped"),
        Err(e) => warn!(instance_id = %service_id, error = %e, "⚠️ Failed to deregister service on heartbeat exit"),
    }
}
