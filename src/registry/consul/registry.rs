//! 基于 Consul 的 Registrar / Discovery 实现
//!
//! 每个被订阅的服务对应一个服务集合（service set）：第一个 watcher 触发一次首查，
//! 之后由后台任务持续阻塞查询并把新快照广播给该集合的全部 watcher。
//! 最后一个 watcher 停止时后台任务随之退出。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{Duration, MissedTickBehavior, interval, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::api::QueryOptions;
use super::client::Client;
use crate::config::RegistryConfig;
use crate::error::{DiscoveryError, Result};
use crate::registry::{Discovery, Registrar, ServiceInstance, Watcher};

type ServiceSets = Arc<Mutex<HashMap<String, Arc<ServiceSet>>>>;

/// 单个服务的实例快照与订阅者
struct ServiceSet {
    name: String,
    services: RwLock<Arc<Vec<ServiceInstance>>>,
    watchers: Mutex<HashMap<u64, mpsc::Sender<()>>>,
    token: CancellationToken,
}

impl ServiceSet {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            services: RwLock::new(Arc::new(Vec::new())),
            watchers: Mutex::new(HashMap::new()),
            token: CancellationToken::new(),
        }
    }

    fn snapshot(&self) -> Arc<Vec<ServiceInstance>> {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 替换快照并通知所有 watcher（通知合并，不会阻塞）
    fn broadcast(&self, services: Vec<ServiceInstance>) {
        *self.services.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(services);
        let watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        for event in watchers.values() {
            let _ = event.try_send(());
        }
    }
}

/// Consul 注册中心
pub struct ConsulRegistry {
    client: Arc<Client>,
    enable_health_check: bool,
    passing_only: bool,
    timeout: Duration,
    sets: ServiceSets,
    next_watcher_id: AtomicU64,
}

impl ConsulRegistry {
    /// 创建新的注册中心（默认开启健康检查、只返回 passing 实例、首查超时 10s）
    pub fn new(client: Client) -> Self {
        Self {
            client: Arc::new(client),
            enable_health_check: true,
            passing_only: true,
            timeout: Duration::from_secs(10),
            sets: Arc::new(Mutex::new(HashMap::new())),
            next_watcher_id: AtomicU64::new(0),
        }
    }

    /// 从配置创建注册中心
    pub fn from_config(config: &RegistryConfig) -> Self {
        Self::new(Client::from_config(config))
            .with_health_check(config.enable_health_check)
            .with_passing_only(config.passing_only)
            .with_timeout(Duration::from_secs(config.timeout))
    }

    pub fn with_health_check(mut self, enable: bool) -> Self {
        self.enable_health_check = enable;
        self
    }

    pub fn with_passing_only(mut self, passing_only: bool) -> Self {
        self.passing_only = passing_only;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 底层客户端
    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    /// 列出目录中的所有服务名
    pub async fn list_services(&self) -> Result<Vec<String>> {
        let (services, _) = self
            .client
            .api()
            .catalog_services(&QueryOptions::default())
            .await?;
        let mut names: Vec<String> = services.into_keys().collect();
        names.sort();
        Ok(names)
    }

    /// 首查并启动后台阻塞查询任务
    async fn resolve(&self, set: Arc<ServiceSet>) -> Result<()> {
        let (services, mut index) = timeout(
            self.timeout,
            self.client.service(&set.name, 0, self.passing_only),
        )
        .await
        .map_err(|_| DiscoveryError::Transport(format!("resolve {} timed out", set.name)))??;
        if !services.is_empty() {
            set.broadcast(services);
        }

        let client = self.client.clone();
        let passing_only = self.passing_only;
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = set.token.cancelled() => return,
                    _ = ticker.tick() => {}
                }

                // 单次阻塞请求的超时由 Client 按数据中心分别控制
                let result = tokio::select! {
                    _ = set.token.cancelled() => return,
                    result = client.service(&set.name, index, passing_only) => result,
                };
                match result {
                    Ok((services, new_index)) => {
                        if !services.is_empty() && new_index != index {
                            debug!(
                                service = %set.name,
                                index = new_index,
                                instances = services.len(),
                                "Service set changed"
                            );
                            set.broadcast(services);
                        }
                        index = new_index;
                    }
                    Err(e) => {
                        error!(service = %set.name, error = %e, "Failed to query service from consul");
                        tokio::select! {
                            _ = set.token.cancelled() => return,
                            _ = sleep(Duration::from_secs(1)) => {}
                        }
                    }
                }
            }
        });
        Ok(())
    }

    /// 首查失败时丢弃集合，已加入的 watcher 随之收到 `Canceled`
    fn abandon(&self, set: &Arc<ServiceSet>) {
        set.token.cancel();
        let mut sets = self.sets.lock().unwrap_or_else(PoisonError::into_inner);
        if sets
            .get(&set.name)
            .is_some_and(|current| Arc::ptr_eq(current, set))
        {
            sets.remove(&set.name);
        }
    }
}

#[async_trait]
impl Registrar for ConsulRegistry {
    async fn register(&self, instance: &ServiceInstance) -> Result<()> {
        self.client.register(instance, self.enable_health_check).await
    }

    async fn deregister(&self, instance: &ServiceInstance) -> Result<()> {
        self.client.deregister(&instance.id).await
    }
}

#[async_trait]
impl Discovery for ConsulRegistry {
    async fn get_service(&self, name: &str) -> Result<Vec<ServiceInstance>> {
        let cached = self
            .sets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|set| set.snapshot());
        if let Some(services) = cached {
            if !services.is_empty() {
                return Ok(services.as_ref().clone());
            }
        }

        let (services, _) = self.client.service(name, 0, self.passing_only).await?;
        Ok(services)
    }

    async fn watch(&self, name: &str) -> Result<Box<dyn Watcher>> {
        let (tx, rx) = mpsc::channel(1);
        let id = self.next_watcher_id.fetch_add(1, Ordering::Relaxed);
        // 注册 watcher 与 stop 移除集合在同一把锁下完成
        let (set, created) = {
            let mut sets = self.sets.lock().unwrap_or_else(PoisonError::into_inner);
            let (set, created) = match sets.get(name) {
                Some(set) => (set.clone(), false),
                None => {
                    let set = Arc::new(ServiceSet::new(name));
                    sets.insert(name.to_string(), set.clone());
                    (set, true)
                }
            };
            set.watchers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(id, tx.clone());
            (set, created)
        };
        // 集合里已有实例时先推送一次，避免首个 next 永久阻塞
        if !set.snapshot().is_empty() {
            let _ = tx.try_send(());
        }

        let watcher = ConsulWatcher {
            id,
            token: set.token.child_token(),
            set: set.clone(),
            sets: self.sets.clone(),
            event: rx,
        };

        if created {
            if let Err(e) = self.resolve(set.clone()).await {
                let _ = watcher.stop().await;
                self.abandon(&set);
                return Err(e);
            }
        }
        Ok(Box::new(watcher))
    }
}

/// Consul 服务订阅
pub struct ConsulWatcher {
    id: u64,
    token: CancellationToken,
    set: Arc<ServiceSet>,
    sets: ServiceSets,
    event: mpsc::Receiver<()>,
}

#[async_trait]
impl Watcher for ConsulWatcher {
    async fn next(&mut self) -> Result<Vec<ServiceInstance>> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(DiscoveryError::Canceled),
            event = self.event.recv() => {
                if event.is_none() {
                    return Err(DiscoveryError::Canceled);
                }
            }
        }
        Ok(self.set.snapshot().as_ref().clone())
    }

    async fn stop(&self) -> Result<()> {
        self.token.cancel();

        let mut sets = self.sets.lock().unwrap_or_else(PoisonError::into_inner);
        let mut watchers = self.set.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        watchers.remove(&self.id);
        if watchers.is_empty() {
            self.set.token.cancel();
            let same_set = sets
                .get(&self.set.name)
                .is_some_and(|current| Arc::ptr_eq(current, &self.set));
            if same_set {
                sets.remove(&self.set.name);
            }
        }
        Ok(())
    }
}
