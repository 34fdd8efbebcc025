//! watch 驱动的解析器
//!
//! 每个解析器持有一个后台任务：循环调用 `Watcher::next`，把实例快照转换为地址列表后
//! 发布给 [`ClientConn`]。取消信号使任务退出；其他错误记录日志，1 秒后重试。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::conn::{ClientConn, ResolvedAddress, Resolver, State};
use super::endpoint::{parse_endpoint, scheme};
use crate::consistent::Member;
use crate::registry::{ServiceInstance, Watcher};
use crate::subset::subset;

/// 出错后的重试间隔
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// 解析参数
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// 为 true 时解析 `grpc` endpoint，否则 `grpcs`
    pub insecure: bool,
    /// 子集大小，0 表示不做子集选择
    pub subset_size: usize,
    pub debug_log: bool,
    /// 子集选择的哈希键，每个解析器固定
    pub selector_key: String,
}

/// 子集选择的候选：以解析出的地址作为环上的标识
#[derive(Clone)]
struct Candidate {
    addr: String,
    instance: ServiceInstance,
}

impl Member for Candidate {
    fn member_id(&self) -> String {
        self.addr.clone()
    }
}

/// 把实例快照转换为地址列表
///
/// 无法解析 endpoint 的实例被跳过；地址相同的实例只保留第一个。
pub fn build_addresses(instances: &[ServiceInstance], options: &ResolveOptions) -> Vec<ResolvedAddress> {
    let want = scheme("grpc", !options.insecure);
    let mut seen = HashSet::new();
    let mut candidates = Vec::with_capacity(instances.len());
    for instance in instances {
        let addr = match parse_endpoint(&instance.endpoints, &want) {
            Ok(Some(addr)) => addr,
            Ok(None) => continue,
            Err(e) => {
                error!(service = %instance.name, instance_id = %instance.id, error = %e, "[resolver] Failed to parse discovery endpoint");
                continue;
            }
        };
        if !seen.insert(addr.clone()) {
            continue;
        }
        candidates.push(Candidate {
            addr,
            instance: instance.clone(),
        });
    }

    if options.subset_size != 0 {
        match subset(&options.selector_key, candidates.clone(), options.subset_size) {
            Ok(picked) => candidates = picked,
            Err(e) => error!(error = %e, "[resolver] Failed to select subset"),
        }
    }

    candidates
        .into_iter()
        .map(|candidate| ResolvedAddress {
            addr: candidate.addr,
            server_name: candidate.instance.name.clone(),
            attributes: candidate.instance.metadata.clone(),
            instance: Arc::new(candidate.instance),
        })
        .collect()
}

/// watch 驱动的解析器
pub struct DiscoveryResolver {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl DiscoveryResolver {
    /// 启动后台 watch 任务
    pub fn start(watcher: Box<dyn Watcher>, conn: Arc<dyn ClientConn>, options: ResolveOptions) -> Self {
        let token = CancellationToken::new();
        let handle = tokio::spawn(watch_loop(watcher, conn, options, token.clone()));
        Self {
            token,
            handle: Some(handle),
        }
    }
}

#[async_trait]
impl Resolver for DiscoveryResolver {
    fn resolve_now(&self) {}

    async fn close(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "[resolver] Watch task ended abnormally");
            }
        }
    }
}

impl Drop for DiscoveryResolver {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn watch_loop(
    mut watcher: Box<dyn Watcher>,
    conn: Arc<dyn ClientConn>,
    options: ResolveOptions,
    token: CancellationToken,
) {
    loop {
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = watcher.next() => result,
        };
        match result {
            Ok(instances) => update(&instances, conn.as_ref(), &options).await,
            Err(e) if e.is_canceled() => break,
            Err(e) => {
                error!(error = %e, "[resolver] Failed to watch discovery endpoint");
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = sleep(RETRY_DELAY) => {}
                }
            }
        }
    }

    if let Err(e) = watcher.stop().await {
        error!(error = %e, "[resolver] Failed to stop watcher");
    }
}

async fn update(instances: &[ServiceInstance], conn: &dyn ClientConn, options: &ResolveOptions) {
    let addresses = build_addresses(instances, options);
    if addresses.is_empty() {
        let raw = serde_json::to_string(instances).unwrap_or_default();
        warn!(instances = %raw, "[resolver] Zero endpoint found, refused to write");
        return;
    }

    let published = options.debug_log.then(|| {
        let list: Vec<&ServiceInstance> = addresses.iter().map(|a| a.instance.as_ref()).collect();
        serde_json::to_string(&list).unwrap_or_default()
    });
    if let Err(e) = conn.update_state(State { addresses }).await {
        error!(error = %e, "[resolver] Failed to update state");
        return;
    }
    if let Some(published) = published {
        debug!(instances = %published, "[resolver] update instances");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(subset_size: usize, insecure: bool) -> ResolveOptions {
        ResolveOptions {
            insecure,
            subset_size,
            debug_log: false,
            selector_key: "fixed".to_string(),
        }
    }

    fn instance(id: &str, endpoint: &str) -> ServiceInstance {
        ServiceInstance::new(id, "helloworld")
            .with_version("v1")
            .with_metadata("zone", "a")
            .with_endpoint(endpoint)
    }

    #[test]
    fn test_duplicate_endpoints_keep_first() {
        let instances = vec![
            instance("1", "grpc://127.0.0.1:9000"),
            instance("2", "grpc://127.0.0.1:9000"),
            instance("3", "grpc://127.0.0.1:9001"),
        ];
        let addrs = build_addresses(&instances, &options(0, true));
        assert_eq!(addrs.len(), 2);
        assert_eq!(addrs[0].instance.id, "1");
        assert_eq!(addrs[0].server_name, "helloworld");
        assert_eq!(addrs[0].attributes.get("zone").map(String::as_str), Some("a"));
    }

    #[test]
    fn test_secure_mode_selects_grpcs() {
        let instances = vec![
            instance("1", "grpc://127.0.0.1:9000"),
            instance("2", "grpcs://127.0.0.1:9443"),
        ];
        let addrs = build_addresses(&instances, &options(0, false));
        assert_eq!(addrs.len(), 1);
        assert_eq!(addrs[0].addr, "127.0.0.1:9443");
    }

    #[test]
    fn test_malformed_endpoint_is_skipped() {
        let instances = vec![
            instance("1", "grpc://bad host:1"),
            instance("2", "grpc://127.0.0.1:9000"),
        ];
        let addrs = build_addresses(&instances, &options(0, true));
        assert_eq!(addrs.len(), 1);
        assert_eq!(addrs[0].instance.id, "2");
    }

    #[test]
    fn test_subset_bounds_address_count() {
        let instances: Vec<_> = (0..40)
            .map(|i| instance(&i.to_string(), &format!("grpc://10.0.0.{}:9000", i)))
            .collect();
        let first = build_addresses(&instances, &options(10, true));
        let second = build_addresses(&instances, &options(10, true));
        assert_eq!(first.len(), 10);
        let a: HashSet<_> = first.iter().map(|a| a.addr.clone()).collect();
        let b: HashSet<_> = second.iter().map(|a| a.addr.clone()).collect();
        assert_eq!(a, b);
    }
}
