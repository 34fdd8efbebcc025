//! `discovery` scheme 的解析器工厂

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::warn;

use super::conn::{Builder, ClientConn, Resolver};
use super::resolver::{DiscoveryResolver, ResolveOptions};
use crate::config::ResolverConfig;
use crate::error::{DiscoveryError, Result};
use crate::registry::Discovery;

/// 注册的 scheme 名
pub const SCHEME: &str = "discovery";

/// 解析目标，形如 `discovery:///helloworld` 或 `discovery://authority/helloworld`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: String,
    pub authority: String,
    /// 服务名
    pub endpoint: String,
}

impl Target {
    pub fn parse(target: &str) -> Result<Self> {
        let (scheme, rest) = target
            .split_once("://")
            .ok_or_else(|| DiscoveryError::InvalidTarget(target.to_string()))?;
        let (authority, endpoint) = rest.split_once('/').unwrap_or(("", rest));
        let endpoint = endpoint.trim_matches('/');
        if scheme.is_empty() || endpoint.is_empty() {
            return Err(DiscoveryError::InvalidTarget(target.to_string()));
        }
        Ok(Self {
            scheme: scheme.to_string(),
            authority: authority.to_string(),
            endpoint: endpoint.to_string(),
        })
    }
}

/// 基于 [`Discovery`] 的解析器工厂
pub struct DiscoveryBuilder {
    discovery: Arc<dyn Discovery>,
    timeout: Duration,
    insecure: bool,
    subset_size: usize,
    debug_log: bool,
}

impl DiscoveryBuilder {
    /// 默认：10s 构建超时、明文 grpc、子集大小 25
    pub fn new(discovery: Arc<dyn Discovery>) -> Self {
        Self::from_config(discovery, &ResolverConfig::default())
    }

    pub fn from_config(discovery: Arc<dyn Discovery>, config: &ResolverConfig) -> Self {
        Self {
            discovery,
            timeout: Duration::from_secs(config.timeout),
            insecure: config.insecure,
            subset_size: config.subset_size,
            debug_log: config.debug_log,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// 子集大小，0 表示不做子集选择
    pub fn with_subset_size(mut self, size: usize) -> Self {
        self.subset_size = size;
        self
    }

    pub fn with_debug_log(mut self, debug_log: bool) -> Self {
        self.debug_log = debug_log;
        self
    }
}

#[async_trait]
impl Builder for DiscoveryBuilder {
    fn scheme(&self) -> &str {
        SCHEME
    }

    async fn build(&self, target: &Target, conn: Arc<dyn ClientConn>) -> Result<Box<dyn Resolver>> {
        let discovery = self.discovery.clone();
        let name = target.endpoint.clone();
        let mut pending = tokio::spawn(async move { discovery.watch(&name).await });

        let watcher = match timeout(self.timeout, &mut pending).await {
            Ok(joined) => joined.map_err(|e| DiscoveryError::Transport(e.to_string()))??,
            Err(_) => {
                // 超时后创建出来的 watcher 不再使用，需要停止
                let service = target.endpoint.clone();
                tokio::spawn(async move {
                    if let Ok(Ok(watcher)) = pending.await {
                        if let Err(e) = watcher.stop().await {
                            warn!(service = %service, error = %e, "Failed to stop late watcher");
                        }
                    }
                });
                return Err(DiscoveryError::WatcherCreateTimeout);
            }
        };

        let options = ResolveOptions {
            insecure: self.insecure,
            subset_size: self.subset_size,
            debug_log: self.debug_log,
            selector_key: uuid::Uuid::new_v4().to_string(),
        };
        Ok(Box::new(DiscoveryResolver::start(watcher, conn, options)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target() {
        let target = Target::parse("discovery:///helloworld").unwrap();
        assert_eq!(target.scheme, "discovery");
        assert_eq!(target.authority, "");
        assert_eq!(target.endpoint, "helloworld");

        let target = Target::parse("discovery://consul/helloworld").unwrap();
        assert_eq!(target.authority, "consul");
        assert_eq!(target.endpoint, "helloworld");
    }

    #[test]
    fn test_parse_invalid_target() {
        assert!(matches!(
            Target::parse("helloworld"),
            Err(DiscoveryError::InvalidTarget(_))
        ));
        assert!(Target::parse("discovery:///").is_err());
    }
}
