use serde::{Deserialize, Serialize};

use crate::error::{DiscoveryError, Result};
use crate::selector::BalancerKind;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub balancer: BalancerKind,
}

/// 数据中心模式
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatacenterMode {
    /// 只查询本地（或指定）数据中心
    #[default]
    Single,
    /// 依次查询所有数据中心并合并结果
    Multi,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub address: String,
    pub token: Option<String>,
    /// 单数据中心模式下的数据中心名，为空时使用 agent 所在数据中心
    pub datacenter: Option<String>,
    pub datacenter_mode: DatacenterMode,
    /// 健康检查间隔（秒）
    pub healthcheck_interval: u64,
    /// 检查持续 critical 多久后注销（秒）
    pub deregister_critical_service_after: u64,
    pub heartbeat: bool,
    pub enable_health_check: bool,
    /// 首次解析的超时（秒）
    pub timeout: u64,
    pub passing_only: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8500".to_string(),
            token: None,
            datacenter: None,
            datacenter_mode: DatacenterMode::Single,
            healthcheck_interval: 10,
            deregister_critical_service_after: 600,
            heartbeat: true,
            enable_health_check: true,
            timeout: 10,
            passing_only: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// 创建 watcher 的超时（秒）
    pub timeout: u64,
    /// 为 true 时解析 `grpc://` endpoint，否则解析 `grpcs://`
    pub insecure: bool,
    /// 子集大小，0 表示不做子集选择
    pub subset_size: usize,
    pub debug_log: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            timeout: 10,
            insecure: true,
            subset_size: 25,
            debug_log: false,
        }
    }
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DiscoveryError::Config(format!("read {}: {}", path, e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| DiscoveryError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_sections_missing() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.registry.healthcheck_interval, 10);
        assert_eq!(config.registry.datacenter_mode, DatacenterMode::Single);
        assert_eq!(config.resolver.subset_size, 25);
        assert_eq!(config.balancer, BalancerKind::WeightedRoundRobin);
    }

    #[test]
    fn test_partial_override() {
        let config = Config::from_toml(
            r#"
            balancer = "random"

            [registry]
            address = "http://consul:8500"
            datacenter_mode = "multi"
            heartbeat = false

            [resolver]
            subset_size = 0
            insecure = false
            "#,
        )
        .unwrap();
        assert_eq!(config.registry.address, "http://consul:8500");
        assert_eq!(config.registry.datacenter_mode, DatacenterMode::Multi);
        assert!(!config.registry.heartbeat);
        assert_eq!(config.registry.timeout, 10);
        assert_eq!(config.resolver.subset_size, 0);
        assert!(!config.resolver.insecure);
        assert_eq!(config.balancer, BalancerKind::Random);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = Config::from_toml("registry = 3").unwrap_err();
        assert!(matches!(err, DiscoveryError::Config(_)));
    }
}
