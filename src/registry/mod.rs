//! 服务注册发现模块
//!
//! 定义注册（[`Registrar`]）、发现（[`Discovery`]）与变更订阅（[`Watcher`]）三个能力接口，
//! 以及基于 Consul 阻塞查询的实现。

pub mod consul;
pub mod instance;

use async_trait::async_trait;

use crate::error::Result;
pub use consul::{Client, ConsulRegistry, DatacenterMode};
pub use instance::ServiceInstance;

/// 服务注册接口
#[async_trait]
pub trait Registrar: Send + Sync {
    /// 注册服务实例
    async fn register(&self, instance: &ServiceInstance) -> Result<()>;

    /// 注销服务实例
    async fn deregister(&self, instance: &ServiceInstance) -> Result<()>;
}

/// 服务发现接口
#[async_trait]
pub trait Discovery: Send + Sync {
    /// 获取服务当前的实例列表
    async fn get_service(&self, name: &str) -> Result<Vec<ServiceInstance>>;

    /// 订阅服务实例变化
    async fn watch(&self, name: &str) -> Result<Box<dyn Watcher>>;
}

/// 服务变更订阅
///
/// `next` 按顺序返回实例集合快照，阻塞直到发生变化或出错；
/// 同一时刻只允许一个未完成的 `next` 调用（由 `&mut self` 保证）。
#[async_trait]
pub trait Watcher: Send + Sync {
    /// 等待下一次快照
    ///
    /// 订阅被停止后返回 [`crate::DiscoveryError::Canceled`]
    async fn next(&mut self) -> Result<Vec<ServiceInstance>>;

    /// 停止订阅（幂等）
    async fn stop(&self) -> Result<()>;
}
