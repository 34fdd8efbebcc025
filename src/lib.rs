//! Flare Discovery
//!
//! 客户端侧的服务注册发现与负载均衡：
//! - [`registry`]：基于 Consul 阻塞查询的注册、注销、心跳与服务发现
//! - [`discovery`]：把注册中心的变化转换为 gRPC 客户端可用的地址列表
//! - [`consistent`] / [`subset`]：一致性哈希环与低抖动子集选择
//! - [`selector`]：随机、平滑加权轮询负载均衡与节点过滤

pub mod config;
pub mod consistent;
pub mod discovery;
pub mod error;
pub mod registry;
pub mod selector;
pub mod subset;

// Re-exports
pub use config::{Config, DatacenterMode, RegistryConfig, ResolverConfig};
pub use consistent::{Consistent, HashKind, Member};
pub use discovery::{
    ChannelConn, ClientConn, DiscoveryBuilder, DiscoveryResolver, ResolvedAddress, Resolver,
    SelectorConn, State, Target,
};
pub use error::{DiscoveryError, ErrorCategory, ErrorCode, Result};
pub use registry::{
    Client, ConsulRegistry, Discovery, Registrar, ServiceInstance, Watcher,
};
pub use selector::{
    Balancer, BalancerKind, DoneFunc, DoneInfo, Node, NodeFilter, RandomBalancer, Selector,
    WeightedNode, WrrBalancer,
};
pub use subset::subset;
