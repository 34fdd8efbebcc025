//! gRPC 名称解析
//!
//! 通过 [`DiscoveryBuilder`] 把 `discovery:///<service>` 目标解析为实时地址列表：
//! watch 注册中心变化，按协议解析 endpoint，去重并做子集选择，再发布给 [`ClientConn`]。
//! 现成的连接实现有两种：
//! - [`SelectorConn`]：喂给 [`crate::selector::Selector`]，由调用方逐次选择节点
//! - [`ChannelConn`]：喂给 tonic 的 `Channel::balance_channel`

pub mod balancer;
pub mod builder;
pub mod channel;
pub mod conn;
pub mod endpoint;
pub mod resolver;

pub use balancer::SelectorConn;
pub use builder::{DiscoveryBuilder, SCHEME, Target};
pub use channel::ChannelConn;
pub use conn::{Builder, ClientConn, ResolvedAddress, Resolver, State};
pub use endpoint::{new_endpoint, parse_endpoint, scheme};
pub use resolver::{DiscoveryResolver, ResolveOptions, build_addresses};
