//! Consul 注册中心
//!
//! - [`api`]：Consul HTTP API 的最小封装
//! - [`Client`]：注册/注销、TTL 心跳与阻塞查询
//! - [`ConsulRegistry`]：面向 [`Registrar`](crate::registry::Registrar) /
//!   [`Discovery`](crate::registry::Discovery) 的实现

pub mod api;
mod client;
mod registry;

pub use crate::config::DatacenterMode;
pub use api::{AgentServiceCheck, ConsulApi, QueryMeta, QueryOptions, ServiceEntry};
pub use client::{Client, ServiceResolver, WAIT_TIME, default_resolver, ttl_check_id};
pub use registry::{ConsulRegistry, ConsulWatcher};
