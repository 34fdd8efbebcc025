//! 名称解析插件接口
//!
//! [`Builder`] 按 scheme 注册，为每个目标创建一个 [`Resolver`]；
//! resolver 把解析出的地址列表发布给所属的 [`ClientConn`]。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::builder::Target;
use crate::error::Result;
use crate::registry::ServiceInstance;

/// 已解析的地址
#[derive(Debug, Clone)]
pub struct ResolvedAddress {
    /// `host:port`
    pub addr: String,
    /// TLS 校验用的服务名
    pub server_name: String,
    /// 实例元数据
    pub attributes: HashMap<String, String>,
    /// 原始实例
    pub instance: Arc<ServiceInstance>,
}

/// 发布给客户端连接的状态
#[derive(Debug, Clone, Default)]
pub struct State {
    pub addresses: Vec<ResolvedAddress>,
}

/// 接收地址更新的客户端连接
#[async_trait]
pub trait ClientConn: Send + Sync {
    /// 用新的地址列表整体替换旧列表
    async fn update_state(&self, state: State) -> Result<()>;
}

/// 名称解析器
#[async_trait]
pub trait Resolver: Send {
    /// 立即重新解析（watch 驱动的实现无需处理）
    fn resolve_now(&self);

    /// 停止解析并等待后台任务结束
    async fn close(&mut self);
}

/// 解析器工厂
#[async_trait]
pub trait Builder: Send + Sync {
    /// 处理的 scheme
    fn scheme(&self) -> &str;

    async fn build(&self, target: &Target, conn: Arc<dyn ClientConn>) -> Result<Box<dyn Resolver>>;
}
