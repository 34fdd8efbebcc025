//! 负载均衡框架
//!
//! - [`Balancer`]：从候选节点中选出一个，支持多个调用方并发使用
//! - [`Selector`]：持有当前节点列表、全局过滤器和负载均衡器
//! - 策略：[`RandomBalancer`]（等概率随机）、[`WrrBalancer`]（平滑加权轮询）

pub mod filter;
pub mod node;
pub mod random;
pub mod wrr;

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{DiscoveryError, Result};
pub use filter::NodeFilter;
pub use node::{
    DEFAULT_WEIGHT, DefaultNode, DefaultNodeBuilder, DoneFunc, DoneInfo, Node, WeightedNode,
    WeightedNodeBuilder,
};
pub use random::RandomBalancer;
pub use wrr::WrrBalancer;

/// 负载均衡器
pub trait Balancer: Send + Sync {
    /// 选出一个节点，并返回调用结束后必须调用一次的回调
    ///
    /// 节点列表为空时返回 [`DiscoveryError::NoAvailable`]。
    fn pick(&self, nodes: &[Arc<dyn WeightedNode>]) -> Result<(Arc<dyn WeightedNode>, DoneFunc)>;

    /// 节点列表整体替换后调用，只保留仍在列表中的节点状态
    ///
    /// `pick` 收到的是过滤后的子集，不能据此清理状态。
    fn retain(&self, _nodes: &[Arc<dyn WeightedNode>]) {}
}

/// 负载均衡策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalancerKind {
    /// 等概率随机
    Random,
    /// 平滑加权轮询
    #[default]
    #[serde(alias = "wrr")]
    WeightedRoundRobin,
}

impl BalancerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalancerKind::Random => "random",
            BalancerKind::WeightedRoundRobin => "weighted_round_robin",
        }
    }

    /// 创建对应的负载均衡器
    pub fn build(&self) -> Arc<dyn Balancer> {
        match self {
            BalancerKind::Random => Arc::new(RandomBalancer),
            BalancerKind::WeightedRoundRobin => Arc::new(WrrBalancer::new()),
        }
    }
}

impl fmt::Display for BalancerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BalancerKind {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(BalancerKind::Random),
            "wrr" | "weighted_round_robin" => Ok(BalancerKind::WeightedRoundRobin),
            other => Err(DiscoveryError::Config(format!("unknown balancer: {}", other))),
        }
    }
}

/// 节点选择器
///
/// 节点列表整体替换（[`Selector::apply`]），读取方拿到的是不可变快照。
pub struct Selector {
    balancer: Arc<dyn Balancer>,
    builder: Arc<dyn WeightedNodeBuilder>,
    filters: Vec<NodeFilter>,
    nodes: RwLock<Arc<Vec<Arc<dyn WeightedNode>>>>,
}

impl Selector {
    pub fn new(balancer: Arc<dyn Balancer>) -> Self {
        Self {
            balancer,
            builder: Arc::new(DefaultNodeBuilder),
            filters: Vec::new(),
            nodes: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// 按策略创建
    pub fn from_kind(kind: BalancerKind) -> Self {
        Self::new(kind.build())
    }

    /// 每次选择都会应用的全局过滤器
    pub fn with_filters(mut self, filters: Vec<NodeFilter>) -> Self {
        self.filters = filters;
        self
    }

    /// 替换加权节点的构造方式
    pub fn with_node_builder(mut self, builder: Arc<dyn WeightedNodeBuilder>) -> Self {
        self.builder = builder;
        self
    }

    /// 用新的节点列表替换当前列表
    pub fn apply(&self, nodes: Vec<Node>) {
        let weighted: Vec<Arc<dyn WeightedNode>> =
            nodes.into_iter().map(|node| self.builder.build(node)).collect();
        self.balancer.retain(&weighted);
        *self.nodes.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(weighted);
    }

    /// 当前节点快照
    pub fn nodes(&self) -> Arc<Vec<Arc<dyn WeightedNode>>> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 依次应用全局过滤器与本次调用的过滤器，再交给负载均衡器
    pub fn select(&self, filters: &[NodeFilter]) -> Result<(Arc<dyn WeightedNode>, DoneFunc)> {
        let nodes = self.nodes();
        if nodes.is_empty() {
            return Err(DiscoveryError::NoAvailable);
        }
        let candidates = filter::apply(&self.filters, nodes.as_ref().clone());
        let candidates = filter::apply(filters, candidates);
        if candidates.is_empty() {
            return Err(DiscoveryError::NoAvailable);
        }
        self.balancer.pick(&candidates)
    }
}
