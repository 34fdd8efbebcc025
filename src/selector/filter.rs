//! 节点过滤器
//!
//! 过滤在调用 `pick` 之前执行，负载均衡器本身不感知过滤条件。

use std::sync::Arc;

use super::node::WeightedNode;

/// 节点过滤器：保留满足条件的节点并维持原有顺序
pub type NodeFilter =
    Arc<dyn Fn(Vec<Arc<dyn WeightedNode>>) -> Vec<Arc<dyn WeightedNode>> + Send + Sync>;

/// 只保留指定版本的节点
pub fn version(version: impl Into<String>) -> NodeFilter {
    let version = version.into();
    Arc::new(move |nodes| {
        nodes
            .into_iter()
            .filter(|node| node.raw().version() == version)
            .collect()
    })
}

/// 只保留元数据 `key` 等于 `value` 的节点
pub fn metadata(key: impl Into<String>, value: impl Into<String>) -> NodeFilter {
    let key = key.into();
    let value = value.into();
    Arc::new(move |nodes| {
        nodes
            .into_iter()
            .filter(|node| node.raw().metadata().get(&key) == Some(&value))
            .collect()
    })
}

/// 依次应用过滤器
pub fn apply(filters: &[NodeFilter], mut nodes: Vec<Arc<dyn WeightedNode>>) -> Vec<Arc<dyn WeightedNode>> {
    for filter in filters {
        if nodes.is_empty() {
            break;
        }
        nodes = filter(nodes);
    }
    nodes
}
