//! 平滑加权轮询（nginx smooth weighted round robin）
//!
//! 每轮给所有候选的当前权重加上其有效权重，选出当前权重最大者，
//! 再从它的当前权重中减去本轮有效权重之和。权重大的节点被选中得更频繁，
//! 但不会连续扎堆。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use super::Balancer;
use super::node::{DoneFunc, WeightedNode};
use crate::error::{DiscoveryError, Result};

/// 平滑加权轮询负载均衡器
#[derive(Debug, Default)]
pub struct WrrBalancer {
    /// 地址 -> 当前权重
    current_weight: Mutex<HashMap<String, f64>>,
}

impl WrrBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Balancer for WrrBalancer {
    fn pick(&self, nodes: &[Arc<dyn WeightedNode>]) -> Result<(Arc<dyn WeightedNode>, DoneFunc)> {
        if nodes.is_empty() {
            return Err(DiscoveryError::NoAvailable);
        }

        let mut current_weight = self
            .current_weight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut total_weight = 0.0;
        let mut selected: Option<(usize, f64)> = None;
        for (index, node) in nodes.iter().enumerate() {
            let weight = node.weight();
            total_weight += weight;
            let current = current_weight.entry(node.address().to_string()).or_insert(0.0);
            *current += weight;
            // 相同权重时取输入顺序中的第一个
            if selected.is_none_or(|(_, max)| *current > max) {
                selected = Some((index, *current));
            }
        }

        let Some((index, _)) = selected else {
            return Err(DiscoveryError::NoAvailable);
        };
        let selected = nodes[index].clone();
        if let Some(current) = current_weight.get_mut(selected.address()) {
            *current -= total_weight;
        }
        drop(current_weight);

        let done = selected.pick();
        Ok((selected, done))
    }

    fn retain(&self, nodes: &[Arc<dyn WeightedNode>]) {
        let present: HashSet<&str> = nodes.iter().map(|node| node.address()).collect();
        self.current_weight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|address, _| present.contains(address.as_str()));
    }
}
