//! 随机负载均衡

use std::sync::Arc;

use rand::Rng;

use super::Balancer;
use super::node::{DoneFunc, WeightedNode};
use crate::error::{DiscoveryError, Result};

/// 等概率随机选择，无状态
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomBalancer;

impl Balancer for RandomBalancer {
    fn pick(&self, nodes: &[Arc<dyn WeightedNode>]) -> Result<(Arc<dyn WeightedNode>, DoneFunc)> {
        if nodes.is_empty() {
            return Err(DiscoveryError::NoAvailable);
        }
        let index = rand::thread_rng().gen_range(0..nodes.len());
        let selected = nodes[index].clone();
        let done = selected.pick();
        Ok((selected, done))
    }
}
