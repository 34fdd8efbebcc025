//! 把解析结果喂给 [`Selector`] 的客户端连接

use std::sync::Arc;

use async_trait::async_trait;

use super::conn::{ClientConn, State};
use crate::error::Result;
use crate::selector::{Node, Selector};

/// 将地址更新转换为加权节点并应用到选择器
pub struct SelectorConn {
    selector: Arc<Selector>,
    scheme: String,
}

impl SelectorConn {
    pub fn new(selector: Arc<Selector>) -> Self {
        Self {
            selector,
            scheme: "grpc".to_string(),
        }
    }

    /// 节点上记录的协议名
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn selector(&self) -> &Arc<Selector> {
        &self.selector
    }
}

#[async_trait]
impl ClientConn for SelectorConn {
    async fn update_state(&self, state: State) -> Result<()> {
        let nodes = state
            .addresses
            .into_iter()
            .map(|address| Node::new(self.scheme.clone(), address.addr, address.instance))
            .collect();
        self.selector.apply(nodes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::conn::ResolvedAddress;
    use crate::registry::ServiceInstance;
    use crate::selector::BalancerKind;

    #[tokio::test]
    async fn test_update_state_feeds_selector() {
        let selector = Arc::new(Selector::from_kind(BalancerKind::WeightedRoundRobin));
        let conn = SelectorConn::new(selector.clone());
        let instance = Arc::new(ServiceInstance::new("1", "echo").with_metadata("weight", "7"));
        conn.update_state(State {
            addresses: vec![ResolvedAddress {
                addr: "10.0.0.1:9000".to_string(),
                server_name: "echo".to_string(),
                attributes: instance.metadata.clone(),
                instance,
            }],
        })
        .await
        .unwrap();

        let (node, done) = selector.select(&[]).unwrap();
        assert_eq!(node.address(), "10.0.0.1:9000");
        assert_eq!(node.weight(), 7.0);
        assert_eq!(node.raw().scheme(), "grpc");
        done(Default::default());
    }
}
