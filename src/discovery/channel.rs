//! 把解析结果喂给 tonic 负载均衡 channel 的客户端连接
//!
//! 每次发布的地址列表与上一次比较，差异以 `Change` 事件发送给
//! `Channel::balance_channel` 返回的 sender。

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tonic::transport::channel::Change;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info};

use super::conn::{ClientConn, State};
use crate::error::{DiscoveryError, Result};

type EndpointConfigurer = Arc<dyn Fn(Endpoint) -> Endpoint + Send + Sync>;

/// 驱动 tonic `balance_channel` 的客户端连接
pub struct ChannelConn {
    sender: mpsc::Sender<Change<String, Endpoint>>,
    current: Mutex<HashSet<String>>,
    secure: bool,
    configure: EndpointConfigurer,
}

impl ChannelConn {
    /// 创建连接与对应的负载均衡 channel
    pub fn new(capacity: usize) -> (Self, Channel) {
        let (channel, sender) = Channel::balance_channel::<String>(capacity.max(1));
        (
            Self {
                sender,
                current: Mutex::new(HashSet::new()),
                secure: false,
                configure: Arc::new(|endpoint| endpoint),
            },
            channel,
        )
    }

    /// 使用 https 连接（需要在 `with_endpoint_config` 中配置 TLS）
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// 对每个新建的 endpoint 做额外配置（超时、TLS 等）
    pub fn with_endpoint_config<F>(mut self, configure: F) -> Self
    where
        F: Fn(Endpoint) -> Endpoint + Send + Sync + 'static,
    {
        self.configure = Arc::new(configure);
        self
    }

    fn endpoint(&self, addr: &str) -> Result<Endpoint> {
        let scheme = if self.secure { "https" } else { "http" };
        let endpoint = Endpoint::from_shared(format!("{}://{}", scheme, addr))
            .map_err(|e| DiscoveryError::invalid_endpoint(addr, e))?;
        Ok((self.configure)(endpoint))
    }

    async fn send(&self, change: Change<String, Endpoint>) -> Result<()> {
        self.sender
            .send(change)
            .await
            .map_err(|_| DiscoveryError::Transport("balance channel closed".to_string()))
    }
}

#[async_trait]
impl ClientConn for ChannelConn {
    async fn update_state(&self, state: State) -> Result<()> {
        let mut current = self.current.lock().await;
        let next: HashSet<String> = state.addresses.into_iter().map(|a| a.addr).collect();

        for removed in current.difference(&next) {
            debug!(addr = %removed, "Removing endpoint from balance channel");
            self.send(Change::Remove(removed.clone())).await?;
        }
        let mut added = 0;
        for addr in next.difference(&current) {
            let endpoint = self.endpoint(addr)?;
            self.send(Change::Insert(addr.clone(), endpoint)).await?;
            added += 1;
        }

        info!(total = next.len(), added, "Balance channel endpoints updated");
        *current = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::conn::ResolvedAddress;
    use crate::registry::ServiceInstance;

    fn state(addrs: &[&str]) -> State {
        State {
            addresses: addrs
                .iter()
                .map(|addr| {
                    let instance = Arc::new(ServiceInstance::new(*addr, "echo"));
                    ResolvedAddress {
                        addr: addr.to_string(),
                        server_name: "echo".to_string(),
                        attributes: Default::default(),
                        instance,
                    }
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_diff_into_changes() {
        let (tx, mut rx) = mpsc::channel(16);
        let conn = ChannelConn {
            sender: tx,
            current: Mutex::new(HashSet::new()),
            secure: false,
            configure: Arc::new(|endpoint| endpoint),
        };

        conn.update_state(state(&["127.0.0.1:1", "127.0.0.1:2"])).await.unwrap();
        let mut inserted = Vec::new();
        for _ in 0..2 {
            match rx.recv().await.unwrap() {
                Change::Insert(key, endpoint) => {
                    assert_eq!(endpoint.uri().scheme_str(), Some("http"));
                    assert_eq!(endpoint.uri().authority().unwrap().as_str(), key);
                    inserted.push(key);
                }
                Change::Remove(_) => panic!("unexpected remove"),
            }
        }
        inserted.sort();
        assert_eq!(inserted, vec!["127.0.0.1:1", "127.0.0.1:2"]);

        conn.update_state(state(&["127.0.0.1:2", "127.0.0.1:3"])).await.unwrap();
        assert!(matches!(rx.recv().await.unwrap(), Change::Remove(key) if key == "127.0.0.1:1"));
        assert!(matches!(rx.recv().await.unwrap(), Change::Insert(key, _) if key == "127.0.0.1:3"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_updates_reach_balance_channel() {
        let (conn, _channel) = ChannelConn::new(16);

        conn.update_state(state(&["127.0.0.1:1", "127.0.0.1:2"])).await.unwrap();
        conn.update_state(state(&["127.0.0.1:2"])).await.unwrap();
        conn.update_state(state(&[])).await.unwrap();
        assert!(conn.current.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_address_is_rejected() {
        let (conn, _channel) = ChannelConn::new(16);
        let err = conn.update_state(state(&["bad host:1"])).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidEndpoint { .. }));
        assert!(conn.current.lock().await.is_empty());
    }
}
