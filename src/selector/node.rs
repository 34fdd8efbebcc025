//! 负载均衡节点
//!
//! [`Node`] 是一次解析结果中的单个地址；[`WeightedNode`] 在其上附加权重与选中时间，
//! 由负载均衡器使用。

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use crate::registry::ServiceInstance;

/// 未配置 `weight` 元数据时的默认权重
pub const DEFAULT_WEIGHT: f64 = 100.0;

/// 元数据中权重的键
pub const WEIGHT_METADATA_KEY: &str = "weight";

/// 一次调用完成后的反馈
#[derive(Debug, Clone, Default)]
pub struct DoneInfo {
    /// 调用失败时的错误描述
    pub err: Option<String>,
    /// 请求是否已发出
    pub bytes_sent: bool,
    /// 是否收到了响应
    pub bytes_received: bool,
    /// 调用耗时
    pub elapsed: Duration,
}

/// 调用方在调用结束后必须恰好调用一次的回调
pub type DoneFunc = Box<dyn FnOnce(DoneInfo) + Send>;

/// 不需要反馈的策略使用的空回调
pub fn noop_done() -> DoneFunc {
    Box::new(|_| {})
}

/// 可选择的地址
#[derive(Debug, Clone)]
pub struct Node {
    scheme: String,
    address: String,
    service_name: String,
    version: String,
    metadata: HashMap<String, String>,
    initial_weight: Option<f64>,
    instance: Arc<ServiceInstance>,
}

impl Node {
    /// 从解析出的地址和原始实例构造节点
    ///
    /// `weight` 元数据为正数时作为初始权重。
    pub fn new(scheme: impl Into<String>, address: impl Into<String>, instance: Arc<ServiceInstance>) -> Self {
        let initial_weight = instance
            .metadata
            .get(WEIGHT_METADATA_KEY)
            .and_then(|w| w.parse::<i64>().ok())
            .filter(|w| *w > 0)
            .map(|w| w as f64);
        Self {
            scheme: scheme.into(),
            address: address.into(),
            service_name: instance.name.clone(),
            version: instance.version.clone(),
            metadata: instance.metadata.clone(),
            initial_weight,
            instance,
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// 元数据中声明的权重
    pub fn initial_weight(&self) -> Option<f64> {
        self.initial_weight
    }

    /// 原始服务实例
    pub fn instance(&self) -> &Arc<ServiceInstance> {
        &self.instance
    }
}

/// 带权重的节点
pub trait WeightedNode: Send + Sync + fmt::Debug {
    /// 原始节点
    fn raw(&self) -> &Node;

    /// 当前有效权重
    fn weight(&self) -> f64;

    /// 标记节点被选中，返回调用结束后的回调
    fn pick(&self) -> DoneFunc;

    /// 距离上次被选中的时间
    fn pick_elapsed(&self) -> Duration;

    fn address(&self) -> &str {
        self.raw().address()
    }
}

/// 构造 [`WeightedNode`] 的工厂
pub trait WeightedNodeBuilder: Send + Sync {
    fn build(&self, node: Node) -> Arc<dyn WeightedNode>;
}

/// 进程内单调时钟（纳秒）
fn monotonic_nanos() -> i64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    i64::try_from(epoch.elapsed().as_nanos()).unwrap_or(i64::MAX)
}

/// 固定权重节点
pub struct DefaultNode {
    node: Node,
    weight: f64,
    last_pick: AtomicI64,
}

impl DefaultNode {
    pub fn new(node: Node) -> Self {
        let weight = node.initial_weight().unwrap_or(DEFAULT_WEIGHT);
        Self {
            node,
            weight,
            last_pick: AtomicI64::new(0),
        }
    }
}

impl fmt::Debug for DefaultNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultNode")
            .field("address", &self.node.address)
            .field("weight", &self.weight)
            .finish()
    }
}

impl WeightedNode for DefaultNode {
    fn raw(&self) -> &Node {
        &self.node
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn pick(&self) -> DoneFunc {
        self.last_pick.store(monotonic_nanos(), Ordering::Relaxed);
        noop_done()
    }

    fn pick_elapsed(&self) -> Duration {
        let elapsed = monotonic_nanos() - self.last_pick.load(Ordering::Relaxed);
        Duration::from_nanos(u64::try_from(elapsed).unwrap_or(0))
    }
}

/// [`DefaultNode`] 的工厂
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNodeBuilder;

impl WeightedNodeBuilder for DefaultNodeBuilder {
    fn build(&self, node: Node) -> Arc<dyn WeightedNode> {
        Arc::new(DefaultNode::new(node))
    }
}
