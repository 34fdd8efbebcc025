//! Flare Discovery 错误处理模块
//!
//! 所有同步调用（`pick`、`register`、`deregister`、`service`）直接返回 [`DiscoveryError`]；
//! 后台循环只在 [`DiscoveryError::Canceled`] 时退出，其余错误记录日志后继续。

pub mod code;

pub use code::{ErrorCategory, ErrorCode};

use thiserror::Error;

/// 服务发现统一错误类型
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// 负载均衡器收到空节点列表
    #[error("no available node")]
    NoAvailable,

    /// 哈希环没有任何成员
    #[error("empty circle")]
    EmptyCircle,

    /// 创建 watcher 超时（resolver 构建失败）
    #[error("discovery create watcher overtime")]
    WatcherCreateTimeout,

    /// 上下文已取消，属于正常关闭信号
    #[error("context canceled")]
    Canceled,

    /// endpoint URL 无法解析
    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// 目标地址格式错误（如 `discovery:///name`）
    #[error("invalid target {0}")]
    InvalidTarget(String),

    /// 注册中心 HTTP 请求失败
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// 注册中心返回非 2xx 状态
    #[error("registry responded {status}: {body}")]
    Status { status: u16, body: String },

    /// 响应体解析失败
    #[error("decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    /// 配置错误
    #[error("configuration error: {0}")]
    Config(String),

    /// 下游连接（如 tonic channel）更新失败
    #[error("transport error: {0}")]
    Transport(String),
}

impl DiscoveryError {
    /// 创建 endpoint 解析错误
    pub fn invalid_endpoint(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        DiscoveryError::InvalidEndpoint {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    /// 是否为取消信号（后台循环据此静默退出）
    pub fn is_canceled(&self) -> bool {
        matches!(self, DiscoveryError::Canceled)
    }

    /// 是否为注册中心的 404 响应（注销时视为已不存在）
    pub fn is_not_found(&self) -> bool {
        matches!(self, DiscoveryError::Status { status: 404, .. })
    }

    /// 错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            DiscoveryError::NoAvailable => ErrorCode::NoAvailableNode,
            DiscoveryError::EmptyCircle => ErrorCode::EmptyCircle,
            DiscoveryError::WatcherCreateTimeout => ErrorCode::WatcherCreateTimeout,
            DiscoveryError::Canceled => ErrorCode::WatcherCanceled,
            DiscoveryError::InvalidEndpoint { .. } => ErrorCode::InvalidEndpoint,
            DiscoveryError::InvalidTarget(_) => ErrorCode::InvalidTarget,
            DiscoveryError::Http(_) => ErrorCode::RegistryUnavailable,
            DiscoveryError::Status { .. } => ErrorCode::RegistryRejected,
            DiscoveryError::Decode(_) => ErrorCode::DeserializationError,
            DiscoveryError::Config(_) => ErrorCode::ConfigurationError,
            DiscoveryError::Transport(_) => ErrorCode::TransportError,
        }
    }
}

/// 服务发现结果类型
pub type Result<T> = std::result::Result<T, DiscoveryError>;
