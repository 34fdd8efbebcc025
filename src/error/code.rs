//! 错误代码和错误类别定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误代码枚举
///
/// 错误代码按类别分组，每个类别占用1000个代码范围：
/// - 1000-1999: 注册中心相关错误
/// - 2000-2999: 名称解析相关错误
/// - 3000-3999: 负载均衡相关错误
/// - 6000-6999: 系统相关错误
/// - 8000-8999: 序列化相关错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ErrorCode {
    // ============================================================
    // 注册中心相关错误 (1000-1999)
    // ============================================================
    RegistryUnavailable = 1000,
    RegistryRejected = 1001,

    // ============================================================
    // 名称解析相关错误 (2000-2999)
    // ============================================================
    WatcherCreateTimeout = 2000,
    InvalidEndpoint = 2001,
    InvalidTarget = 2002,
    WatcherCanceled = 2003,

    // ============================================================
    // 负载均衡相关错误 (3000-3999)
    // ============================================================
    NoAvailableNode = 3000,
    EmptyCircle = 3001,

    // ============================================================
    // 系统相关错误 (6000-6999)
    // ============================================================
    ConfigurationError = 6000,
    TransportError = 6001,

    // ============================================================
    // 序列化相关错误 (8000-8999)
    // ============================================================
    DeserializationError = 8000,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorCode {
    /// 获取错误代码的数字值
    #[inline]
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// 获取错误代码的英文标识符
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::RegistryUnavailable => "REGISTRY_UNAVAILABLE",
            ErrorCode::RegistryRejected => "REGISTRY_REJECTED",
            ErrorCode::WatcherCreateTimeout => "WATCHER_CREATE_TIMEOUT",
            ErrorCode::InvalidEndpoint => "INVALID_ENDPOINT",
            ErrorCode::InvalidTarget => "INVALID_TARGET",
            ErrorCode::WatcherCanceled => "WATCHER_CANCELED",
            ErrorCode::NoAvailableNode => "NO_AVAILABLE_NODE",
            ErrorCode::EmptyCircle => "EMPTY_CIRCLE",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::TransportError => "TRANSPORT_ERROR",
            ErrorCode::DeserializationError => "DESERIALIZATION_ERROR",
        }
    }

    /// 获取错误代码的类别
    pub fn category(&self) -> ErrorCategory {
        match self.as_u32() {
            1000..=1999 => ErrorCategory::Registry,
            2000..=2999 => ErrorCategory::Resolver,
            3000..=3999 => ErrorCategory::Balancer,
            8000..=8999 => ErrorCategory::Serialization,
            _ => ErrorCategory::System,
        }
    }

    /// 判断是否为可重试的错误
    ///
    /// 同步调用方可据此实现自己的重试策略
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::RegistryUnavailable
                | ErrorCode::RegistryRejected
                | ErrorCode::TransportError
                | ErrorCode::DeserializationError
        )
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Registry,
    Resolver,
    Balancer,
    System,
    Serialization,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Registry => write!(f, "REGISTRY"),
            ErrorCategory::Resolver => write!(f, "RESOLVER"),
            ErrorCategory::Balancer => write!(f, "BALANCER"),
            ErrorCategory::System => write!(f, "SYSTEM"),
            ErrorCategory::Serialization => write!(f, "SERIALIZATION"),
        }
    }
}
