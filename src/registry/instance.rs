//! 服务实例定义

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 服务实例
///
/// 一次快照中的实例不可变；新的快照整体替换旧快照，而不是原地修改。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceInstance {
    /// 注册 ID（快照内唯一）
    pub id: String,

    /// 逻辑服务名
    pub name: String,

    /// 版本（自由格式，用于过滤）
    pub version: String,

    /// 元数据
    pub metadata: HashMap<String, String>,

    /// 每种传输协议一个 endpoint，如 `grpc://127.0.0.1:9000`、`http://127.0.0.1:8000`
    pub endpoints: Vec<String>,
}

impl ServiceInstance {
    /// 创建新的服务实例
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// 设置版本
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// 添加元数据
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 添加 endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoints.push(endpoint.into());
        self
    }
}
