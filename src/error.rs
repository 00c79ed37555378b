use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;

/// 服务错误类型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerError {
    /// 内部错误
    Internal(String),
    /// 数据库错误
    Database(String),
    /// 序列化错误
    Serialization(String),
    /// 用户未找到
    UserNotFound(i64),
    /// 设备数量超限（绑定被策略拒绝）
    DeviceLimitExceeded(String),
    /// 踢出设备失败（强制绑定时不允许静默超限）
    KickoutFailed(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Internal(msg) => write!(f, "Internal error: {}", msg),
            ServerError::Database(msg) => write!(f, "Database error: {}", msg),
            ServerError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            ServerError::UserNotFound(id) => write!(f, "User not found: {}", id),
            ServerError::DeviceLimitExceeded(msg) => write!(f, "Device limit exceeded: {}", msg),
            ServerError::KickoutFailed(msg) => write!(f, "Device kickout failed: {}", msg),
        }
    }
}

impl StdError for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::Serialization(err.to_string())
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ServerError>;

/// 数据库错误类型别名
pub type DatabaseError = ServerError;
