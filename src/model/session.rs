use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::device::DeviceInfo;

/// 会话类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionType {
    /// JWT 令牌会话
    JwtToken,
    /// Cookie 会话
    Cookie,
}

impl SessionType {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "cookie" => Self::Cookie,
            _ => Self::JwtToken,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JwtToken => "jwt_token",
            Self::Cookie => "cookie",
        }
    }
}

/// 会话记录
///
/// 撤销与审计用途的登记行。认证本身由令牌签名无状态完成，
/// 会话记录只回答"哪些认证上下文当前被视为在线"。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSession {
    /// 会话ID（数据库主键）
    pub id: i64,

    /// 所属用户ID
    pub user_id: i64,

    /// 关联设备ID（可空）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<i64>,

    /// 会话查找键（超长 JWT 会被替换为紧凑标识，见 SessionManager）
    pub session_token: String,

    /// 刷新令牌（可空）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// 会话类型
    pub session_type: SessionType,

    /// 客户端 IP
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,

    /// 客户端 UA
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    /// 客户端位置
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// 创建时间
    pub created_at: DateTime<Utc>,

    /// 最后活动时间
    pub last_activity_at: DateTime<Utc>,

    /// 过期时间
    pub expires_at: DateTime<Utc>,

    /// 是否活跃
    pub is_active: bool,

    /// 登出时间（主动登出、被踢或清理时写入）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logout_at: Option<DateTime<Utc>>,
}

impl UserSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// 会话列表项（含关联设备）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: i64,
    pub session_type: SessionType,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub device: Option<DeviceInfo>,
}

/// 会话统计信息（活跃且未过期的快照聚合）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStatistics {
    /// 活跃会话总数
    pub total_active_sessions: u64,
    /// JWT 会话数
    pub jwt_sessions: u64,
    /// Cookie 会话数
    pub cookie_sessions: u64,
    /// 今日新建会话数
    pub today_new_sessions: u64,
    /// 在线用户数（去重）
    pub online_users: u64,
}
