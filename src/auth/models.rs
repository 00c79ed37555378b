use serde::{Deserialize, Serialize};

use crate::model::UserRole;

/// 令牌种类
///
/// 访问令牌与刷新令牌共用一套编码，但通过 token_type 声明区分，
/// 校验时先验签名再验种类，两种令牌永不互换。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    AccessToken,
    RefreshToken,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessToken => "AccessToken",
            Self::RefreshToken => "RefreshToken",
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// JWT Claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// JWT 标准字段 - 签发者
    pub iss: String,
    /// JWT 标准字段 - 主题 (用户ID)
    pub sub: String,
    /// JWT 标准字段 - 受众
    pub aud: String,
    /// JWT 标准字段 - 过期时间 (Unix timestamp)
    pub exp: i64,
    /// JWT 标准字段 - 签发时间
    pub iat: i64,

    /// 用户名
    pub username: String,

    /// 用户角色（仅访问令牌携带）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<UserRole>,

    /// 是否首次登录（仅访问令牌携带）
    #[serde(default)]
    pub is_first_login: bool,

    /// 绑定的设备ID（可选）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<i64>,

    /// 令牌种类判别字段（必选，校验时强制比对）
    pub token_type: TokenKind,

    /// 随机唯一标记（仅刷新令牌携带，保证同一秒签发的刷新令牌互不相同）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl TokenClaims {
    /// 解析 sub 字段中的用户ID
    pub fn user_id(&self) -> Option<i64> {
        self.sub.parse::<i64>().ok()
    }
}
