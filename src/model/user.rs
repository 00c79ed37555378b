use serde::{Deserialize, Serialize};

/// 用户角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserRole {
    Student,
    Teacher,
    Administrator,
}

impl UserRole {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "teacher" => Self::Teacher,
            "administrator" | "admin" => Self::Administrator,
            _ => Self::Student,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "Student",
            Self::Teacher => "Teacher",
            Self::Administrator => "Administrator",
        }
    }

    /// 管理员不受设备数量限制约束
    pub fn is_device_limit_exempt(&self) -> bool {
        matches!(self, Self::Administrator)
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 用户记录（由外部用户系统提供，本服务只读）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub role: UserRole,
    pub is_active: bool,
    pub is_first_login: bool,
}
