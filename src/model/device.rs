use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 设备记录
///
/// 一台物理设备与一个账号的绑定关系。设备一旦停用即视为退役，
/// 不会重新激活（同一台物理设备重新绑定会产生新记录）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDevice {
    /// 设备ID（数据库主键）
    pub id: i64,

    /// 所属用户ID
    pub user_id: i64,

    /// 设备指纹（活跃设备之间唯一）
    pub device_fingerprint: String,

    /// 设备名称（用户可见，如 "Windows_20260805"）
    pub device_name: String,

    /// 设备类型 (windows/macos/web/...)
    pub device_type: String,

    /// 操作系统描述
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operating_system: Option<String>,

    /// 客户端/浏览器描述
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser_info: Option<String>,

    /// 最后登录 IP
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,

    /// 最后登录位置
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// 创建时间（首次绑定）
    pub created_at: DateTime<Utc>,

    /// 最后使用时间
    pub last_used_at: DateTime<Utc>,

    /// 是否活跃（停用即退役）
    pub is_active: bool,

    /// 是否受信任设备
    pub is_trusted: bool,

    /// 过期时间（None 表示永不过期）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl UserDevice {
    /// 判断设备是否已过期（未设置过期时间视为永久有效）
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at < now,
            None => false,
        }
    }
}

/// 设备绑定请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceBindRequest {
    /// 设备指纹
    pub device_fingerprint: String,

    /// 设备名称（可空，为空时由服务端生成默认名称）
    #[serde(default)]
    pub device_name: Option<String>,

    /// 设备类型
    pub device_type: String,

    /// 操作系统描述
    #[serde(default)]
    pub operating_system: Option<String>,

    /// 客户端/浏览器描述
    #[serde(default)]
    pub browser_info: Option<String>,
}

/// 设备绑定准入结果
///
/// 由准入策略评估产生，立即被绑定操作消费，不落库。
/// 策略拒绝是正常返回值而不是错误。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceBindResult {
    /// 是否允许绑定
    pub can_bind: bool,

    /// 是否需要先踢出旧设备（仅在 KickoutOldest 策略下为 true）
    pub requires_kickout: bool,

    /// 给调用方的可读原因
    pub reason: String,
}

impl DeviceBindResult {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            can_bind: true,
            requires_kickout: false,
            reason: reason.into(),
        }
    }

    pub fn require_kickout(reason: impl Into<String>) -> Self {
        Self {
            can_bind: true,
            requires_kickout: true,
            reason: reason.into(),
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            can_bind: false,
            requires_kickout: false,
            reason: reason.into(),
        }
    }
}

/// 设备列表项（对外投影）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: i64,
    pub device_name: String,
    pub device_type: String,
    pub operating_system: Option<String>,
    pub browser_info: Option<String>,
    pub ip_address: Option<String>,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub is_active: bool,
    pub is_trusted: bool,
}

impl From<&UserDevice> for DeviceInfo {
    fn from(device: &UserDevice) -> Self {
        Self {
            id: device.id,
            device_name: device.device_name.clone(),
            device_type: device.device_type.clone(),
            operating_system: device.operating_system.clone(),
            browser_info: device.browser_info.clone(),
            ip_address: device.ip_address.clone(),
            location: device.location.clone(),
            created_at: device.created_at,
            last_used_at: device.last_used_at,
            is_active: device.is_active,
            is_trusted: device.is_trusted,
        }
    }
}
