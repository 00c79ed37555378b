use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::auth::fingerprint;
use crate::config::{DeviceKickoutPolicy, DeviceSecurityConfig};
use crate::error::{Result, ServerError};
use crate::model::{DeviceBindRequest, DeviceBindResult, DeviceInfo, User, UserDevice};
use crate::repository::device_repo::{DeviceRepository, NewDevice};
use crate::repository::session_repo::SessionRepository;
use crate::repository::user_repo::UserRepository;

/// 设备注册服务
///
/// 负责账号下设备数量的准入控制与设备生命周期管理。
/// 设备停用时级联停用引用该设备的活跃会话。
///
/// 注意：准入评估与后续插入/踢出之间没有跨调用的原子性，
/// 同一用户的并发绑定可能短暂超出配置上限（check-then-act 竞态）。
/// 需要严格上限时应在数据库层加可串行化事务或按用户加咨询锁。
pub struct DeviceRegistry {
    devices: Arc<dyn DeviceRepository>,
    sessions: Arc<dyn SessionRepository>,
    users: Arc<dyn UserRepository>,
    config: DeviceSecurityConfig,
}

impl DeviceRegistry {
    pub fn new(
        devices: Arc<dyn DeviceRepository>,
        sessions: Arc<dyn SessionRepository>,
        users: Arc<dyn UserRepository>,
        config: DeviceSecurityConfig,
    ) -> Self {
        Self {
            devices,
            sessions,
            users,
            config,
        }
    }

    // =====================================================
    // 准入控制
    // =====================================================

    /// 评估用户是否允许绑定新设备
    ///
    /// 策略拒绝是正常返回值（can_bind = false + 原因），不是错误；
    /// 用户不存在才是硬错误。
    pub async fn evaluate_admission(&self, user_id: i64) -> Result<DeviceBindResult> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(ServerError::UserNotFound(user_id))?;

        self.evaluate_admission_for(&user).await
    }

    async fn evaluate_admission_for(&self, user: &User) -> Result<DeviceBindResult> {
        if !self.config.enable_device_limit {
            return Ok(DeviceBindResult::allow("未启用设备数量限制"));
        }

        if user.role.is_device_limit_exempt() {
            return Ok(DeviceBindResult::allow("管理员不受设备数量限制"));
        }

        let active_count = self.devices.count_active(user.id).await?;
        let max_count = self.config.max_device_count as i64;

        if active_count < max_count {
            return Ok(DeviceBindResult::allow("允许绑定"));
        }

        match self.config.kickout_policy {
            DeviceKickoutPolicy::KickoutOldest => Ok(DeviceBindResult::require_kickout(format!(
                "已达到最大设备绑定数量（{}台），将踢出最久未使用的设备",
                max_count
            ))),
            DeviceKickoutPolicy::RejectNew => Ok(DeviceBindResult::reject(format!(
                "已达到最大设备绑定数量（{}台），请先解绑其他设备后再登录",
                max_count
            ))),
        }
    }

    /// 踢出用户最久未使用的活跃设备，并级联停用其会话
    ///
    /// 用户没有活跃设备时返回 false。
    pub async fn kickout_oldest_device(&self, user_id: i64) -> Result<bool> {
        let oldest = match self.devices.oldest_active(user_id).await? {
            Some(device) => device,
            None => {
                debug!("用户没有可踢出的活跃设备: user_id={}", user_id);
                return Ok(false);
            }
        };

        if !self.devices.deactivate(oldest.id).await? {
            warn!(
                "踢出设备时设备已不再活跃: user_id={}, device_id={}",
                user_id, oldest.id
            );
            return Ok(false);
        }

        // 级联失效：设备停用后其会话一并停用
        let ended = self.sessions.end_for_device(oldest.id).await?;

        info!(
            "✅ 已踢出最久未使用设备: user_id={}, device_id={}, 级联结束 {} 个会话",
            user_id, oldest.id, ended
        );

        Ok(true)
    }

    // =====================================================
    // 设备绑定
    // =====================================================

    /// 绑定设备
    ///
    /// 流程：用户校验 → 准入评估 → （必要时）踢出最旧设备 →
    /// 同指纹幂等返回 → 跨用户指纹冲突改写 → 插入新设备。
    /// 踢出失败时绑定必须失败，不允许静默超限。
    pub async fn bind_device(
        &self,
        user_id: i64,
        request: &DeviceBindRequest,
        ip_address: Option<&str>,
        location: Option<&str>,
    ) -> Result<UserDevice> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(ServerError::UserNotFound(user_id))?;

        let admission = self.evaluate_admission_for(&user).await?;
        if !admission.can_bind {
            info!(
                "设备绑定被策略拒绝: user_id={}, reason={}",
                user_id, admission.reason
            );
            return Err(ServerError::DeviceLimitExceeded(admission.reason));
        }

        if admission.requires_kickout && !self.kickout_oldest_device(user_id).await? {
            return Err(ServerError::KickoutFailed(format!(
                "需要踢出旧设备但踢出失败: user_id={}",
                user_id
            )));
        }

        // 同一用户重复绑定同一指纹：幂等，刷新使用时间后返回现有记录
        if let Some(existing) = self
            .devices
            .find_active_by_user_and_fingerprint(user_id, &request.device_fingerprint)
            .await?
        {
            self.devices
                .touch(existing.id, ip_address, location)
                .await?;

            debug!(
                "设备已绑定，幂等返回: user_id={}, device_id={}",
                user_id, existing.id
            );

            return Ok(self
                .devices
                .find_by_id(existing.id)
                .await?
                .unwrap_or(existing));
        }

        // 指纹被其他用户的活跃设备占用：为当前用户派生新指纹，绝不合并身份
        let mut device_fingerprint = request.device_fingerprint.clone();
        if self
            .devices
            .fingerprint_held_by_other_user(&device_fingerprint, user_id)
            .await?
        {
            let resolved = self
                .resolve_unique_fingerprint(&device_fingerprint, user_id)
                .await?;
            warn!(
                "设备指纹冲突: user_id={}, 原指纹={}, 新指纹={}",
                user_id, device_fingerprint, resolved
            );
            device_fingerprint = resolved;
        }

        let device_name = match request.device_name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("{}_{}", request.device_type, Utc::now().format("%Y%m%d")),
        };

        let device = self
            .devices
            .insert(NewDevice {
                user_id,
                device_fingerprint,
                device_name,
                device_type: request.device_type.clone(),
                operating_system: request.operating_system.clone(),
                browser_info: request.browser_info.clone(),
                ip_address: ip_address.map(|s| s.to_string()),
                location: location.map(|s| s.to_string()),
                expires_at: Some(
                    Utc::now() + Duration::days(self.config.device_token_expiration_days),
                ),
            })
            .await?;

        info!(
            "✅ 为用户绑定新设备: user_id={}, device_id={}",
            user_id, device.id
        );

        Ok(device)
    }

    /// 派生未被占用的指纹：先试 100 个确定性后缀，全部占用则用时间戳后缀保底
    async fn resolve_unique_fingerprint(&self, original: &str, user_id: i64) -> Result<String> {
        for candidate in fingerprint::suffix_candidates(original, user_id) {
            if !self.devices.fingerprint_exists(&candidate).await? {
                return Ok(candidate);
            }
        }

        Ok(fingerprint::timestamp_fallback(original, user_id))
    }

    // =====================================================
    // 设备校验与查询
    // =====================================================

    /// 校验设备绑定：活跃、属于该用户、未过期
    ///
    /// 存储故障降级为 None（记录日志），不向调用方抛错。
    pub async fn validate_binding(&self, user_id: i64, device_fingerprint: &str) -> Option<UserDevice> {
        match self
            .devices
            .find_active_by_user_and_fingerprint(user_id, device_fingerprint)
            .await
        {
            Ok(Some(device)) => {
                if device.is_expired(Utc::now()) {
                    debug!(
                        "设备已过期: user_id={}, device_id={}",
                        user_id, device.id
                    );
                    return None;
                }
                Some(device)
            }
            Ok(None) => None,
            Err(e) => {
                error!(
                    "验证设备绑定失败: user_id={}, fingerprint={}, error={}",
                    user_id, device_fingerprint, e
                );
                None
            }
        }
    }

    /// 用户的活跃设备列表（最近使用在前；存储故障降级为空列表）
    pub async fn list_devices(&self, user_id: i64) -> Vec<DeviceInfo> {
        match self.devices.list_active(user_id).await {
            Ok(devices) => devices.iter().map(DeviceInfo::from).collect(),
            Err(e) => {
                error!("获取设备列表失败: user_id={}, error={}", user_id, e);
                Vec::new()
            }
        }
    }

    // =====================================================
    // 设备生命周期
    // =====================================================

    /// 用户解绑自己的设备（设备会话级联停用）
    pub async fn unbind_device(&self, user_id: i64, device_id: i64) -> bool {
        match self.deactivate_with_cascade(device_id, Some(user_id)).await {
            Ok(unbound) => {
                if unbound {
                    info!("用户解绑设备: user_id={}, device_id={}", user_id, device_id);
                }
                unbound
            }
            Err(e) => {
                error!(
                    "解绑设备失败: user_id={}, device_id={}, error={}",
                    user_id, device_id, e
                );
                false
            }
        }
    }

    /// 管理员解绑任意设备（不校验归属）
    pub async fn admin_unbind_device(&self, device_id: i64) -> bool {
        match self.deactivate_with_cascade(device_id, None).await {
            Ok(unbound) => {
                if unbound {
                    info!("管理员解绑设备: device_id={}", device_id);
                }
                unbound
            }
            Err(e) => {
                error!("管理员解绑设备失败: device_id={}, error={}", device_id, e);
                false
            }
        }
    }

    async fn deactivate_with_cascade(
        &self,
        device_id: i64,
        owner_user_id: Option<i64>,
    ) -> Result<bool> {
        let device = match self.devices.find_by_id(device_id).await? {
            Some(device) => device,
            None => return Ok(false),
        };

        if let Some(owner) = owner_user_id {
            if device.user_id != owner {
                warn!(
                    "拒绝解绑他人设备: user_id={}, device_id={}, owner={}",
                    owner, device_id, device.user_id
                );
                return Ok(false);
            }
        }

        if self.devices.deactivate(device_id).await? {
            let ended = self.sessions.end_for_device(device_id).await?;
            if ended > 0 {
                info!("级联结束设备会话: device_id={}, count={}", device_id, ended);
            }
        }

        Ok(true)
    }

    /// 刷新设备最后使用时间与位置
    pub async fn update_last_used(
        &self,
        device_id: i64,
        ip_address: Option<&str>,
        location: Option<&str>,
    ) -> bool {
        match self.devices.touch(device_id, ip_address, location).await {
            Ok(touched) => touched,
            Err(e) => {
                error!(
                    "更新设备使用时间失败: device_id={}, error={}",
                    device_id, e
                );
                false
            }
        }
    }

    /// 设置设备信任状态
    pub async fn set_trusted(&self, device_id: i64, is_trusted: bool) -> bool {
        match self.devices.set_trusted(device_id, is_trusted).await {
            Ok(changed) => {
                if changed {
                    info!(
                        "设置设备信任状态: device_id={}, is_trusted={}",
                        device_id, is_trusted
                    );
                }
                changed
            }
            Err(e) => {
                error!("设置设备信任状态失败: device_id={}, error={}", device_id, e);
                false
            }
        }
    }

    /// 延长设备有效期
    ///
    /// 从 max(当前时间, 现有过期时间) 起算，绝不缩短未到期的授权。
    pub async fn extend_expiry(&self, device_id: i64, days: i64) -> bool {
        let device = match self.devices.find_by_id(device_id).await {
            Ok(Some(device)) => device,
            Ok(None) => return false,
            Err(e) => {
                error!("查询设备失败: device_id={}, error={}", device_id, e);
                return false;
            }
        };

        let now = Utc::now();
        let base = match device.expires_at {
            Some(expires_at) if expires_at > now => expires_at,
            _ => now,
        };
        let new_expires_at = base + Duration::days(days);

        match self.devices.set_expires_at(device_id, new_expires_at).await {
            Ok(changed) => {
                if changed {
                    info!(
                        "延长设备有效期: device_id={}, expires_at={}",
                        device_id, new_expires_at
                    );
                }
                changed
            }
            Err(e) => {
                error!("延长设备有效期失败: device_id={}, error={}", device_id, e);
                false
            }
        }
    }

    /// 清理所有已过期设备，返回本次停用数量
    ///
    /// 幂等，可与绑定并发执行（尽力而为，不保证事务性）。
    pub async fn sweep_expired_devices(&self) -> Result<usize> {
        let count = self.devices.deactivate_expired(Utc::now()).await?;

        if count > 0 {
            info!("🧹 清理过期设备: count={}", count);
        }

        Ok(count as usize)
    }

    /// 生成设备指纹（从 UA/IP/附加信息散列）
    pub fn generate_fingerprint(
        &self,
        user_agent: &str,
        ip_address: &str,
        additional: Option<&str>,
    ) -> String {
        fingerprint::generate_fingerprint(user_agent, ip_address, additional)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SessionType, UserRole};
    use crate::repository::memory::{
        MemoryDeviceRepository, MemorySessionRepository, MemoryUserRepository,
    };
    use crate::repository::session_repo::NewSession;

    struct TestEnv {
        users: Arc<MemoryUserRepository>,
        devices: Arc<MemoryDeviceRepository>,
        sessions: Arc<MemorySessionRepository>,
        registry: DeviceRegistry,
    }

    fn build_env(config: DeviceSecurityConfig) -> TestEnv {
        let users = Arc::new(MemoryUserRepository::new());
        let devices = Arc::new(MemoryDeviceRepository::new());
        let sessions = Arc::new(MemorySessionRepository::new());
        let registry = DeviceRegistry::new(
            devices.clone(),
            sessions.clone(),
            users.clone(),
            config,
        );
        TestEnv {
            users,
            devices,
            sessions,
            registry,
        }
    }

    fn default_config() -> DeviceSecurityConfig {
        DeviceSecurityConfig {
            enable_device_limit: true,
            max_device_count: 3,
            kickout_policy: DeviceKickoutPolicy::KickoutOldest,
            device_token_expiration_days: 30,
        }
    }

    fn test_user(id: i64, role: UserRole) -> crate::model::User {
        crate::model::User {
            id,
            username: format!("user-{}", id),
            role,
            is_active: true,
            is_first_login: false,
        }
    }

    fn bind_request(fingerprint: &str) -> DeviceBindRequest {
        DeviceBindRequest {
            device_fingerprint: fingerprint.to_string(),
            device_name: Some(format!("device-{}", fingerprint)),
            device_type: "windows".to_string(),
            operating_system: Some("Windows 11".to_string()),
            browser_info: None,
        }
    }

    async fn create_session_for_device(
        env: &TestEnv,
        user_id: i64,
        device_id: i64,
        token: &str,
    ) -> i64 {
        let session = env
            .sessions
            .insert(NewSession {
                user_id,
                device_id: Some(device_id),
                session_token: token.to_string(),
                refresh_token: None,
                session_type: SessionType::JwtToken,
                ip_address: None,
                user_agent: None,
                location: None,
                expires_at: Utc::now() + Duration::days(7),
            })
            .await
            .unwrap();
        session.id
    }

    #[tokio::test]
    async fn test_bind_rejects_unknown_user() {
        let env = build_env(default_config());

        let result = env
            .registry
            .bind_device(999, &bind_request("fp"), None, None)
            .await;

        assert!(matches!(result, Err(ServerError::UserNotFound(999))));
    }

    #[tokio::test]
    async fn test_quota_reject_policy() {
        let mut config = default_config();
        config.kickout_policy = DeviceKickoutPolicy::RejectNew;
        let env = build_env(config);
        env.users.insert_user(test_user(1, UserRole::Student)).await;

        for fp in ["fp-a", "fp-b", "fp-c"] {
            env.registry
                .bind_device(1, &bind_request(fp), None, None)
                .await
                .unwrap();
        }

        // 第 4 台：准入评估拒绝，绑定报错，数量不变
        let admission = env.registry.evaluate_admission(1).await.unwrap();
        assert!(!admission.can_bind);
        assert!(!admission.requires_kickout);
        assert!(!admission.reason.is_empty());

        let result = env
            .registry
            .bind_device(1, &bind_request("fp-d"), None, None)
            .await;
        assert!(matches!(result, Err(ServerError::DeviceLimitExceeded(_))));
        assert_eq!(env.devices.count_active(1).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_quota_kickout_policy_evicts_oldest_and_cascades() {
        let env = build_env(default_config());
        env.users.insert_user(test_user(1, UserRole::Student)).await;

        let device_a = env
            .registry
            .bind_device(1, &bind_request("fp-a"), None, None)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let device_b = env
            .registry
            .bind_device(1, &bind_request("fp-b"), None, None)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        env.registry
            .bind_device(1, &bind_request("fp-c"), None, None)
            .await
            .unwrap();

        let session_a = create_session_for_device(&env, 1, device_a.id, "token-a").await;
        let session_b = create_session_for_device(&env, 1, device_b.id, "token-b").await;

        let admission = env.registry.evaluate_admission(1).await.unwrap();
        assert!(admission.can_bind);
        assert!(admission.requires_kickout);

        let device_d = env
            .registry
            .bind_device(1, &bind_request("fp-d"), None, None)
            .await
            .unwrap();

        // 最旧设备 A 被踢出，新设备 D 生效，总数仍为 3
        assert_eq!(env.devices.count_active(1).await.unwrap(), 3);
        let a = env.devices.find_by_id(device_a.id).await.unwrap().unwrap();
        assert!(!a.is_active);
        assert!(env
            .devices
            .find_by_id(device_d.id)
            .await
            .unwrap()
            .unwrap()
            .is_active);

        // A 的会话被级联停用且写入登出时间，B 的会话不受影响
        let sa = env.sessions.find_by_id(session_a).await.unwrap().unwrap();
        assert!(!sa.is_active);
        assert!(sa.logout_at.is_some());
        let sb = env.sessions.find_by_id(session_b).await.unwrap().unwrap();
        assert!(sb.is_active);
    }

    #[tokio::test]
    async fn test_kickout_without_devices_returns_false() {
        let env = build_env(default_config());
        env.users.insert_user(test_user(1, UserRole::Student)).await;

        assert!(!env.registry.kickout_oldest_device(1).await.unwrap());
    }

    #[tokio::test]
    async fn test_fingerprint_collision_isolated_between_users() {
        let env = build_env(default_config());
        env.users.insert_user(test_user(1, UserRole::Student)).await;
        env.users.insert_user(test_user(2, UserRole::Student)).await;

        let d1 = env
            .registry
            .bind_device(1, &bind_request("shared-fp"), None, None)
            .await
            .unwrap();
        let d2 = env
            .registry
            .bind_device(2, &bind_request("shared-fp"), None, None)
            .await
            .unwrap();

        // 两个账号各自持有独立记录，指纹被确定性改写
        assert_ne!(d1.id, d2.id);
        assert_eq!(d1.device_fingerprint, "shared-fp");
        assert_eq!(d2.device_fingerprint, "shared-fp-U2-01");
        assert_eq!(env.devices.count_active(1).await.unwrap(), 1);
        assert_eq!(env.devices.count_active(2).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fingerprint_collision_falls_back_to_timestamp() {
        let env = build_env(default_config());
        env.users.insert_user(test_user(1, UserRole::Student)).await;
        env.users
            .insert_user(test_user(2, UserRole::Administrator))
            .await;

        env.registry
            .bind_device(1, &bind_request("fp"), None, None)
            .await
            .unwrap();

        // 占满全部 100 个确定性候选
        for candidate in fingerprint::suffix_candidates("fp", 2) {
            env.devices
                .insert(NewDevice {
                    user_id: 2,
                    device_fingerprint: candidate,
                    device_name: "occupied".to_string(),
                    device_type: "windows".to_string(),
                    operating_system: None,
                    browser_info: None,
                    ip_address: None,
                    location: None,
                    expires_at: None,
                })
                .await
                .unwrap();
        }

        let device = env
            .registry
            .bind_device(2, &bind_request("fp"), None, None)
            .await
            .unwrap();

        assert!(device.device_fingerprint.starts_with("fp-U2-"));
        let suffix = device.device_fingerprint.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 14);
    }

    #[tokio::test]
    async fn test_idempotent_rebind() {
        let env = build_env(default_config());
        env.users.insert_user(test_user(1, UserRole::Student)).await;

        let first = env
            .registry
            .bind_device(1, &bind_request("fp"), Some("10.0.0.1"), None)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = env
            .registry
            .bind_device(1, &bind_request("fp"), Some("10.0.0.2"), Some("lab"))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(env.devices.count_active(1).await.unwrap(), 1);
        assert!(second.last_used_at > first.last_used_at);
        assert_eq!(second.ip_address.as_deref(), Some("10.0.0.2"));
        assert_eq!(second.location.as_deref(), Some("lab"));
    }

    #[tokio::test]
    async fn test_validate_binding() {
        let env = build_env(default_config());
        env.users.insert_user(test_user(1, UserRole::Student)).await;

        let device = env
            .registry
            .bind_device(1, &bind_request("fp"), None, None)
            .await
            .unwrap();

        assert!(env.registry.validate_binding(1, "fp").await.is_some());
        assert!(env.registry.validate_binding(2, "fp").await.is_none());
        assert!(env.registry.validate_binding(1, "other").await.is_none());

        // 过期后校验失败
        env.devices
            .set_expires_at(device.id, Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        assert!(env.registry.validate_binding(1, "fp").await.is_none());
    }

    #[tokio::test]
    async fn test_unbind_cascades_sessions() {
        let env = build_env(default_config());
        env.users.insert_user(test_user(1, UserRole::Student)).await;

        let device = env
            .registry
            .bind_device(1, &bind_request("fp"), None, None)
            .await
            .unwrap();
        let session_id = create_session_for_device(&env, 1, device.id, "token").await;

        // 他人无法解绑
        assert!(!env.registry.unbind_device(2, device.id).await);

        assert!(env.registry.unbind_device(1, device.id).await);
        let device = env.devices.find_by_id(device.id).await.unwrap().unwrap();
        assert!(!device.is_active);
        let session = env.sessions.find_by_id(session_id).await.unwrap().unwrap();
        assert!(!session.is_active);
        assert!(session.logout_at.is_some());
    }

    #[tokio::test]
    async fn test_admin_unbind_ignores_owner() {
        let env = build_env(default_config());
        env.users.insert_user(test_user(1, UserRole::Student)).await;

        let device = env
            .registry
            .bind_device(1, &bind_request("fp"), None, None)
            .await
            .unwrap();

        assert!(env.registry.admin_unbind_device(device.id).await);
        assert!(!env
            .devices
            .find_by_id(device.id)
            .await
            .unwrap()
            .unwrap()
            .is_active);
        assert!(!env.registry.admin_unbind_device(9999).await);
    }

    #[tokio::test]
    async fn test_extend_expiry_never_shortens() {
        let env = build_env(default_config());
        env.users.insert_user(test_user(1, UserRole::Student)).await;

        let device = env
            .registry
            .bind_device(1, &bind_request("fp"), None, None)
            .await
            .unwrap();
        let original_expiry = device.expires_at.unwrap();

        // 未过期：从现有过期时间顺延
        assert!(env.registry.extend_expiry(device.id, 5).await);
        let extended = env
            .devices
            .find_by_id(device.id)
            .await
            .unwrap()
            .unwrap()
            .expires_at
            .unwrap();
        assert_eq!(extended, original_expiry + Duration::days(5));

        // 已过期：从当前时间起算
        env.devices
            .set_expires_at(device.id, Utc::now() - Duration::days(10))
            .await
            .unwrap();
        assert!(env.registry.extend_expiry(device.id, 5).await);
        let renewed = env
            .devices
            .find_by_id(device.id)
            .await
            .unwrap()
            .unwrap()
            .expires_at
            .unwrap();
        assert!(renewed > Utc::now() + Duration::days(4));
        assert!(renewed <= Utc::now() + Duration::days(5));
    }

    #[tokio::test]
    async fn test_sweep_expired_devices_idempotent() {
        let env = build_env(default_config());
        env.users.insert_user(test_user(1, UserRole::Student)).await;

        let expired = env
            .registry
            .bind_device(1, &bind_request("fp-old"), None, None)
            .await
            .unwrap();
        let alive = env
            .registry
            .bind_device(1, &bind_request("fp-new"), None, None)
            .await
            .unwrap();

        env.devices
            .set_expires_at(expired.id, Utc::now() - Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(env.registry.sweep_expired_devices().await.unwrap(), 1);
        assert!(!env
            .devices
            .find_by_id(expired.id)
            .await
            .unwrap()
            .unwrap()
            .is_active);
        assert!(env
            .devices
            .find_by_id(alive.id)
            .await
            .unwrap()
            .unwrap()
            .is_active);

        // 再次清理无新变更
        assert_eq!(env.registry.sweep_expired_devices().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_device_limit_disabled_allows_unbounded() {
        let mut config = default_config();
        config.enable_device_limit = false;
        config.max_device_count = 1;
        let env = build_env(config);
        env.users.insert_user(test_user(1, UserRole::Student)).await;

        for fp in ["a", "b", "c", "d"] {
            env.registry
                .bind_device(1, &bind_request(fp), None, None)
                .await
                .unwrap();
        }
        assert_eq!(env.devices.count_active(1).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_administrator_exempt_from_limit() {
        let mut config = default_config();
        config.kickout_policy = DeviceKickoutPolicy::RejectNew;
        config.max_device_count = 2;
        let env = build_env(config);
        env.users
            .insert_user(test_user(1, UserRole::Administrator))
            .await;

        for fp in ["a", "b", "c", "d"] {
            env.registry
                .bind_device(1, &bind_request(fp), None, None)
                .await
                .unwrap();
        }
        assert_eq!(env.devices.count_active(1).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_default_device_name_generated() {
        let env = build_env(default_config());
        env.users.insert_user(test_user(1, UserRole::Student)).await;

        let mut request = bind_request("fp");
        request.device_name = None;
        let device = env
            .registry
            .bind_device(1, &request, None, None)
            .await
            .unwrap();

        assert!(device.device_name.starts_with("windows_"));
    }
}
