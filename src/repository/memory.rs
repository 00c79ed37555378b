// =====================================================
// 内存版 Repository（测试与单机演示用）
// =====================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::model::{SessionStatistics, User, UserDevice, UserSession};
use crate::repository::device_repo::{DeviceRepository, NewDevice};
use crate::repository::session_repo::{NewSession, SessionRepository};
use crate::repository::user_repo::UserRepository;

/// 内存用户 Repository
#[derive(Default)]
pub struct MemoryUserRepository {
    users: Arc<RwLock<HashMap<i64, User>>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: User) {
        let mut users = self.users.write().await;
        users.insert(user.id, user);
    }

    pub async fn set_active(&self, user_id: i64, is_active: bool) {
        let mut users = self.users.write().await;
        if let Some(user) = users.get_mut(&user_id) {
            user.is_active = is_active;
        }
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn find_by_id(&self, user_id: i64) -> Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users.get(&user_id).cloned())
    }
}

/// 内存设备 Repository
pub struct MemoryDeviceRepository {
    devices: Arc<RwLock<Vec<UserDevice>>>,
    next_id: AtomicI64,
}

impl MemoryDeviceRepository {
    pub fn new() -> Self {
        Self {
            devices: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicI64::new(1),
        }
    }
}

impl Default for MemoryDeviceRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceRepository for MemoryDeviceRepository {
    async fn insert(&self, device: NewDevice) -> Result<UserDevice> {
        let now = Utc::now();
        let record = UserDevice {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            user_id: device.user_id,
            device_fingerprint: device.device_fingerprint,
            device_name: device.device_name,
            device_type: device.device_type,
            operating_system: device.operating_system,
            browser_info: device.browser_info,
            ip_address: device.ip_address,
            location: device.location,
            created_at: now,
            last_used_at: now,
            is_active: true,
            is_trusted: false,
            expires_at: device.expires_at,
        };

        let mut devices = self.devices.write().await;
        devices.push(record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, device_id: i64) -> Result<Option<UserDevice>> {
        let devices = self.devices.read().await;
        Ok(devices.iter().find(|d| d.id == device_id).cloned())
    }

    async fn find_active_by_user_and_fingerprint(
        &self,
        user_id: i64,
        fingerprint: &str,
    ) -> Result<Option<UserDevice>> {
        let devices = self.devices.read().await;
        Ok(devices
            .iter()
            .find(|d| d.user_id == user_id && d.device_fingerprint == fingerprint && d.is_active)
            .cloned())
    }

    async fn fingerprint_held_by_other_user(
        &self,
        fingerprint: &str,
        user_id: i64,
    ) -> Result<bool> {
        let devices = self.devices.read().await;
        Ok(devices
            .iter()
            .any(|d| d.device_fingerprint == fingerprint && d.user_id != user_id && d.is_active))
    }

    async fn fingerprint_exists(&self, fingerprint: &str) -> Result<bool> {
        let devices = self.devices.read().await;
        Ok(devices.iter().any(|d| d.device_fingerprint == fingerprint))
    }

    async fn count_active(&self, user_id: i64) -> Result<i64> {
        let devices = self.devices.read().await;
        Ok(devices
            .iter()
            .filter(|d| d.user_id == user_id && d.is_active)
            .count() as i64)
    }

    async fn oldest_active(&self, user_id: i64) -> Result<Option<UserDevice>> {
        let devices = self.devices.read().await;
        Ok(devices
            .iter()
            .filter(|d| d.user_id == user_id && d.is_active)
            .min_by_key(|d| (d.last_used_at, d.created_at))
            .cloned())
    }

    async fn list_active(&self, user_id: i64) -> Result<Vec<UserDevice>> {
        let devices = self.devices.read().await;
        let mut active: Vec<UserDevice> = devices
            .iter()
            .filter(|d| d.user_id == user_id && d.is_active)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.last_used_at.cmp(&a.last_used_at));
        Ok(active)
    }

    async fn deactivate(&self, device_id: i64) -> Result<bool> {
        let mut devices = self.devices.write().await;
        match devices.iter_mut().find(|d| d.id == device_id && d.is_active) {
            Some(device) => {
                device.is_active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn touch(
        &self,
        device_id: i64,
        ip_address: Option<&str>,
        location: Option<&str>,
    ) -> Result<bool> {
        let mut devices = self.devices.write().await;
        match devices.iter_mut().find(|d| d.id == device_id && d.is_active) {
            Some(device) => {
                device.last_used_at = Utc::now();
                if let Some(ip) = ip_address {
                    device.ip_address = Some(ip.to_string());
                }
                if let Some(loc) = location {
                    device.location = Some(loc.to_string());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_trusted(&self, device_id: i64, is_trusted: bool) -> Result<bool> {
        let mut devices = self.devices.write().await;
        match devices.iter_mut().find(|d| d.id == device_id) {
            Some(device) => {
                device.is_trusted = is_trusted;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_expires_at(&self, device_id: i64, expires_at: DateTime<Utc>) -> Result<bool> {
        let mut devices = self.devices.write().await;
        match devices.iter_mut().find(|d| d.id == device_id) {
            Some(device) => {
                device.expires_at = Some(expires_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut devices = self.devices.write().await;
        let mut count = 0;
        for device in devices.iter_mut() {
            if device.is_active && device.is_expired(now) {
                device.is_active = false;
                count += 1;
            }
        }
        Ok(count)
    }
}

/// 内存会话 Repository
pub struct MemorySessionRepository {
    sessions: Arc<RwLock<Vec<UserSession>>>,
    next_id: AtomicI64,
}

impl MemorySessionRepository {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicI64::new(1),
        }
    }

    /// 测试辅助：直接改写过期时间
    pub async fn force_expire(&self, session_id: i64, expires_at: DateTime<Utc>) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.iter_mut().find(|s| s.id == session_id) {
            session.expires_at = expires_at;
        }
    }

    /// 测试辅助：停用但不写登出时间（模拟外部直接改库）
    pub async fn deactivate_without_logout(&self, session_id: i64) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.iter_mut().find(|s| s.id == session_id) {
            session.is_active = false;
            session.logout_at = None;
        }
    }
}

impl Default for MemorySessionRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionRepository for MemorySessionRepository {
    async fn insert(&self, session: NewSession) -> Result<UserSession> {
        let now = Utc::now();
        let record = UserSession {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            user_id: session.user_id,
            device_id: session.device_id,
            session_token: session.session_token,
            refresh_token: session.refresh_token,
            session_type: session.session_type,
            ip_address: session.ip_address,
            user_agent: session.user_agent,
            location: session.location,
            created_at: now,
            last_activity_at: now,
            expires_at: session.expires_at,
            is_active: true,
            logout_at: None,
        };

        let mut sessions = self.sessions.write().await;
        sessions.push(record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, session_id: i64) -> Result<Option<UserSession>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.iter().find(|s| s.id == session_id).cloned())
    }

    async fn find_active_by_token(&self, session_token: &str) -> Result<Option<UserSession>> {
        let now = Utc::now();
        let sessions = self.sessions.read().await;
        Ok(sessions
            .iter()
            .find(|s| s.session_token == session_token && s.is_active && !s.is_expired(now))
            .cloned())
    }

    async fn find_active_by_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<UserSession>> {
        let now = Utc::now();
        let sessions = self.sessions.read().await;
        Ok(sessions
            .iter()
            .find(|s| {
                s.refresh_token.as_deref() == Some(refresh_token)
                    && s.is_active
                    && !s.is_expired(now)
            })
            .cloned())
    }

    async fn touch(
        &self,
        session_id: i64,
        ip_address: Option<&str>,
        location: Option<&str>,
    ) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        match sessions
            .iter_mut()
            .find(|s| s.id == session_id && s.is_active)
        {
            Some(session) => {
                session.last_activity_at = Utc::now();
                if let Some(ip) = ip_address {
                    session.ip_address = Some(ip.to_string());
                }
                if let Some(loc) = location {
                    session.location = Some(loc.to_string());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn end_by_token(&self, session_token: &str) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        match sessions
            .iter_mut()
            .find(|s| s.session_token == session_token && s.is_active)
        {
            Some(session) => {
                session.is_active = false;
                session.logout_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn end_all_for_user(
        &self,
        user_id: i64,
        exclude_session_id: Option<i64>,
    ) -> Result<u64> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let mut count = 0;
        for session in sessions.iter_mut() {
            if session.user_id == user_id
                && session.is_active
                && Some(session.id) != exclude_session_id
            {
                session.is_active = false;
                session.logout_at = Some(now);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn end_for_device(&self, device_id: i64) -> Result<u64> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let mut count = 0;
        for session in sessions.iter_mut() {
            if session.device_id == Some(device_id) && session.is_active {
                session.is_active = false;
                session.logout_at = Some(now);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn rotate_refresh_token(
        &self,
        session_id: i64,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        match sessions
            .iter_mut()
            .find(|s| s.id == session_id && s.is_active)
        {
            Some(session) => {
                session.refresh_token = Some(refresh_token.to_string());
                session.expires_at = expires_at;
                session.last_activity_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_active_for_user(&self, user_id: i64) -> Result<Vec<UserSession>> {
        let now = Utc::now();
        let sessions = self.sessions.read().await;
        let mut active: Vec<UserSession> = sessions
            .iter()
            .filter(|s| s.user_id == user_id && s.is_active && !s.is_expired(now))
            .cloned()
            .collect();
        active.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(active)
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut sessions = self.sessions.write().await;
        let mut count = 0;
        for session in sessions.iter_mut() {
            let expired_active = session.is_active && session.expires_at < now;
            let inactive_without_logout = !session.is_active && session.logout_at.is_none();
            if expired_active || inactive_without_logout {
                session.is_active = false;
                if session.logout_at.is_none() {
                    session.logout_at = Some(now);
                }
                count += 1;
            }
        }
        Ok(count)
    }

    async fn statistics(&self, now: DateTime<Utc>) -> Result<SessionStatistics> {
        let today_start = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc())
            .unwrap_or(now);

        let sessions = self.sessions.read().await;
        let live: Vec<&UserSession> = sessions
            .iter()
            .filter(|s| s.is_active && s.expires_at > now)
            .collect();

        let mut online: Vec<i64> = live.iter().map(|s| s.user_id).collect();
        online.sort_unstable();
        online.dedup();

        Ok(SessionStatistics {
            total_active_sessions: live.len() as u64,
            jwt_sessions: live
                .iter()
                .filter(|s| s.session_type == crate::model::SessionType::JwtToken)
                .count() as u64,
            cookie_sessions: live
                .iter()
                .filter(|s| s.session_type == crate::model::SessionType::Cookie)
                .count() as u64,
            today_new_sessions: sessions.iter().filter(|s| s.created_at >= today_start).count()
                as u64,
            online_users: online.len() as u64,
        })
    }
}
