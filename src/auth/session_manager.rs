use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{DeviceInfo, SessionInfo, SessionStatistics, SessionType, UserSession};
use crate::repository::device_repo::DeviceRepository;
use crate::repository::session_repo::{NewSession, SessionRepository};
use crate::repository::user_repo::UserRepository;

/// 超过该长度的 JWT 不直接作为查找键落库
const LONG_TOKEN_THRESHOLD: usize = 450;

/// 未指定过期时间时的默认会话有效期（天）
const DEFAULT_SESSION_EXPIRATION_DAYS: i64 = 7;

/// 创建会话参数
#[derive(Debug, Clone)]
pub struct CreateSessionParams {
    pub user_id: i64,
    pub session_token: String,
    pub session_type: SessionType,
    pub device_id: Option<i64>,
    pub refresh_token: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub location: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CreateSessionParams {
    pub fn new(user_id: i64, session_token: impl Into<String>, session_type: SessionType) -> Self {
        Self {
            user_id,
            session_token: session_token.into(),
            session_type,
            device_id: None,
            refresh_token: None,
            ip_address: None,
            user_agent: None,
            location: None,
            expires_at: None,
        }
    }
}

/// 会话管理服务
///
/// 维护撤销与审计用途的会话登记。认证由令牌签名无状态完成，
/// 这里只跟踪"哪些认证上下文当前在线"，供枚举与批量撤销使用。
pub struct SessionManager {
    sessions: Arc<dyn SessionRepository>,
    devices: Arc<dyn DeviceRepository>,
    users: Arc<dyn UserRepository>,
}

impl SessionManager {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        devices: Arc<dyn DeviceRepository>,
        users: Arc<dyn UserRepository>,
    ) -> Self {
        Self {
            sessions,
            devices,
            users,
        }
    }

    /// 创建会话
    ///
    /// JWT 会话的令牌超过阈值时，不以原始令牌作为查找键，改为生成
    /// `JWT_{用户ID}_{时间戳}_{随机8位}` 形式的紧凑标识。此时客户端
    /// 无法凭完整令牌反查会话；撤销通过用户/设备维度批量进行，
    /// 认证本身不受影响（由签名独立验证）。
    pub async fn create_session(&self, params: CreateSessionParams) -> Result<UserSession> {
        let expires_at = params
            .expires_at
            .unwrap_or_else(|| Utc::now() + Duration::days(DEFAULT_SESSION_EXPIRATION_DAYS));

        let session_token = if params.session_type == SessionType::JwtToken
            && params.session_token.len() > LONG_TOKEN_THRESHOLD
        {
            let compact = format!(
                "JWT_{}_{}_{}",
                params.user_id,
                Utc::now().timestamp(),
                &Uuid::new_v4().simple().to_string()[..8]
            );
            info!(
                "JWT 令牌过长({}字符)，生成会话标识: {}",
                params.session_token.len(),
                compact
            );
            compact
        } else {
            params.session_token.clone()
        };

        let session = self
            .sessions
            .insert(NewSession {
                user_id: params.user_id,
                device_id: params.device_id,
                session_token,
                refresh_token: params.refresh_token,
                session_type: params.session_type,
                ip_address: params.ip_address,
                user_agent: params.user_agent,
                location: params.location,
                expires_at,
            })
            .await?;

        info!(
            "✅ 创建会话: user_id={}, session_id={}, type={}",
            session.user_id,
            session.id,
            session.session_type.as_str()
        );

        Ok(session)
    }

    /// 校验会话：活跃、未过期、所属用户处于启用状态
    ///
    /// 存储故障降级为 None（记录日志）。
    pub async fn validate_session(&self, session_token: &str) -> Option<UserSession> {
        let session = match self.sessions.find_active_by_token(session_token).await {
            Ok(Some(session)) => session,
            Ok(None) => return None,
            Err(e) => {
                error!("验证会话失败: error={}", e);
                return None;
            }
        };

        match self.users.find_by_id(session.user_id).await {
            Ok(Some(user)) if user.is_active => Some(session),
            Ok(_) => {
                debug!(
                    "会话所属用户不可用: session_id={}, user_id={}",
                    session.id, session.user_id
                );
                None
            }
            Err(e) => {
                error!("验证会话用户失败: user_id={}, error={}", session.user_id, e);
                None
            }
        }
    }

    /// 刷新会话活动时间与客户端位置（非活跃会话为 no-op）
    pub async fn update_activity(
        &self,
        session_id: i64,
        ip_address: Option<&str>,
        location: Option<&str>,
    ) -> bool {
        match self.sessions.touch(session_id, ip_address, location).await {
            Ok(touched) => touched,
            Err(e) => {
                error!(
                    "更新会话活动时间失败: session_id={}, error={}",
                    session_id, e
                );
                false
            }
        }
    }

    /// 结束指定会话（写入登出时间）
    pub async fn end_session(&self, session_token: &str) -> bool {
        match self.sessions.end_by_token(session_token).await {
            Ok(ended) => {
                if ended {
                    info!("结束会话: token={}", session_token);
                }
                ended
            }
            Err(e) => {
                error!("结束会话失败: error={}", e);
                false
            }
        }
    }

    /// 结束用户的全部活跃会话（可排除当前会话），返回结束数量
    pub async fn end_all_user_sessions(
        &self,
        user_id: i64,
        exclude_session_id: Option<i64>,
    ) -> usize {
        match self
            .sessions
            .end_all_for_user(user_id, exclude_session_id)
            .await
        {
            Ok(count) => {
                info!("结束用户所有会话: user_id={}, count={}", user_id, count);
                count as usize
            }
            Err(e) => {
                error!("结束用户所有会话失败: user_id={}, error={}", user_id, e);
                0
            }
        }
    }

    /// 按刷新令牌取会话（令牌刷新流程用）
    pub async fn get_session_by_refresh_token(&self, refresh_token: &str) -> Option<UserSession> {
        match self
            .sessions
            .find_active_by_refresh_token(refresh_token)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                error!("按刷新令牌查询会话失败: error={}", e);
                None
            }
        }
    }

    /// 轮换刷新令牌并顺延过期时间（非活跃会话静默失败）
    pub async fn rotate_refresh_token(
        &self,
        session_id: i64,
        new_refresh_token: &str,
        new_expires_at: DateTime<Utc>,
    ) -> bool {
        match self
            .sessions
            .rotate_refresh_token(session_id, new_refresh_token, new_expires_at)
            .await
        {
            Ok(rotated) => {
                if rotated {
                    debug!("轮换刷新令牌: session_id={}", session_id);
                }
                rotated
            }
            Err(e) => {
                error!("轮换刷新令牌失败: session_id={}, error={}", session_id, e);
                false
            }
        }
    }

    /// 用户的活跃会话列表（含关联设备，最近活动在前）
    ///
    /// 存储故障降级为空列表。
    pub async fn list_active_sessions(&self, user_id: i64) -> Vec<SessionInfo> {
        let sessions = match self.sessions.list_active_for_user(user_id).await {
            Ok(sessions) => sessions,
            Err(e) => {
                error!("获取活跃会话失败: user_id={}, error={}", user_id, e);
                return Vec::new();
            }
        };

        let mut result = Vec::with_capacity(sessions.len());
        for session in sessions {
            let device = match session.device_id {
                Some(device_id) => match self.devices.find_by_id(device_id).await {
                    Ok(device) => device.as_ref().map(DeviceInfo::from),
                    Err(e) => {
                        error!("查询会话设备失败: device_id={}, error={}", device_id, e);
                        None
                    }
                },
                None => None,
            };

            result.push(SessionInfo {
                id: session.id,
                session_type: session.session_type,
                ip_address: session.ip_address,
                user_agent: session.user_agent,
                location: session.location,
                created_at: session.created_at,
                last_activity_at: session.last_activity_at,
                expires_at: session.expires_at,
                is_active: session.is_active,
                device,
            });
        }

        result
    }

    /// 清理过期会话（含被外部停用但缺登出时间的行），返回本次处理数量
    pub async fn sweep_expired_sessions(&self) -> Result<usize> {
        let count = self.sessions.sweep(Utc::now()).await?;

        if count > 0 {
            info!("🧹 清理过期会话: count={}", count);
        }

        Ok(count as usize)
    }

    /// 会话统计信息（存储故障降级为零值快照）
    pub async fn statistics(&self) -> SessionStatistics {
        match self.sessions.statistics(Utc::now()).await {
            Ok(stats) => stats,
            Err(e) => {
                error!("获取会话统计失败: error={}", e);
                SessionStatistics::default()
            }
        }
    }
}
