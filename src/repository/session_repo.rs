use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::{Result, ServerError};
use crate::model::{SessionStatistics, SessionType, UserSession};

/// 新会话插入载荷（id 与时间戳由存储层生成）
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: i64,
    pub device_id: Option<i64>,
    pub session_token: String,
    pub refresh_token: Option<String>,
    pub session_type: SessionType,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub location: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// 会话 Repository
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn insert(&self, session: NewSession) -> Result<UserSession>;

    async fn find_by_id(&self, session_id: i64) -> Result<Option<UserSession>>;

    /// 按查找键取活跃且未过期的会话
    async fn find_active_by_token(&self, session_token: &str) -> Result<Option<UserSession>>;

    /// 按刷新令牌取活跃且未过期的会话
    async fn find_active_by_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<UserSession>>;

    /// 刷新活动时间与客户端位置（仅活跃会话）
    async fn touch(
        &self,
        session_id: i64,
        ip_address: Option<&str>,
        location: Option<&str>,
    ) -> Result<bool>;

    /// 结束指定查找键的活跃会话，写入登出时间
    async fn end_by_token(&self, session_token: &str) -> Result<bool>;

    /// 结束用户的全部活跃会话（可排除一个），返回结束数量
    async fn end_all_for_user(&self, user_id: i64, exclude_session_id: Option<i64>)
        -> Result<u64>;

    /// 结束引用指定设备的全部活跃会话（级联失效）
    async fn end_for_device(&self, device_id: i64) -> Result<u64>;

    /// 轮换刷新令牌并顺延过期时间（仅活跃会话）
    async fn rotate_refresh_token(
        &self,
        session_id: i64,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// 用户活跃且未过期的会话（最近活动在前）
    async fn list_active_for_user(&self, user_id: i64) -> Result<Vec<UserSession>>;

    /// 清理：已过期、或被标记停用但缺少登出时间的会话，统一停用并补登出时间
    async fn sweep(&self, now: DateTime<Utc>) -> Result<u64>;

    /// 活跃会话的即时统计
    async fn statistics(&self, now: DateTime<Utc>) -> Result<SessionStatistics>;
}

/// PostgreSQL 会话 Repository
pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: i64,
    user_id: i64,
    device_id: Option<i64>,
    session_token: String,
    refresh_token: Option<String>,
    session_type: String,
    ip_address: Option<String>,
    user_agent: Option<String>,
    location: Option<String>,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    is_active: bool,
    logout_at: Option<DateTime<Utc>>,
}

impl From<SessionRow> for UserSession {
    fn from(row: SessionRow) -> Self {
        UserSession {
            id: row.id,
            user_id: row.user_id,
            device_id: row.device_id,
            session_token: row.session_token,
            refresh_token: row.refresh_token,
            session_type: SessionType::from_str(&row.session_type),
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            location: row.location,
            created_at: row.created_at,
            last_activity_at: row.last_activity_at,
            expires_at: row.expires_at,
            is_active: row.is_active,
            logout_at: row.logout_at,
        }
    }
}

const SESSION_COLUMNS: &str = "id, user_id, device_id, session_token, refresh_token, \
     session_type, ip_address, user_agent, location, \
     created_at, last_activity_at, expires_at, is_active, logout_at";

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn insert(&self, session: NewSession) -> Result<UserSession> {
        let sql = format!(
            r#"
            INSERT INTO examtrust_user_sessions (
                user_id, device_id, session_token, refresh_token, session_type,
                ip_address, user_agent, location,
                created_at, last_activity_at, expires_at, is_active
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), NOW(), $9, TRUE)
            RETURNING {}
            "#,
            SESSION_COLUMNS
        );

        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(session.user_id)
            .bind(session.device_id)
            .bind(&session.session_token)
            .bind(&session.refresh_token)
            .bind(session.session_type.as_str())
            .bind(&session.ip_address)
            .bind(&session.user_agent)
            .bind(&session.location)
            .bind(session.expires_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ServerError::Database(format!("插入会话失败: {}", e)))?;

        Ok(row.into())
    }

    async fn find_by_id(&self, session_id: i64) -> Result<Option<UserSession>> {
        let sql = format!(
            "SELECT {} FROM examtrust_user_sessions WHERE id = $1",
            SESSION_COLUMNS
        );

        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ServerError::Database(format!("查询会话失败: {}", e)))?;

        Ok(row.map(Into::into))
    }

    async fn find_active_by_token(&self, session_token: &str) -> Result<Option<UserSession>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM examtrust_user_sessions
            WHERE session_token = $1 AND is_active = TRUE AND expires_at > NOW()
            "#,
            SESSION_COLUMNS
        );

        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(session_token)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ServerError::Database(format!("查询会话失败: {}", e)))?;

        Ok(row.map(Into::into))
    }

    async fn find_active_by_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<UserSession>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM examtrust_user_sessions
            WHERE refresh_token = $1 AND is_active = TRUE AND expires_at > NOW()
            "#,
            SESSION_COLUMNS
        );

        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(refresh_token)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ServerError::Database(format!("按刷新令牌查询会话失败: {}", e)))?;

        Ok(row.map(Into::into))
    }

    async fn touch(
        &self,
        session_id: i64,
        ip_address: Option<&str>,
        location: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE examtrust_user_sessions
            SET last_activity_at = NOW(),
                ip_address = COALESCE($2, ip_address),
                location = COALESCE($3, location)
            WHERE id = $1 AND is_active = TRUE
            "#,
        )
        .bind(session_id)
        .bind(ip_address)
        .bind(location)
        .execute(&self.pool)
        .await
        .map_err(|e| ServerError::Database(format!("更新会话活动时间失败: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    async fn end_by_token(&self, session_token: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE examtrust_user_sessions
            SET is_active = FALSE, logout_at = NOW()
            WHERE session_token = $1 AND is_active = TRUE
            "#,
        )
        .bind(session_token)
        .execute(&self.pool)
        .await
        .map_err(|e| ServerError::Database(format!("结束会话失败: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    async fn end_all_for_user(
        &self,
        user_id: i64,
        exclude_session_id: Option<i64>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE examtrust_user_sessions
            SET is_active = FALSE, logout_at = NOW()
            WHERE user_id = $1 AND is_active = TRUE AND ($2::BIGINT IS NULL OR id != $2)
            "#,
        )
        .bind(user_id)
        .bind(exclude_session_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ServerError::Database(format!("结束用户会话失败: {}", e)))?;

        Ok(result.rows_affected())
    }

    async fn end_for_device(&self, device_id: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE examtrust_user_sessions
            SET is_active = FALSE, logout_at = NOW()
            WHERE device_id = $1 AND is_active = TRUE
            "#,
        )
        .bind(device_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ServerError::Database(format!("级联结束设备会话失败: {}", e)))?;

        Ok(result.rows_affected())
    }

    async fn rotate_refresh_token(
        &self,
        session_id: i64,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE examtrust_user_sessions
            SET refresh_token = $2, expires_at = $3, last_activity_at = NOW()
            WHERE id = $1 AND is_active = TRUE
            "#,
        )
        .bind(session_id)
        .bind(refresh_token)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| ServerError::Database(format!("轮换刷新令牌失败: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_active_for_user(&self, user_id: i64) -> Result<Vec<UserSession>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM examtrust_user_sessions
            WHERE user_id = $1 AND is_active = TRUE AND expires_at > NOW()
            ORDER BY last_activity_at DESC
            "#,
            SESSION_COLUMNS
        );

        let rows = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ServerError::Database(format!("查询活跃会话失败: {}", e)))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE examtrust_user_sessions
            SET is_active = FALSE,
                logout_at = COALESCE(logout_at, $1)
            WHERE (is_active = TRUE AND expires_at < $1)
               OR (is_active = FALSE AND logout_at IS NULL)
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| ServerError::Database(format!("清理过期会话失败: {}", e)))?;

        Ok(result.rows_affected())
    }

    async fn statistics(&self, now: DateTime<Utc>) -> Result<SessionStatistics> {
        #[derive(sqlx::FromRow)]
        struct Row {
            total_active: Option<i64>,
            jwt_sessions: Option<i64>,
            cookie_sessions: Option<i64>,
            today_new: Option<i64>,
            online_users: Option<i64>,
        }

        let today_start = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc())
            .unwrap_or(now);

        let row = sqlx::query_as::<_, Row>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE is_active AND expires_at > $1) as total_active,
                COUNT(*) FILTER (WHERE is_active AND expires_at > $1 AND session_type = 'jwt_token') as jwt_sessions,
                COUNT(*) FILTER (WHERE is_active AND expires_at > $1 AND session_type = 'cookie') as cookie_sessions,
                COUNT(*) FILTER (WHERE created_at >= $2) as today_new,
                COUNT(DISTINCT user_id) FILTER (WHERE is_active AND expires_at > $1) as online_users
            FROM examtrust_user_sessions
            "#,
        )
        .bind(now)
        .bind(today_start)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ServerError::Database(format!("查询会话统计失败: {}", e)))?;

        Ok(SessionStatistics {
            total_active_sessions: row.total_active.unwrap_or(0) as u64,
            jwt_sessions: row.jwt_sessions.unwrap_or(0) as u64,
            cookie_sessions: row.cookie_sessions.unwrap_or(0) as u64,
            today_new_sessions: row.today_new.unwrap_or(0) as u64,
            online_users: row.online_users.unwrap_or(0) as u64,
        })
    }
}
