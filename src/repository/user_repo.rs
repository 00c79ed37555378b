use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::{Result, ServerError};
use crate::model::{User, UserRole};

/// 用户 Repository
///
/// 用户表归外部账号系统所有，本服务只读（角色与启用状态）。
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, user_id: i64) -> Result<Option<User>>;
}

/// PostgreSQL 用户 Repository
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, user_id: i64) -> Result<Option<User>> {
        #[derive(sqlx::FromRow)]
        struct Row {
            id: i64,
            username: String,
            role: String,
            is_active: bool,
            is_first_login: bool,
        }

        let row = sqlx::query_as::<_, Row>(
            r#"
            SELECT id, username, role, is_active, is_first_login
            FROM examtrust_users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ServerError::Database(format!("查询用户失败: {}", e)))?;

        Ok(row.map(|r| User {
            id: r.id,
            username: r.username,
            role: UserRole::from_str(&r.role),
            is_active: r.is_active,
            is_first_login: r.is_first_login,
        }))
    }
}
