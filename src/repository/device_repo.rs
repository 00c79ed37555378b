use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::{Result, ServerError};
use crate::model::UserDevice;

/// 新设备插入载荷（id 与时间戳由存储层生成）
#[derive(Debug, Clone)]
pub struct NewDevice {
    pub user_id: i64,
    pub device_fingerprint: String,
    pub device_name: String,
    pub device_type: String,
    pub operating_system: Option<String>,
    pub browser_info: Option<String>,
    pub ip_address: Option<String>,
    pub location: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// 设备 Repository
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    /// 插入新设备（active、untrusted）
    async fn insert(&self, device: NewDevice) -> Result<UserDevice>;

    async fn find_by_id(&self, device_id: i64) -> Result<Option<UserDevice>>;

    /// 用户名下该指纹的活跃设备
    async fn find_active_by_user_and_fingerprint(
        &self,
        user_id: i64,
        fingerprint: &str,
    ) -> Result<Option<UserDevice>>;

    /// 该指纹是否被其他用户的活跃设备占用
    async fn fingerprint_held_by_other_user(
        &self,
        fingerprint: &str,
        user_id: i64,
    ) -> Result<bool>;

    /// 该指纹是否存在于任何记录（含退役设备，冲突候选探测用）
    async fn fingerprint_exists(&self, fingerprint: &str) -> Result<bool>;

    /// 用户活跃设备数
    async fn count_active(&self, user_id: i64) -> Result<i64>;

    /// 用户最久未使用的活跃设备（last_used_at 最旧，created_at 兜底排序）
    async fn oldest_active(&self, user_id: i64) -> Result<Option<UserDevice>>;

    /// 用户活跃设备列表（最近使用在前）
    async fn list_active(&self, user_id: i64) -> Result<Vec<UserDevice>>;

    /// 停用设备（幂等，返回是否发生变更）
    async fn deactivate(&self, device_id: i64) -> Result<bool>;

    /// 刷新最后使用时间与位置（仅活跃设备）
    async fn touch(
        &self,
        device_id: i64,
        ip_address: Option<&str>,
        location: Option<&str>,
    ) -> Result<bool>;

    async fn set_trusted(&self, device_id: i64, is_trusted: bool) -> Result<bool>;

    async fn set_expires_at(&self, device_id: i64, expires_at: DateTime<Utc>) -> Result<bool>;

    /// 停用所有已过期设备，返回本次停用数量
    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// PostgreSQL 设备 Repository
pub struct PgDeviceRepository {
    pool: PgPool,
}

impl PgDeviceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct DeviceRow {
    id: i64,
    user_id: i64,
    device_fingerprint: String,
    device_name: String,
    device_type: String,
    operating_system: Option<String>,
    browser_info: Option<String>,
    ip_address: Option<String>,
    location: Option<String>,
    created_at: DateTime<Utc>,
    last_used_at: DateTime<Utc>,
    is_active: bool,
    is_trusted: bool,
    expires_at: Option<DateTime<Utc>>,
}

impl From<DeviceRow> for UserDevice {
    fn from(row: DeviceRow) -> Self {
        UserDevice {
            id: row.id,
            user_id: row.user_id,
            device_fingerprint: row.device_fingerprint,
            device_name: row.device_name,
            device_type: row.device_type,
            operating_system: row.operating_system,
            browser_info: row.browser_info,
            ip_address: row.ip_address,
            location: row.location,
            created_at: row.created_at,
            last_used_at: row.last_used_at,
            is_active: row.is_active,
            is_trusted: row.is_trusted,
            expires_at: row.expires_at,
        }
    }
}

const DEVICE_COLUMNS: &str = "id, user_id, device_fingerprint, device_name, device_type, \
     operating_system, browser_info, ip_address, location, \
     created_at, last_used_at, is_active, is_trusted, expires_at";

#[async_trait]
impl DeviceRepository for PgDeviceRepository {
    async fn insert(&self, device: NewDevice) -> Result<UserDevice> {
        let sql = format!(
            r#"
            INSERT INTO examtrust_user_devices (
                user_id, device_fingerprint, device_name, device_type,
                operating_system, browser_info, ip_address, location,
                created_at, last_used_at, is_active, is_trusted, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), NOW(), TRUE, FALSE, $9)
            RETURNING {}
            "#,
            DEVICE_COLUMNS
        );

        let row = sqlx::query_as::<_, DeviceRow>(&sql)
            .bind(device.user_id)
            .bind(&device.device_fingerprint)
            .bind(&device.device_name)
            .bind(&device.device_type)
            .bind(&device.operating_system)
            .bind(&device.browser_info)
            .bind(&device.ip_address)
            .bind(&device.location)
            .bind(device.expires_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ServerError::Database(format!("插入设备失败: {}", e)))?;

        Ok(row.into())
    }

    async fn find_by_id(&self, device_id: i64) -> Result<Option<UserDevice>> {
        let sql = format!(
            "SELECT {} FROM examtrust_user_devices WHERE id = $1",
            DEVICE_COLUMNS
        );

        let row = sqlx::query_as::<_, DeviceRow>(&sql)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ServerError::Database(format!("查询设备失败: {}", e)))?;

        Ok(row.map(Into::into))
    }

    async fn find_active_by_user_and_fingerprint(
        &self,
        user_id: i64,
        fingerprint: &str,
    ) -> Result<Option<UserDevice>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM examtrust_user_devices
            WHERE user_id = $1 AND device_fingerprint = $2 AND is_active = TRUE
            "#,
            DEVICE_COLUMNS
        );

        let row = sqlx::query_as::<_, DeviceRow>(&sql)
            .bind(user_id)
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ServerError::Database(format!("查询设备失败: {}", e)))?;

        Ok(row.map(Into::into))
    }

    async fn fingerprint_held_by_other_user(
        &self,
        fingerprint: &str,
        user_id: i64,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM examtrust_user_devices
                WHERE device_fingerprint = $1 AND user_id != $2 AND is_active = TRUE
            )
            "#,
        )
        .bind(fingerprint)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ServerError::Database(format!("查询指纹占用失败: {}", e)))?;

        Ok(exists)
    }

    async fn fingerprint_exists(&self, fingerprint: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM examtrust_user_devices WHERE device_fingerprint = $1
            )
            "#,
        )
        .bind(fingerprint)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ServerError::Database(format!("查询指纹失败: {}", e)))?;

        Ok(exists)
    }

    async fn count_active(&self, user_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM examtrust_user_devices
            WHERE user_id = $1 AND is_active = TRUE
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ServerError::Database(format!("统计设备数失败: {}", e)))?;

        Ok(count)
    }

    async fn oldest_active(&self, user_id: i64) -> Result<Option<UserDevice>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM examtrust_user_devices
            WHERE user_id = $1 AND is_active = TRUE
            ORDER BY last_used_at ASC, created_at ASC
            LIMIT 1
            "#,
            DEVICE_COLUMNS
        );

        let row = sqlx::query_as::<_, DeviceRow>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ServerError::Database(format!("查询最旧设备失败: {}", e)))?;

        Ok(row.map(Into::into))
    }

    async fn list_active(&self, user_id: i64) -> Result<Vec<UserDevice>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM examtrust_user_devices
            WHERE user_id = $1 AND is_active = TRUE
            ORDER BY last_used_at DESC
            "#,
            DEVICE_COLUMNS
        );

        let rows = sqlx::query_as::<_, DeviceRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ServerError::Database(format!("查询设备列表失败: {}", e)))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn deactivate(&self, device_id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE examtrust_user_devices
            SET is_active = FALSE
            WHERE id = $1 AND is_active = TRUE
            "#,
        )
        .bind(device_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ServerError::Database(format!("停用设备失败: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    async fn touch(
        &self,
        device_id: i64,
        ip_address: Option<&str>,
        location: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE examtrust_user_devices
            SET last_used_at = NOW(),
                ip_address = COALESCE($2, ip_address),
                location = COALESCE($3, location)
            WHERE id = $1 AND is_active = TRUE
            "#,
        )
        .bind(device_id)
        .bind(ip_address)
        .bind(location)
        .execute(&self.pool)
        .await
        .map_err(|e| ServerError::Database(format!("更新设备使用时间失败: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_trusted(&self, device_id: i64, is_trusted: bool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE examtrust_user_devices SET is_trusted = $2 WHERE id = $1
            "#,
        )
        .bind(device_id)
        .bind(is_trusted)
        .execute(&self.pool)
        .await
        .map_err(|e| ServerError::Database(format!("设置信任状态失败: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_expires_at(&self, device_id: i64, expires_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE examtrust_user_devices SET expires_at = $2 WHERE id = $1
            "#,
        )
        .bind(device_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| ServerError::Database(format!("更新设备过期时间失败: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE examtrust_user_devices
            SET is_active = FALSE
            WHERE is_active = TRUE AND expires_at IS NOT NULL AND expires_at < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| ServerError::Database(format!("清理过期设备失败: {}", e)))?;

        Ok(result.rows_affected())
    }
}
