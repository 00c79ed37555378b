use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::auth::models::{TokenClaims, TokenKind};
use crate::config::JwtConfig;
use crate::error::{Result, ServerError};
use crate::model::{User, UserRole};

/// JWT 签发和验证服务 (HS256 对称加密，无持久化状态)
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    access_token_expiration_minutes: i64,
    refresh_token_expiration_days: i64,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret_key.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret_key.as_bytes()),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_token_expiration_minutes: config.access_token_expiration_minutes,
            refresh_token_expiration_days: config.refresh_token_expiration_days,
        }
    }

    /// 签发访问令牌
    pub fn issue_access_token(&self, user: &User, device_id: Option<i64>) -> Result<String> {
        let now = Utc::now().timestamp();

        let claims = TokenClaims {
            iss: self.issuer.clone(),
            sub: user.id.to_string(),
            aud: self.audience.clone(),
            exp: now + self.access_token_expiration_minutes * 60,
            iat: now,
            username: user.username.clone(),
            role: Some(user.role),
            is_first_login: user.is_first_login,
            device_id,
            token_type: TokenKind::AccessToken,
            jti: None,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ServerError::Internal(format!("JWT 签发失败: {}", e)))?;

        tracing::debug!(
            "签发访问令牌: user_id={}, device_id={:?}",
            user.id,
            device_id
        );

        Ok(token)
    }

    /// 签发刷新令牌（携带随机 jti，保证唯一）
    pub fn issue_refresh_token(&self, user: &User, device_id: Option<i64>) -> Result<String> {
        let now = Utc::now().timestamp();

        let claims = TokenClaims {
            iss: self.issuer.clone(),
            sub: user.id.to_string(),
            aud: self.audience.clone(),
            exp: now + self.refresh_token_expiration_days * 24 * 3600,
            iat: now,
            username: user.username.clone(),
            role: None,
            is_first_login: false,
            device_id,
            token_type: TokenKind::RefreshToken,
            jti: Some(Uuid::new_v4().to_string()),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ServerError::Internal(format!("JWT 签发失败: {}", e)))?;

        tracing::debug!(
            "签发刷新令牌: user_id={}, device_id={:?}",
            user.id,
            device_id
        );

        Ok(token)
    }

    /// 验证访问令牌（签名/签发者/受众/有效期 + 种类判别）
    pub fn validate_access_token(&self, token: &str) -> bool {
        self.validate_kind(token, TokenKind::AccessToken)
    }

    /// 验证刷新令牌（签名/签发者/受众/有效期 + 种类判别）
    pub fn validate_refresh_token(&self, token: &str) -> bool {
        self.validate_kind(token, TokenKind::RefreshToken)
    }

    fn validate_kind(&self, token: &str, expected: TokenKind) -> bool {
        match self.decode_claims(token) {
            Some(claims) => {
                if claims.token_type != expected {
                    tracing::warn!(
                        "令牌种类不匹配: expected={}, actual={}",
                        expected,
                        claims.token_type
                    );
                    return false;
                }
                true
            }
            None => false,
        }
    }

    /// 完整校验并解出 Claims；任何失败均返回 None，不向外抛错
    pub fn claims_from_token(&self, token: &str) -> Option<TokenClaims> {
        self.decode_claims(token)
    }

    fn decode_claims(&self, token: &str) -> Option<TokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.leeway = 0;

        match decode::<TokenClaims>(token, &self.decoding_key, &validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                tracing::warn!("令牌验证失败: {}", e);
                None
            }
        }
    }

    /// 从令牌获取用户ID（验证失败返回 None）
    pub fn user_id_from_token(&self, token: &str) -> Option<i64> {
        self.decode_claims(token).and_then(|c| c.user_id())
    }

    /// 从令牌获取设备ID（验证失败或未携带返回 None）
    pub fn device_id_from_token(&self, token: &str) -> Option<i64> {
        self.decode_claims(token).and_then(|c| c.device_id)
    }

    /// 从令牌获取用户角色（验证失败或未携带返回 None）
    pub fn role_from_token(&self, token: &str) -> Option<UserRole> {
        self.decode_claims(token).and_then(|c| c.role)
    }

    /// 读取令牌过期时间
    ///
    /// 签名仍然校验，但不校验有效期/签发者/受众，已过期的令牌也能读出。
    pub fn expiration_of(&self, token: &str) -> Option<DateTime<Utc>> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        match decode::<TokenClaims>(token, &self.decoding_key, &validation) {
            Ok(data) => DateTime::from_timestamp(data.claims.exp, 0),
            Err(e) => {
                tracing::warn!("读取令牌过期时间失败: {}", e);
                None
            }
        }
    }

    /// 判断令牌是否即将过期（无法读取时视为即将过期）
    pub fn is_near_expiry(&self, token: &str, minutes_before_expiry: i64) -> bool {
        match self.expiration_of(token) {
            Some(expires_at) => expires_at - Utc::now() <= Duration::minutes(minutes_before_expiry),
            None => true,
        }
    }
}
