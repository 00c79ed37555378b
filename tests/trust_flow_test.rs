// 设备绑定 → 令牌签发 → 会话登记 → 撤销/清理 的端到端流程测试

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;

use examtrust::auth::{CreateSessionParams, DeviceRegistry, JwtService, SessionManager};
use examtrust::config::{CleanupConfig, DeviceKickoutPolicy, DeviceSecurityConfig, JwtConfig};
use examtrust::infra::{CleanupScheduler, MemoryVerificationCodeStore, VerificationCodeStore};
use examtrust::model::{DeviceBindRequest, SessionType, User, UserRole};
use examtrust::repository::{
    MemoryDeviceRepository, MemorySessionRepository, MemoryUserRepository,
};

struct TestStack {
    users: Arc<MemoryUserRepository>,
    registry: Arc<DeviceRegistry>,
    sessions: Arc<SessionManager>,
    jwt: JwtService,
}

async fn build_stack(device_config: DeviceSecurityConfig) -> TestStack {
    let users = Arc::new(MemoryUserRepository::new());
    let devices = Arc::new(MemoryDeviceRepository::new());
    let session_repo = Arc::new(MemorySessionRepository::new());

    let registry = Arc::new(DeviceRegistry::new(
        devices.clone(),
        session_repo.clone(),
        users.clone(),
        device_config,
    ));
    let sessions = Arc::new(SessionManager::new(
        session_repo.clone(),
        devices.clone(),
        users.clone(),
    ));
    let jwt = JwtService::new(&JwtConfig {
        secret_key: "integration-test-secret-key-32-chars!".to_string(),
        issuer: "examtrust".to_string(),
        audience: "examtrust-client".to_string(),
        access_token_expiration_minutes: 60,
        refresh_token_expiration_days: 30,
    });

    TestStack {
        users,
        registry,
        sessions,
        jwt,
    }
}

fn default_device_config() -> DeviceSecurityConfig {
    DeviceSecurityConfig {
        enable_device_limit: true,
        max_device_count: 2,
        kickout_policy: DeviceKickoutPolicy::KickoutOldest,
        device_token_expiration_days: 30,
    }
}

fn student(id: i64) -> User {
    User {
        id,
        username: format!("student-{}", id),
        role: UserRole::Student,
        is_active: true,
        is_first_login: false,
    }
}

fn bind_request(fingerprint: &str) -> DeviceBindRequest {
    DeviceBindRequest {
        device_fingerprint: fingerprint.to_string(),
        device_name: None,
        device_type: "windows".to_string(),
        operating_system: Some("Windows 11".to_string()),
        browser_info: Some("ExamClient/2.1".to_string()),
    }
}

#[tokio::test]
async fn test_full_login_flow() {
    let stack = build_stack(default_device_config()).await;
    let user = student(1);
    stack.users.insert_user(user.clone()).await;

    // 准入 → 绑定
    let admission = stack.registry.evaluate_admission(1).await.unwrap();
    assert!(admission.can_bind);

    let fingerprint = stack
        .registry
        .generate_fingerprint("ExamClient/2.1", "10.1.2.3", None);
    let device = stack
        .registry
        .bind_device(1, &bind_request(&fingerprint), Some("10.1.2.3"), None)
        .await
        .unwrap();

    // 签发双令牌：种类互不通用
    let access = stack.jwt.issue_access_token(&user, Some(device.id)).unwrap();
    let refresh = stack.jwt.issue_refresh_token(&user, Some(device.id)).unwrap();
    assert!(stack.jwt.validate_access_token(&access));
    assert!(!stack.jwt.validate_refresh_token(&access));
    assert!(stack.jwt.validate_refresh_token(&refresh));
    assert!(!stack.jwt.validate_access_token(&refresh));
    assert_eq!(stack.jwt.user_id_from_token(&access), Some(1));
    assert_eq!(stack.jwt.device_id_from_token(&access), Some(device.id));

    // 登记会话
    let mut params = CreateSessionParams::new(1, access.clone(), SessionType::JwtToken);
    params.device_id = Some(device.id);
    params.refresh_token = Some(refresh.clone());
    params.ip_address = Some("10.1.2.3".to_string());
    let session = stack.sessions.create_session(params).await.unwrap();

    assert!(stack
        .sessions
        .validate_session(&session.session_token)
        .await
        .is_some());

    // 设备绑定可校验，列表含新设备
    assert!(stack
        .registry
        .validate_binding(1, &device.device_fingerprint)
        .await
        .is_some());
    let listed = stack.sessions.list_active_sessions(1).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].device.as_ref().unwrap().id, device.id);
}

#[tokio::test]
async fn test_long_jwt_gets_compact_session_key() {
    let stack = build_stack(default_device_config()).await;
    let mut user = student(1);
    // 塞长用户名把令牌推过阈值
    user.username = "u".repeat(600);
    stack.users.insert_user(user.clone()).await;

    let access = stack.jwt.issue_access_token(&user, None).unwrap();
    assert!(access.len() > 450);

    let session = stack
        .sessions
        .create_session(CreateSessionParams::new(1, access.clone(), SessionType::JwtToken))
        .await
        .unwrap();

    // 查找键是紧凑标识；认证不受影响（签名独立验证）
    assert!(session.session_token.starts_with("JWT_1_"));
    assert!(stack.jwt.validate_access_token(&access));
    assert!(stack.sessions.validate_session(&access).await.is_none());
    assert!(stack
        .sessions
        .validate_session(&session.session_token)
        .await
        .is_some());
}

#[tokio::test]
async fn test_refresh_flow_rotates_token() {
    let stack = build_stack(default_device_config()).await;
    let user = student(1);
    stack.users.insert_user(user.clone()).await;

    let refresh = stack.jwt.issue_refresh_token(&user, None).unwrap();
    let mut params = CreateSessionParams::new(1, "session-key", SessionType::JwtToken);
    params.refresh_token = Some(refresh.clone());
    let session = stack.sessions.create_session(params).await.unwrap();

    // 刷新流程：刷新令牌必须是刷新种类
    assert!(stack.jwt.validate_refresh_token(&refresh));
    let found = stack
        .sessions
        .get_session_by_refresh_token(&refresh)
        .await
        .unwrap();
    assert_eq!(found.id, session.id);

    let new_refresh = stack.jwt.issue_refresh_token(&user, None).unwrap();
    assert_ne!(refresh, new_refresh);
    let rotated = stack
        .sessions
        .rotate_refresh_token(
            session.id,
            &new_refresh,
            Utc::now() + ChronoDuration::days(30),
        )
        .await;
    assert!(rotated);

    // 旧刷新令牌作废，新令牌可查
    assert!(stack
        .sessions
        .get_session_by_refresh_token(&refresh)
        .await
        .is_none());
    assert!(stack
        .sessions
        .get_session_by_refresh_token(&new_refresh)
        .await
        .is_some());
}

#[tokio::test]
async fn test_kickout_revokes_old_device_sessions() {
    let stack = build_stack(default_device_config()).await;
    stack.users.insert_user(student(1)).await;

    // 占满配额（max=2），每台设备挂一个会话
    let mut session_tokens = Vec::new();
    for fp in ["fp-a", "fp-b"] {
        let device = stack
            .registry
            .bind_device(1, &bind_request(fp), None, None)
            .await
            .unwrap();
        let mut params =
            CreateSessionParams::new(1, format!("token-{}", fp), SessionType::JwtToken);
        params.device_id = Some(device.id);
        stack.sessions.create_session(params).await.unwrap();
        session_tokens.push(format!("token-{}", fp));
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    // 第三台触发踢出最旧设备 fp-a
    stack
        .registry
        .bind_device(1, &bind_request("fp-c"), None, None)
        .await
        .unwrap();

    assert!(stack.registry.validate_binding(1, "fp-a").await.is_none());
    assert!(stack.registry.validate_binding(1, "fp-b").await.is_some());
    assert!(stack.registry.validate_binding(1, "fp-c").await.is_some());

    // fp-a 的会话被级联撤销，fp-b 的不受影响
    assert!(stack
        .sessions
        .validate_session(&session_tokens[0])
        .await
        .is_none());
    assert!(stack
        .sessions
        .validate_session(&session_tokens[1])
        .await
        .is_some());
}

#[tokio::test]
async fn test_reject_policy_blocks_over_quota() {
    let mut config = default_device_config();
    config.kickout_policy = DeviceKickoutPolicy::RejectNew;
    let stack = build_stack(config).await;
    stack.users.insert_user(student(1)).await;

    stack
        .registry
        .bind_device(1, &bind_request("fp-a"), None, None)
        .await
        .unwrap();
    stack
        .registry
        .bind_device(1, &bind_request("fp-b"), None, None)
        .await
        .unwrap();

    let admission = stack.registry.evaluate_admission(1).await.unwrap();
    assert!(!admission.can_bind);
    assert!(stack
        .registry
        .bind_device(1, &bind_request("fp-c"), None, None)
        .await
        .is_err());
    assert_eq!(stack.registry.list_devices(1).await.len(), 2);
}

#[tokio::test]
async fn test_mass_logout_keeps_current_session() {
    let stack = build_stack(default_device_config()).await;
    stack.users.insert_user(student(1)).await;

    let current = stack
        .sessions
        .create_session(CreateSessionParams::new(1, "current", SessionType::JwtToken))
        .await
        .unwrap();
    for token in ["other-1", "other-2"] {
        stack
            .sessions
            .create_session(CreateSessionParams::new(1, token, SessionType::JwtToken))
            .await
            .unwrap();
    }

    let ended = stack
        .sessions
        .end_all_user_sessions(1, Some(current.id))
        .await;
    assert_eq!(ended, 2);
    assert!(stack.sessions.validate_session("current").await.is_some());
    assert!(stack.sessions.validate_session("other-1").await.is_none());

    let stats = stack.sessions.statistics().await;
    assert_eq!(stats.total_active_sessions, 1);
    assert_eq!(stats.online_users, 1);
}

#[tokio::test]
async fn test_scheduler_sweeps_whole_stack() {
    let stack = build_stack(default_device_config()).await;
    stack.users.insert_user(student(1)).await;

    // 一台即将过期的设备及其会话
    let device = stack
        .registry
        .bind_device(1, &bind_request("fp-stale"), None, None)
        .await
        .unwrap();
    let mut params = CreateSessionParams::new(1, "stale-token", SessionType::JwtToken);
    params.device_id = Some(device.id);
    params.expires_at = Some(Utc::now() - ChronoDuration::minutes(1));
    stack.sessions.create_session(params).await.unwrap();

    // 设备过期：extend_expiry 只会延长，所以直接用过期设备的清理路径验证
    let codes = Arc::new(MemoryVerificationCodeStore::new());
    codes
        .store_code("13800000000", "123456", ChronoDuration::seconds(-1))
        .await
        .unwrap();

    let scheduler = Arc::new(CleanupScheduler::new(
        stack.registry.clone(),
        stack.sessions.clone(),
        codes.clone(),
        CleanupConfig {
            interval_secs: 1,
            failure_backoff_secs: 1,
        },
    ));

    scheduler.start();
    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
    scheduler.stop().await;

    // 过期会话与验证码被清理；设备未到期仍然有效
    assert!(stack.sessions.validate_session("stale-token").await.is_none());
    assert!(codes.is_empty());
    assert!(stack
        .registry
        .validate_binding(1, "fp-stale")
        .await
        .is_some());
}
