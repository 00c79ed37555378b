// 认证模块 - 设备准入、会话登记与双用途 JWT

pub mod device_registry;
pub mod fingerprint;
pub mod jwt_service;
pub mod models;
pub mod session_manager;

// 重新导出主要类型
pub use device_registry::DeviceRegistry;
pub use jwt_service::JwtService;
pub use models::{TokenClaims, TokenKind};
pub use session_manager::{CreateSessionParams, SessionManager};
