pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod infra;
pub mod logging;
pub mod model;
pub mod repository;

pub use auth::{CreateSessionParams, DeviceRegistry, JwtService, SessionManager, TokenKind};
pub use config::{DeviceKickoutPolicy, ServerConfig};
pub use error::{Result, ServerError};
pub use infra::{CleanupScheduler, MemoryVerificationCodeStore, VerificationCodeStore};
pub use model::*;
