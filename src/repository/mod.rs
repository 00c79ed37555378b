pub mod device_repo;
pub mod memory;
pub mod session_repo;
pub mod user_repo;

pub use device_repo::{DeviceRepository, NewDevice, PgDeviceRepository};
pub use memory::{MemoryDeviceRepository, MemorySessionRepository, MemoryUserRepository};
pub use session_repo::{NewSession, PgSessionRepository, SessionRepository};
pub use user_repo::{PgUserRepository, UserRepository};
