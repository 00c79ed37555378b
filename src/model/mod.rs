pub mod device;
pub mod session;
pub mod user;

pub use device::{DeviceBindRequest, DeviceBindResult, DeviceInfo, UserDevice};
pub use session::{SessionInfo, SessionStatistics, SessionType, UserSession};
pub use user::{User, UserRole};
