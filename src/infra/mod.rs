pub mod cleanup_scheduler;
pub mod verification_store;

pub use cleanup_scheduler::{CleanupScheduler, SweepReport};
pub use verification_store::{MemoryVerificationCodeStore, VerificationCodeStore};
