pub mod memory_badge;
pub mod redis_badge;

pub use memory_badge::MemoryBadgeTracker;
pub use redis_badge::RedisBadgeTracker;
