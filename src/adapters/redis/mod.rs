//! Redis adapters: job queue plus video and token repositories, all sharing
//! one connection pool.

mod error;
pub mod pool;
pub mod queue;
pub mod repository;

pub use pool::RedisPool;

// Key layout
pub(crate) const VIDEO_PREFIX: &str = "videos:";
pub(crate) const TOKEN_PREFIX: &str = "tokens:";
pub(crate) const TOKEN_VIDEO_INDEX_PREFIX: &str = "tokens:video:";
pub(crate) const TOKEN_USER_INDEX_PREFIX: &str = "tokens:user:";
pub(crate) const TOKEN_EXPIRY_INDEX: &str = "tokens:expiry";
