//! Maps Redis backend errors into the crate's queue/repository taxonomy.

use deadpool_redis::redis::RedisError;
use deadpool_redis::PoolError;

use crate::error::{QueueError, RepoError};

impl From<RedisError> for QueueError {
    fn from(err: RedisError) -> Self {
        QueueError::Backend(err.to_string())
    }
}

impl From<PoolError> for QueueError {
    fn from(err: PoolError) -> Self {
        QueueError::Backend(err.to_string())
    }
}

impl From<RedisError> for RepoError {
    fn from(err: RedisError) -> Self {
        RepoError::Backend(err.to_string())
    }
}

impl From<PoolError> for RepoError {
    fn from(err: PoolError) -> Self {
        RepoError::Backend(err.to_string())
    }
}
