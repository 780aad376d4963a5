pub mod error;
pub use error::PoolError;

pub mod pool;
pub use pool::{
    build_pool, ElasticPool, ElasticStealingPool, FixedPool, Job, Pool, PoolKind, Remote,
    StealingPool,
};

pub mod runtime;
pub use runtime::{sleep_for, DetachedLatch, Scheduler};
