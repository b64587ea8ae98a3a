pub mod pool;
pub mod refcount;

pub use pool::{Pool, PoolReturn};
pub use refcount::RefCount;
