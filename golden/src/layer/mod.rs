mod conv;
mod fc;
mod flatten;
mod pool;

pub use conv::{conv2d, ConvShape};
pub use fc::{fully_connected, FcShape};
pub use flatten::flatten;
pub use pool::{max_pool, PoolShape, POOL_FLOOR};
