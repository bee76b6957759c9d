//! Worker thread primitives for CPU-bound background work.
//!
//! A [`WorkerPool`] owns a fixed set of OS threads. Each thread builds one
//! context value at startup and hands it by `&mut` to every job it runs, so
//! state that must not cross threads (non-`Send` engines, scratch buffers)
//! stays with the thread that created it.
//!
//! Jobs are submitted into one of two lanes described by [`TaskClass`]. Workers
//! always drain [`TaskClass::Explicit`] before touching
//! [`TaskClass::Speculative`], and the speculative lane is bounded so
//! prediction can never flood the pool.

mod class;
mod panic;
mod pool;

pub use class::TaskClass;
pub use panic::panic_message;
pub use pool::{MAX_WORKERS, PoolError, PoolSnapshot, WorkerId, WorkerPool, WorkerPoolCfg};
