//! Monitor event queue and change-set propagation.
//!
//! An engine receives raw values from a single producer, tracks which fields
//! changed since the last snapshot its consumer saw, and hands out snapshots
//! from a fixed ring of buffers. When the consumer falls behind, changes are
//! merged into one larger delivery instead of blocking the producer or
//! growing memory.

pub mod config;
pub mod element;
pub mod engine;
pub mod pool;
pub mod stats;
pub mod stream;
pub mod traits;

pub use config::MonitorConfig;
pub use element::{EngineId, MonitorElement};
pub use engine::{MonitorEngine, UpdateOutcome};
pub use pool::PoolState;
pub use stats::{MonitorStats, StatsSnapshot};
pub use stream::MonitorStream;
pub use traits::{ChangeListener, Monitored};
