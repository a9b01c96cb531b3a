//! # pvmonitor - Monitor event queues with change-set propagation
//!
//! A monitor turns a stream of updates to a structured value into a bounded
//! sequence of snapshots for one consumer. Each snapshot carries the value,
//! the set of fields that changed since the consumer's previous snapshot, and
//! the set of fields that changed more than once in between.
//!
//! ## Core Concepts
//!
//! - **MonitorEngine**: Owns a fixed ring of snapshot buffers and the change-tracking state
//! - **MonitorElement**: One snapshot buffer, moved to the consumer by `poll` and back by `release`
//! - **BitSet**: Field-index sets for changed and overrun fields
//! - **Record**: A dynamically typed structure value that can be monitored
//! - **UpdateSource**: Anything that pushes raw values to a subscriber
//!
//! ## Usage
//!
//! ```rust
//! use pvmonitor::{MonitorConfig, MonitorEngine, Record, Structure, Value};
//!
//! let structure = Structure::builder()
//!     .field("value", Value::Float(0.0))
//!     .field("units", Value::from("mA"))
//!     .build()?;
//! let engine = MonitorEngine::new(Record::new(structure.clone()), MonitorConfig::default());
//! engine.start()?;
//!
//! engine.on_update(Record::new(structure).with("value", Value::Float(1.5)));
//! let snapshot = engine.poll().expect("one delivery");
//! assert_eq!(snapshot.value().get("value"), Some(&Value::Float(1.5)));
//! engine.release(snapshot).map_err(|e| e.to_error())?;
//! # Ok::<(), pvmonitor::MonitorError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bitset;
pub mod error;
pub mod monitor;
pub mod source;
pub mod structure;
pub mod value;

// Re-export primary types at crate root for convenience
pub use bitset::BitSet;
pub use error::{ConfigError, MonitorError, MonitorResult, ReleaseError, SlotRef};
pub use monitor::{
	ChangeListener, EngineId, MonitorConfig, MonitorElement, MonitorEngine, MonitorStats,
	MonitorStream, Monitored, PoolState, StatsSnapshot, UpdateOutcome,
};
pub use source::{
	ChannelSource, LocalSource, SourceMonitor, Subscription, SubscriptionId, UpdateCallback,
	UpdateSource,
};
pub use structure::{FieldDef, Record, Structure, StructureBuilder};
pub use value::Value;
