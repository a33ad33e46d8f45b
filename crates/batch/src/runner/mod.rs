//! Batch scheduler runner -- public API, dispatch, and the consumer loop.
//!
//! Split into focused submodules:
//! - `core`: scheduler struct, builder, `submit`, and accessor methods
//! - `dispatch`: processor invocation, result fan-out, and metrics
//! - `execution`: lifecycle (`start`/`stop`) and the background loop

mod core;
mod dispatch;
mod execution;

pub use self::core::{BatchScheduler, BatchSchedulerBuilder};
