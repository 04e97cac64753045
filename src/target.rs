//! Target Registry
//!
//! - [`Target`]: a probed endpoint owning its [`SampleRing`](crate::engine::SampleRing)
//! - [`TargetRegistry`]: ordered, concurrently readable set of targets

mod model;
mod registry;

pub use model::{RunState, Target, TargetId};
pub use registry::TargetRegistry;
