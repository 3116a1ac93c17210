//! Host resource sampling and the dispatcher's overload gate.

pub mod resource_monitor;
pub mod sampler;

pub use resource_monitor::ResourceMonitor;
pub use sampler::{ProcSampler, ResourceSample, ResourceSampler};
