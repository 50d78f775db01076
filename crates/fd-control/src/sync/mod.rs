//! Target sync polling

mod probe;
mod supervisor;

pub use probe::{HttpProbe, TargetProbe};
pub use supervisor::SyncSupervisor;
