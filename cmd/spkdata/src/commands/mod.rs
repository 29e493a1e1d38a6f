//! CLI commands module.

mod check;
mod eer;
mod merge;
mod partition;
mod sample;
mod stats;
mod trials;
mod util;

pub use check::CheckCommand;
pub use eer::EerCommand;
pub use merge::MergeCommand;
pub use partition::PartitionCommand;
pub use sample::SampleCommand;
pub use stats::StatsCommand;
pub use trials::GenTrialsCommand;

pub(crate) use util::*;
