mod args;
mod driver;
mod mz_range;
mod proc;
mod progress;
mod types;
mod write;

pub use args::*;
pub use driver::{MZClusterer, MZClustererError};
pub use mz_range::{MzRange, MzRangeParseError};
pub use proc::cluster_spectra;
pub use progress::ProgressRecord;
pub use types::{ClusterRecord, DriverAssessor, Engine};
