//! On-disk guards for the data directory

mod lockfile;

pub use lockfile::ProcessLock;
