//! Status mapping and write-back.

mod mapping;
mod synchronizer;

pub use mapping::state_for_code;
pub use synchronizer::StatusSynchronizer;
