//! Utility modules

pub mod clock;
pub mod memory_feeds;
pub mod memory_storage;
pub mod validation;

pub use clock::*;
pub use memory_feeds::*;
pub use memory_storage::*;
pub use validation::*;
