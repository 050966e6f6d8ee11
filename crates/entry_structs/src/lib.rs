//! Common structs for arrival records shared across crates.

mod entry;
mod reason;
mod time;

pub use entry::*;
pub use reason::*;
pub use time::*;
