//! Request handlers implementing the §6 wire protocol.

mod sync;

pub use sync::*;
