/// Compilation config module.
pub mod compilation;

mod base;
mod logger;

pub use base::*;
pub use logger::*;
