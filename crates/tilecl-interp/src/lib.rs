//! Reference interpreter for tilecl kernel modules.
//!
//! Kernels are compiled with [Interpreter] and launched on [host buffers](HostBuffer). Threads of
//! a block run in lock-step and blocks run sequentially, which makes every launch deterministic.

#[macro_use]
extern crate derive_new;

mod buffer;
mod compiler;
mod error;
mod machine;
mod value;

pub use buffer::HostBuffer;
pub use compiler::*;
pub use error::InterpError;
pub use value::{Scalar, Value};
